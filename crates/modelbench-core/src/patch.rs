//! Injecting generated code into the scratch artifact.
//!
//! The applier pulls the code out of a raw completion, checks that it can be
//! embedded at all, finds the anchor class and appends the code to the end
//! of the class body. All writes go through an [`ArtifactLease`].

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::domain::{PatchFailure, PatchOutcome, WorkspaceError};
use crate::workspace::ArtifactLease;

const DEFAULT_INDENT: &str = "    ";

/// Where generated code is inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anchor {
    /// End of the body of `class <name>`.
    Class { name: String },
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anchor::Class { name } => write!(f, "class {name}"),
        }
    }
}

/// Result of one patch attempt plus the code that was (or would have been) injected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchAttempt {
    pub outcome: PatchOutcome,
    pub code: String,
    /// SHA-256 of `code`, hex encoded.
    pub code_digest: String,
}

/// Applies generated code at a fixed anchor.
#[derive(Debug, Clone)]
pub struct PatchApplier {
    anchor: Anchor,
}

impl PatchApplier {
    pub fn new(anchor: Anchor) -> Self {
        Self { anchor }
    }

    pub fn anchor(&self) -> &Anchor {
        &self.anchor
    }

    /// Extract, validate and inject `raw` into the leased artifact.
    ///
    /// Rejections leave the artifact untouched. Only I/O problems with the
    /// scratch copy are returned as errors.
    pub fn apply(
        &self,
        raw: &str,
        lease: &mut ArtifactLease<'_>,
    ) -> Result<PatchAttempt, WorkspaceError> {
        let code = extract_code(raw);
        let code_digest = digest(&code);

        let patched = match self.inject(lease.baseline(), &code) {
            Ok(patched) => patched,
            Err(failure) => {
                debug!(anchor = %self.anchor, failure = ?failure, "patch rejected");
                return Ok(PatchAttempt {
                    outcome: PatchOutcome::rejected(failure),
                    code,
                    code_digest,
                });
            }
        };

        lease
            .write(&patched)
            .map_err(|source| WorkspaceError::Write {
                path: lease.artifact_path().display().to_string(),
                source,
            })?;

        Ok(PatchAttempt {
            outcome: PatchOutcome::applied(),
            code,
            code_digest,
        })
    }

    /// Pure injection: returns the patched source or the reason it cannot be built.
    pub fn inject(&self, source: &str, code: &str) -> Result<String, PatchFailure> {
        check_injection(code).map_err(|reason| PatchFailure::MalformedInjection { reason })?;

        let Anchor::Class { name } = &self.anchor;
        let site = locate_class_body(source, name).ok_or_else(|| PatchFailure::AnchorNotFound {
            anchor: self.anchor.to_string(),
        })?;

        let mut lines: Vec<&str> = source.split('\n').collect();
        let block = reindent(code, &site.body_indent);

        let mut inserted: Vec<&str> = Vec::with_capacity(block.len() + 2);
        inserted.push("");
        inserted.extend(block.iter().map(String::as_str));
        let at = site.insert_after + 1;
        if at < lines.len() && !lines[at].trim().is_empty() {
            inserted.push("");
        }

        lines.splice(at..at, inserted);
        Ok(lines.join("\n"))
    }
}

/// Strip fences and reasoning blocks and keep everything from the first
/// `def`/`async def`/decorator line on.
pub fn extract_code(raw: &str) -> String {
    let think = Regex::new(r"(?s)<think(?:ing)?>.*?</think(?:ing)?>").expect("static regex");
    let without_think = think.replace_all(raw, "");

    let lines: Vec<&str> = without_think
        .lines()
        .filter(|l| !l.trim_start().starts_with("```"))
        .collect();

    let start = lines.iter().position(|l| {
        let t = l.trim_start();
        t.starts_with("def ") || t.starts_with("async def ") || t.starts_with('@')
    });

    let kept = match start {
        Some(idx) => lines[idx..].join("\n"),
        None => lines.join("\n"),
    };

    let trimmed = kept.trim_end();
    if start.is_some() {
        trimmed.to_string()
    } else {
        trimmed.trim_start_matches('\n').to_string()
    }
}

/// Check that `code` can be embedded as a class member.
pub fn check_injection(code: &str) -> Result<(), String> {
    if code.trim().is_empty() {
        return Err("generated code is empty".to_string());
    }

    if let Some(c) = code
        .chars()
        .find(|c| (c.is_control() && !matches!(c, '\n' | '\r' | '\t')) || matches!(c, '\u{FEFF}' | '\u{FFFD}'))
    {
        return Err(format!("generated code contains invalid character U+{:04X}", c as u32));
    }

    let has_def = code.lines().any(|l| {
        let t = l.trim_start();
        t.starts_with("def ") || t.starts_with("async def ")
    });
    if !has_def {
        return Err("no function definition found".to_string());
    }

    if let Some(err) = lex(code).error {
        return Err(err);
    }

    Ok(())
}

fn digest(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

/// Where to insert inside a class.
#[derive(Debug, PartialEq, Eq)]
struct InsertionSite {
    /// Index of the last line belonging to the class body.
    insert_after: usize,
    body_indent: String,
}

fn locate_class_body(source: &str, name: &str) -> Option<InsertionSite> {
    let lines: Vec<&str> = source.split('\n').collect();
    let lexed = lex(source);
    let header = Regex::new(&format!(r"^([ \t]*)class\s+{}\b", regex::escape(name))).ok()?;

    let (header_idx, class_indent) = lines.iter().enumerate().find_map(|(i, line)| {
        if lexed.continuation.get(i).copied().unwrap_or(false) {
            return None;
        }
        header
            .captures(line)
            .map(|caps| (i, caps.get(1).map_or(0, |m| m.as_str().len())))
    })?;

    // Header may span lines, e.g. `class App(\n    Base,\n):`.
    let mut body_start = header_idx + 1;
    while body_start < lines.len() && lexed.continuation[body_start] {
        body_start += 1;
    }

    let mut body_indent: Option<String> = None;
    let mut last_body_line: Option<usize> = None;

    for idx in body_start..lines.len() {
        let line = lines[idx];
        if lexed.continuation[idx] {
            if last_body_line.is_some() {
                last_body_line = Some(idx);
            }
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let indent = indent_width(line);
        if trimmed.starts_with('#') && indent <= class_indent {
            continue;
        }
        if indent <= class_indent {
            break;
        }
        if body_indent.is_none() {
            body_indent = Some(line[..indent].to_string());
        }
        last_body_line = Some(idx);
    }

    let insert_after = last_body_line?;
    Some(InsertionSite {
        insert_after,
        body_indent: body_indent.unwrap_or_else(|| {
            format!("{}{}", &lines[header_idx][..class_indent], DEFAULT_INDENT)
        }),
    })
}

fn indent_width(line: &str) -> usize {
    line.len() - line.trim_start_matches([' ', '\t']).len()
}

/// Dedent `code` to column zero, then indent every non-blank line by `indent`.
/// Lines that start inside a string literal are string content and pass
/// through untouched.
fn reindent(code: &str, indent: &str) -> Vec<String> {
    let lexed = lex(code);
    let lines: Vec<&str> = code.split('\n').collect();

    let min_indent = lines
        .iter()
        .enumerate()
        .filter(|(i, l)| !l.trim().is_empty() && !lexed.continuation[*i])
        .map(|(_, l)| indent_width(l))
        .min()
        .unwrap_or(0);

    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            if lexed.in_string[i] {
                line.trim_end_matches('\r').to_string()
            } else if line.trim().is_empty() {
                String::new()
            } else {
                let strip = indent_width(line).min(min_indent);
                format!("{indent}{}", line[strip..].trim_end_matches('\r'))
            }
        })
        .collect()
}

/// Line-level view of a Python source: which lines start inside a string,
/// bracket or backslash continuation, and the first structural error.
struct Lexed {
    continuation: Vec<bool>,
    in_string: Vec<bool>,
    error: Option<String>,
}

fn lex(source: &str) -> Lexed {
    let mut continuation = Vec::new();
    let mut in_string = Vec::new();
    let mut error: Option<String> = None;
    let mut stack: Vec<(char, usize)> = Vec::new();
    // (quote char, triple-quoted, line opened)
    let mut string: Option<(char, bool, usize)> = None;
    let mut backslash = false;

    for (line_no, raw_line) in source.split('\n').enumerate() {
        continuation.push(string.is_some() || !stack.is_empty() || backslash);
        in_string.push(string.is_some());
        backslash = false;

        let line = raw_line.trim_end_matches('\r');
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if let Some((quote, triple, _)) = string {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if c == quote {
                    if !triple {
                        string = None;
                    } else if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                        string = None;
                        i += 3;
                        continue;
                    }
                }
                i += 1;
                continue;
            }

            match c {
                '#' => break,
                '\'' | '"' => {
                    if chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c) {
                        string = Some((c, true, line_no));
                        i += 3;
                        continue;
                    }
                    string = Some((c, false, line_no));
                }
                '(' | '[' | '{' => stack.push((c, line_no)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        _ => {
                            error.get_or_insert_with(|| {
                                format!("unbalanced '{c}' at line {}", line_no + 1)
                            });
                        }
                    }
                }
                '\\' if i + 1 == chars.len() => backslash = true,
                _ => {}
            }
            i += 1;
        }

        if let Some((_, false, opened)) = string {
            if line.ends_with('\\') {
                continue;
            }
            error.get_or_insert_with(|| {
                format!("unterminated string literal at line {}", opened + 1)
            });
            string = None;
        }
    }

    if let Some((_, _, opened)) = string {
        error.get_or_insert_with(|| format!("unterminated string literal at line {}", opened + 1));
    }
    if let Some((open, opened)) = stack.first() {
        error.get_or_insert_with(|| format!("unclosed '{open}' opened at line {}", opened + 1));
    }

    Lexed {
        continuation,
        in_string,
        error,
    }
}
