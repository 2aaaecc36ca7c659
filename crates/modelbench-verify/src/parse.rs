//! Turning tool output into tallies.

use regex::Regex;
use serde_json::Value;

use modelbench_core::{SecurityTally, TestTally};

/// Counts from a pytest summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PytestCounts {
    pub passed: u64,
    pub failed: u64,
    pub errors: u64,
    pub skipped: u64,
}

/// Find the final summary line (`== 3 passed, 1 failed in 2.1s ==` or the
/// quiet-mode `3 passed in 2.1s`) and read its counts.
pub fn parse_pytest_summary(output: &str) -> Option<PytestCounts> {
    let outcome = Regex::new(r"(\d+) (passed|failed|errors?|skipped)\b").expect("static regex");

    for line in output.lines().rev() {
        let line = line.trim().trim_matches('=').trim();
        if line.starts_with("no tests ran") {
            return Some(PytestCounts::default());
        }
        if !line.contains(" in ") {
            continue;
        }

        let mut counts = PytestCounts::default();
        let mut found = false;
        for cap in outcome.captures_iter(line) {
            let n: u64 = cap[1].parse().unwrap_or(0);
            match &cap[2] {
                "passed" => counts.passed = n,
                "failed" => counts.failed = n,
                "error" | "errors" => counts.errors = n,
                "skipped" => counts.skipped = n,
                _ => continue,
            }
            found = true;
        }
        if found {
            return Some(counts);
        }
    }
    None
}

/// Build a tally from a finished pytest run, or explain why there is none.
pub fn functional_tally(
    exit_code: Option<i32>,
    stdout: &str,
    stderr: &str,
    required_passed: u64,
) -> Result<TestTally, String> {
    let exit_success = exit_code == Some(0);
    let counts = match parse_pytest_summary(stdout) {
        Some(counts) => counts,
        None if exit_success => PytestCounts::default(),
        None => {
            return Err(format!(
                "test runner exited with {} and printed no summary: {}",
                exit_code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}")),
                tail(stderr, 400)
            ))
        }
    };

    Ok(TestTally {
        passed: counts.passed,
        failed: counts.failed,
        errors: counts.errors,
        skipped: counts.skipped,
        exit_success,
        required_passed,
    })
}

/// Count bandit findings by severity.
///
/// Reads `results[].issue_severity`, falling back to `metrics._totals` when
/// the results list is absent.
pub fn parse_bandit_json(output: &str) -> Result<SecurityTally, String> {
    let start = output
        .find('{')
        .ok_or_else(|| format!("scanner printed no JSON: {}", tail(output, 200)))?;
    let report: Value = serde_json::from_str(&output[start..])
        .map_err(|e| format!("scanner output is not valid JSON: {e}"))?;

    let mut tally = SecurityTally::default();

    if let Some(results) = report.get("results").and_then(Value::as_array) {
        for issue in results {
            match issue
                .get("issue_severity")
                .and_then(Value::as_str)
                .map(str::to_ascii_uppercase)
                .as_deref()
            {
                Some("HIGH") => tally.high += 1,
                Some("MEDIUM") => tally.medium += 1,
                Some("LOW") => tally.low += 1,
                _ => {}
            }
        }
        return Ok(tally);
    }

    let totals = report
        .pointer("/metrics/_totals")
        .ok_or_else(|| "scanner JSON has neither results nor metrics totals".to_string())?;
    let count = |key: &str| totals.get(key).and_then(Value::as_f64).unwrap_or(0.0) as u64;
    tally.low = count("SEVERITY.LOW");
    tally.medium = count("SEVERITY.MEDIUM");
    tally.high = count("SEVERITY.HIGH");
    Ok(tally)
}

fn tail(text: &str, max: usize) -> String {
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(max.saturating_sub(1))
        .map_or(0, |(i, _)| i);
    text[start..].to_string()
}
