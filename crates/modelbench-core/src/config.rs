//! Benchmark configuration loaded from TOML.
//!
//! Every section has defaults matching the stock FastAPI benchmark, so an
//! empty file is a valid (if credential-less) configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::completion::openai_compat::DEFAULT_API_BASE;
use crate::completion::DEFAULT_TASK_PROMPT;
use crate::domain::{ConfigError, ModelSpec};
use crate::evaluator::EvaluatorSettings;
use crate::patch::Anchor;
use crate::retry::RetryPolicy;
use crate::workspace::DEFAULT_EXCLUDES;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Iterations per model.
    pub iterations: u32,
    /// Sessions allowed to run at once.
    pub max_concurrent_sessions: usize,
    /// Prompt sent on every iteration. Defaults to the secure-headers task.
    pub prompt: Option<String>,
    pub endpoint: EndpointConfig,
    pub target: TargetConfig,
    pub verification: VerificationConfig,
    pub retry: RetryPolicy,
    pub models: Vec<ModelSpec>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            iterations: 3,
            max_concurrent_sessions: 1,
            prompt: None,
            endpoint: EndpointConfig::default(),
            target: TargetConfig::default(),
            verification: VerificationConfig::default(),
            retry: RetryPolicy::default(),
            models: default_roster(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub api_base: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            temperature: 0.7,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub project_root: PathBuf,
    /// Artifact path relative to `project_root`.
    pub artifact: PathBuf,
    pub anchor_class: String,
    pub excludes: Vec<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("fastapi"),
            artifact: PathBuf::from("fastapi/applications.py"),
            anchor_class: "FastAPI".to_string(),
            excludes: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TargetConfig {
    pub fn anchor(&self) -> Anchor {
        Anchor::Class {
            name: self.anchor_class.clone(),
        }
    }
}

/// A single external check. `{artifact}` and `{root}` in the command are
/// replaced with the scratch artifact path and workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckCommand {
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl CheckCommand {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub functional: CheckCommand,
    /// Passing tests required on top of a clean exit.
    pub min_passed: u64,
    pub security: CheckCommand,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            functional: CheckCommand {
                command: ["python", "-m", "pytest", "-q", "-p", "no:cacheprovider", "tests"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                timeout_secs: 600,
            },
            min_passed: 3032,
            security: CheckCommand {
                command: ["bandit", "-q", "-f", "json", "{artifact}"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                timeout_secs: 120,
            },
        }
    }
}

fn default_roster() -> Vec<ModelSpec> {
    vec![
        ModelSpec::new("llama-3.3-70b-versatile", "Llama 3.3 (70B)"),
        ModelSpec::new("llama-3.1-8b-instant", "Llama 3.1 (8B)"),
        ModelSpec::new("qwen/qwen3-32b", "Qwen 3 (32B)"),
    ]
}

impl BenchConfig {
    /// Parse a TOML document. Relative target paths stay relative.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load from a file; relative `target.project_root` resolves against the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Invalid(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&raw)?;
        if config.target.project_root.is_relative() {
            if let Some(dir) = path.parent() {
                config.target.project_root = dir.join(&config.target.project_root);
            }
        }
        Ok(config)
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::NoModels);
        }
        if self.iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if model.id.trim().is_empty() {
                return Err(ConfigError::Invalid("model id must not be empty".to_string()));
            }
            if !seen.insert(model.id.as_str()) {
                return Err(ConfigError::DuplicateModel(model.id.clone()));
            }
        }

        if self.max_concurrent_sessions == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_sessions must be at least 1".to_string(),
            ));
        }
        if self.endpoint.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "endpoint timeout_secs must be positive".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.endpoint.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature {} outside 0.0..=2.0",
                self.endpoint.temperature
            )));
        }
        if self.target.anchor_class.trim().is_empty() {
            return Err(ConfigError::InvalidTarget("anchor_class must not be empty".to_string()));
        }
        for (name, check) in [
            ("functional", &self.verification.functional),
            ("security", &self.verification.security),
        ] {
            if check.command.is_empty() {
                return Err(ConfigError::Invalid(format!("{name} command must not be empty")));
            }
            if check.timeout_secs == 0 {
                return Err(ConfigError::Invalid(format!("{name} timeout must be positive")));
            }
        }
        Ok(())
    }

    /// Read the API key from the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        match std::env::var(&self.endpoint.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingCredential {
                env_var: self.endpoint.api_key_env.clone(),
            }),
        }
    }

    pub fn prompt(&self) -> &str {
        self.prompt.as_deref().unwrap_or(DEFAULT_TASK_PROMPT)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.endpoint.timeout_secs)
    }

    pub fn evaluator_settings(&self) -> EvaluatorSettings {
        EvaluatorSettings {
            iterations: self.iterations,
            completion_timeout: self.request_timeout(),
            retry: self.retry.clone(),
        }
    }

    /// Keep only roster entries whose id is in `ids`, preserving `ids` order.
    /// Unknown ids become ad-hoc models named after themselves.
    pub fn select_models(&mut self, ids: &[String]) {
        let roster = std::mem::take(&mut self.models);
        self.models = ids
            .iter()
            .map(|id| {
                roster
                    .iter()
                    .find(|m| &m.id == id)
                    .cloned()
                    .unwrap_or_else(|| ModelSpec::new(id.clone(), id.clone()))
            })
            .collect();
    }
}
