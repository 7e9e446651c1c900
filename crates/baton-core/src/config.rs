//! File configuration for runner defaults and logging.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AgentError, Result};

pub const DEFAULT_MAX_TURNS: u32 = 10;
pub const DEFAULT_WORKFLOW_NAME: &str = "Agent workflow";

/// Environment variable consulted for the default of
/// `trace_include_sensitive_data`.
pub const SENSITIVE_DATA_ENV: &str = "BATON_TRACE_INCLUDE_SENSITIVE_DATA";

/// Top-level Baton configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner: Option<RunnerDefaults>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerDefaults {
    /// Turn limit applied when a run does not set one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,

    /// Model name used when neither the agent nor the run picks one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracing_disabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_include_sensitive_data: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "baton_agent=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Parse a boolean environment flag. Unrecognised values count as unset.
pub fn env_flag(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Default for `trace_include_sensitive_data` when nothing sets it
/// explicitly.
pub fn sensitive_data_default() -> bool {
    env_flag(SENSITIVE_DATA_ENV).unwrap_or(true)
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| AgentError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        let config: Config =
            json5::from_str(&substituted).map_err(|e| AgentError::Config(e.to_string()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn max_turns(&self) -> u32 {
        self.runner
            .as_ref()
            .and_then(|r| r.max_turns)
            .unwrap_or(DEFAULT_MAX_TURNS)
    }

    pub fn default_model(&self) -> Option<&str> {
        self.runner.as_ref().and_then(|r| r.model.as_deref())
    }

    pub fn tracing_disabled(&self) -> bool {
        self.runner
            .as_ref()
            .and_then(|r| r.tracing_disabled)
            .unwrap_or(false)
    }

    pub fn trace_include_sensitive_data(&self) -> bool {
        self.runner
            .as_ref()
            .and_then(|r| r.trace_include_sensitive_data)
            .unwrap_or_else(sensitive_data_default)
    }

    pub fn workflow_name(&self) -> &str {
        self.runner
            .as_ref()
            .and_then(|r| r.workflow_name.as_deref())
            .unwrap_or(DEFAULT_WORKFLOW_NAME)
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(runner) = &self.runner {
            if runner.max_turns == Some(0) {
                errors.push("runner.max_turns cannot be 0".to_string());
            }
            if runner.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
                warnings.push("runner.model is empty and will be ignored".to_string());
            }
        }

        if let Some(logging) = &self.logging {
            if !matches!(logging.format.as_str(), "plain" | "json") {
                errors.push(format!("Unknown logging.format '{}'", logging.format));
            }
            if !matches!(logging.output.as_str(), "stderr" | "stdout") {
                errors.push(format!("Unknown logging.output '{}'", logging.output));
            }
        }

        (warnings, errors)
    }
}
