//! Local shell tool.
//!
//! The model issues `local_shell_call` items carrying an argv-style command.
//! The runner hands each one to a caller-supplied [`LocalShellExecutor`];
//! whatever it returns, including failure text, is what the model sees.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use baton_core::items::{Item, LocalShellAction};

use crate::context::RunContext;
use crate::tool_guardrails::{ToolInputGuardrail, ToolOutputGuardrail};

/// A shell command the model asked to run.
#[derive(Debug, Clone)]
pub struct LocalShellCommandRequest {
    pub context: Arc<RunContext>,
    pub call_id: String,
    pub action: LocalShellAction,
    /// The raw `local_shell_call` item.
    pub data: Item,
}

#[async_trait]
pub trait LocalShellExecutor: Send + Sync {
    /// Run the command and return its output. Errors are reported to the
    /// model as text.
    async fn execute(&self, request: &LocalShellCommandRequest) -> anyhow::Result<String>;
}

pub struct LocalShellTool {
    executor: Arc<dyn LocalShellExecutor>,
    input_guardrails: Vec<ToolInputGuardrail>,
    output_guardrails: Vec<ToolOutputGuardrail>,
}

impl LocalShellTool {
    pub const NAME: &'static str = "local_shell";

    pub fn new(executor: Arc<dyn LocalShellExecutor>) -> Self {
        Self {
            executor,
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
        }
    }

    pub fn with_input_guardrail(mut self, guardrail: ToolInputGuardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: ToolOutputGuardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    pub fn input_guardrails(&self) -> &[ToolInputGuardrail] {
        &self.input_guardrails
    }

    pub fn output_guardrails(&self) -> &[ToolOutputGuardrail] {
        &self.output_guardrails
    }

    pub(crate) async fn run(&self, request: &LocalShellCommandRequest) -> String {
        match self.executor.execute(request).await {
            Ok(output) => output,
            Err(e) => {
                warn!(call_id = %request.call_id, "Local shell executor failed");
                format!("Failed to execute command: {e}")
            }
        }
    }
}

/// Executor that spawns the command as a child process.
#[derive(Debug, Clone)]
pub struct ProcessShellExecutor {
    pub default_timeout_ms: u64,
    pub max_output_bytes: usize,
}

impl Default for ProcessShellExecutor {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_output_bytes: 100_000,
        }
    }
}

impl ProcessShellExecutor {
    fn truncate(&self, content: String) -> String {
        let max = self.max_output_bytes;
        if content.len() <= max {
            return content;
        }
        let mut end = max;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...\n[output truncated at {max}]", &content[..end])
    }
}

#[async_trait]
impl LocalShellExecutor for ProcessShellExecutor {
    async fn execute(&self, request: &LocalShellCommandRequest) -> anyhow::Result<String> {
        let action = &request.action;
        let Some((program, args)) = action.command.split_first() else {
            anyhow::bail!("empty command");
        };
        let timeout_ms = action.timeout_ms.unwrap_or(self.default_timeout_ms);

        let mut command = tokio::process::Command::new(program);
        command.args(args).kill_on_drop(true);
        if let Some(dir) = &action.working_directory {
            command.current_dir(dir);
        }
        if let Some(env) = &action.env {
            command.envs(env.iter());
        }
        debug!(call_id = %request.call_id, timeout_ms, "Spawning local shell command");

        let result = tokio::time::timeout(Duration::from_millis(timeout_ms), command.output()).await;
        let content = match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let exit_code = output.status.code().unwrap_or(-1);
                if stderr.is_empty() {
                    format!("Exit code: {exit_code}\n{stdout}")
                } else {
                    format!("Exit code: {exit_code}\nstdout:\n{stdout}\nstderr:\n{stderr}")
                }
            }
            Ok(Err(e)) => format!("Failed to execute command: {e}"),
            Err(_) => format!("Command timed out after {timeout_ms}ms"),
        };
        Ok(self.truncate(content))
    }
}

/// Env map helper for building actions in code.
pub fn env_map<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> HashMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
