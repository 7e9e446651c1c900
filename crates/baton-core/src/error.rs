use serde_json::Value;
use thiserror::Error;

use crate::items::{Item, ModelResponse, RunInput};
use crate::usage::Usage;

/// Partial state of a run at the moment it was aborted.
///
/// Attached to tripwire and max-turn errors so callers can inspect what the
/// run had produced before it stopped. Tool tripwires get theirs when the
/// error leaves the turn that raised it.
#[derive(Debug, Clone, Default)]
pub struct RunErrorDetails {
    pub input: RunInput,
    pub new_items: Vec<Item>,
    pub raw_responses: Vec<ModelResponse>,
    pub last_agent: String,
    pub usage: Usage,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("User error: {0}")]
    User(String),

    #[error("Model behavior error: {0}")]
    ModelBehavior(String),

    #[error("Max turns ({max_turns}) exceeded")]
    MaxTurnsExceeded {
        max_turns: u32,
        run_data: Option<Box<RunErrorDetails>>,
    },

    #[error("Guardrail InputGuardrail '{guardrail}' triggered tripwire")]
    InputGuardrailTripwireTriggered {
        guardrail: String,
        output_info: Value,
        run_data: Option<Box<RunErrorDetails>>,
    },

    #[error("Guardrail OutputGuardrail '{guardrail}' triggered tripwire")]
    OutputGuardrailTripwireTriggered {
        guardrail: String,
        output_info: Value,
        run_data: Option<Box<RunErrorDetails>>,
    },

    #[error("Tool guardrail ToolInputGuardrail '{guardrail}' triggered tripwire")]
    ToolInputGuardrailTripwireTriggered {
        guardrail: String,
        output_info: Value,
        run_data: Option<Box<RunErrorDetails>>,
    },

    #[error("Tool guardrail ToolOutputGuardrail '{guardrail}' triggered tripwire")]
    ToolOutputGuardrailTripwireTriggered {
        guardrail: String,
        output_info: Value,
        run_data: Option<Box<RunErrorDetails>>,
    },

    #[error("Tool '{tool}' failed: {source}")]
    Tool {
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Session error: {0}")]
    Session(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Model(anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    /// Recover an `AgentError` that travelled through an `anyhow::Error`
    /// returned by a collaborator, or wrap the error with `wrap` otherwise.
    pub fn from_anyhow(err: anyhow::Error, wrap: impl FnOnce(anyhow::Error) -> AgentError) -> Self {
        match err.downcast::<AgentError>() {
            Ok(inner) => inner,
            Err(err) => wrap(err),
        }
    }

    /// Partial run data carried by tripwire and max-turn errors.
    pub fn run_data(&self) -> Option<&RunErrorDetails> {
        match self {
            AgentError::MaxTurnsExceeded { run_data, .. }
            | AgentError::InputGuardrailTripwireTriggered { run_data, .. }
            | AgentError::OutputGuardrailTripwireTriggered { run_data, .. }
            | AgentError::ToolInputGuardrailTripwireTriggered { run_data, .. }
            | AgentError::ToolOutputGuardrailTripwireTriggered { run_data, .. } => run_data.as_deref(),
            _ => None,
        }
    }

    /// Attach run data to an error that supports it, keeping any already
    /// attached. Other errors pass through.
    pub fn with_run_data(mut self, details: RunErrorDetails) -> Self {
        match &mut self {
            AgentError::MaxTurnsExceeded { run_data, .. }
            | AgentError::InputGuardrailTripwireTriggered { run_data, .. }
            | AgentError::OutputGuardrailTripwireTriggered { run_data, .. }
            | AgentError::ToolInputGuardrailTripwireTriggered { run_data, .. }
            | AgentError::ToolOutputGuardrailTripwireTriggered { run_data, .. } => {
                if run_data.is_none() {
                    *run_data = Some(Box::new(details));
                }
            }
            _ => {}
        }
        self
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
