//! The runner.
//!
//! [`Runner::run`] drives an agent to a final output and returns a
//! [`RunResult`]; [`Runner::run_streamed`] does the same on a background
//! task and hands back a [`RunResultStreaming`] whose event stream the
//! caller consumes.

mod controller;
mod handoffs;
mod input;
mod result;
mod streaming;
mod tools;
mod turn;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use baton_core::config::{self, Config, DEFAULT_MAX_TURNS, DEFAULT_WORKFLOW_NAME};
use baton_core::error::{AgentError, Result};
use baton_core::items::{Item, RunInput};
use baton_core::session::Session;
use baton_core::settings::ModelSettings;
use baton_providers::ModelProvider;

use crate::agent::{Agent, ModelRef};
use crate::context::RunContext;
use crate::guardrail::{InputGuardrail, OutputGuardrail};
use crate::handoff::HandoffInputFilter;
use crate::hooks::{NoopRunHooks, RunHooks};

use controller::RunDriver;

pub use result::{RunResult, RunResultStreaming};
pub use streaming::{CancelMode, RunItemEventName, StreamEvent};

/// What is about to be sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInputData {
    pub input: Vec<Item>,
    pub instructions: Option<String>,
}

/// Argument to a [`CallModelInputFilter`].
#[derive(Debug, Clone)]
pub struct CallModelData {
    pub model_data: ModelInputData,
    pub agent: Arc<Agent>,
    pub context: Arc<RunContext>,
}

type CallModelFn = Arc<dyn Fn(CallModelData) -> BoxFuture<'static, anyhow::Result<ModelInputData>> + Send + Sync>;

/// Last chance to rewrite the input and instructions before each model call.
#[derive(Clone)]
pub struct CallModelInputFilter(CallModelFn);

impl CallModelInputFilter {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(CallModelData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ModelInputData>> + Send + 'static,
    {
        Self(Arc::new(move |data| func(data).boxed()))
    }

    pub fn from_fn<F>(func: F) -> Self
    where
        F: Fn(CallModelData) -> ModelInputData + Send + Sync + 'static,
    {
        Self::new(move |data| {
            let filtered = func(data);
            async move { Ok(filtered) }
        })
    }

    pub(crate) async fn apply(&self, data: CallModelData) -> Result<ModelInputData> {
        (self.0)(data).await.map_err(|e| {
            AgentError::from_anyhow(e, |e| AgentError::User(format!("call_model_input_filter failed: {e}")))
        })
    }
}

/// Settings for a whole run.
#[derive(Clone)]
pub struct RunConfig {
    /// Overrides every agent's own model.
    pub model: Option<ModelRef>,
    /// Resolves model names.
    pub model_provider: Option<Arc<dyn ModelProvider>>,
    /// Name asked of the provider when neither the config nor the agent
    /// names a model.
    pub default_model: Option<String>,
    /// Layered over each agent's settings; set fields win.
    pub model_settings: Option<ModelSettings>,
    /// Applies to handoffs that define no filter of their own.
    pub handoff_input_filter: Option<HandoffInputFilter>,
    pub input_guardrails: Vec<InputGuardrail>,
    pub output_guardrails: Vec<OutputGuardrail>,
    pub call_model_input_filter: Option<CallModelInputFilter>,
    /// Chain calls server-side from this response. Exclusive with
    /// `conversation_id`.
    pub previous_response_id: Option<String>,
    /// Server-side conversation holding the history.
    pub conversation_id: Option<String>,
    pub tracing_disabled: bool,
    /// Whether model and tool payloads may appear in logs and traces.
    pub trace_include_sensitive_data: bool,
    pub workflow_name: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: None,
            model_provider: None,
            default_model: None,
            model_settings: None,
            handoff_input_filter: None,
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            call_model_input_filter: None,
            previous_response_id: None,
            conversation_id: None,
            tracing_disabled: false,
            trace_include_sensitive_data: config::sensitive_data_default(),
            workflow_name: DEFAULT_WORKFLOW_NAME.to_string(),
        }
    }
}

impl RunConfig {
    /// Seed from the `runner` section of a config file.
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_model: config.default_model().map(String::from),
            tracing_disabled: config.tracing_disabled(),
            trace_include_sensitive_data: config.trace_include_sensitive_data(),
            workflow_name: config.workflow_name().to_string(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.previous_response_id.is_some() && self.conversation_id.is_some() {
            return Err(AgentError::User(
                "previous_response_id and conversation_id cannot both be set".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("model", &self.model)
            .field("default_model", &self.default_model)
            .field("model_settings", &self.model_settings)
            .field("previous_response_id", &self.previous_response_id)
            .field("conversation_id", &self.conversation_id)
            .field("tracing_disabled", &self.tracing_disabled)
            .field("trace_include_sensitive_data", &self.trace_include_sensitive_data)
            .field("workflow_name", &self.workflow_name)
            .finish_non_exhaustive()
    }
}

/// Per-call options.
#[derive(Clone)]
pub struct RunOptions {
    pub context: Arc<RunContext>,
    pub hooks: Arc<dyn RunHooks>,
    pub session: Option<Arc<dyn Session>>,
    pub max_turns: u32,
    pub run_config: RunConfig,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            context: Arc::new(RunContext::new()),
            hooks: Arc::new(NoopRunHooks),
            session: None,
            max_turns: DEFAULT_MAX_TURNS,
            run_config: RunConfig::default(),
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_turns: config.max_turns(),
            run_config: RunConfig::from_config(config),
            ..Self::default()
        }
    }
}

pub struct Runner;

impl Runner {
    /// Run `agent` until it produces a final output.
    pub async fn run(agent: Arc<Agent>, input: impl Into<RunInput>, options: RunOptions) -> Result<RunResult> {
        options.run_config.validate()?;
        RunDriver::new(agent, input.into(), options, None).run().await
    }

    /// Start a run on a background task and stream its events. Must be
    /// called inside a Tokio runtime.
    pub fn run_streamed(
        agent: Arc<Agent>,
        input: impl Into<RunInput>,
        options: RunOptions,
    ) -> Result<RunResultStreaming> {
        options.run_config.validate()?;
        Ok(RunResultStreaming::start(agent, input.into(), options))
    }
}
