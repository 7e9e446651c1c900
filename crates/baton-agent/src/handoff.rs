//! Handoffs: transferring control of a run to another agent.
//!
//! A handoff is advertised to the model as a tool. When the model calls it,
//! the runner validates the payload, runs the `on_handoff` callback, applies
//! the input filter to the history, and makes the target the current agent.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use baton_core::error::{AgentError, Result};
use baton_core::items::RunInput;
use baton_providers::{ToolDefinition, ToolKind};

use crate::agent::Agent;
use crate::context::RunContext;
use crate::items::RunItem;
use crate::schema;
use crate::tool::Enabled;

/// History handed to the next agent.
#[derive(Clone, Debug)]
pub struct HandoffInputData {
    /// Input items from before this run's generated items.
    pub input_history: RunInput,
    /// Items generated before the turn in which the handoff happened.
    pub pre_handoff_items: Vec<RunItem>,
    /// Items generated in the handoff turn, including the handoff call and
    /// its output.
    pub new_items: Vec<RunItem>,
    pub run_context: Arc<RunContext>,
}

type FilterFn =
    Arc<dyn Fn(HandoffInputData) -> BoxFuture<'static, anyhow::Result<HandoffInputData>> + Send + Sync>;

/// Rewrites the history the next agent sees.
#[derive(Clone)]
pub struct HandoffInputFilter(FilterFn);

impl HandoffInputFilter {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(HandoffInputData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HandoffInputData>> + Send + 'static,
    {
        Self(Arc::new(move |data| func(data).boxed()))
    }

    pub fn from_fn<F>(func: F) -> Self
    where
        F: Fn(HandoffInputData) -> HandoffInputData + Send + Sync + 'static,
    {
        Self::new(move |data| {
            let filtered = func(data);
            async move { Ok(filtered) }
        })
    }

    /// Filter failures are caller misconfiguration.
    pub(crate) async fn apply(&self, data: HandoffInputData) -> Result<HandoffInputData> {
        (self.0)(data).await.map_err(|e| {
            AgentError::from_anyhow(e, |e| AgentError::User(format!("Handoff input filter failed: {e}")))
        })
    }
}

impl fmt::Debug for HandoffInputFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HandoffInputFilter")
    }
}

type ContextFn = Arc<dyn Fn(Arc<RunContext>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type InputFn = Arc<dyn Fn(Arc<RunContext>, Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Callback run when a handoff is invoked. Takes the context alone, or the
/// context plus the model's payload when the handoff declares an input type.
#[derive(Clone)]
pub enum OnHandoff {
    Context(ContextFn),
    WithInput(InputFn),
}

impl OnHandoff {
    pub fn context<F, Fut>(func: F) -> Self
    where
        F: Fn(Arc<RunContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        OnHandoff::Context(Arc::new(move |ctx| func(ctx).boxed()))
    }

    pub fn with_input<F, Fut>(func: F) -> Self
    where
        F: Fn(Arc<RunContext>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        OnHandoff::WithInput(Arc::new(move |ctx, input| func(ctx, input).boxed()))
    }

    /// Callback whose payload deserializes into `T`.
    pub fn typed<T, F, Fut>(func: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(Arc<RunContext>, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let func = Arc::new(func);
        Self::with_input(move |ctx, input| {
            let func = func.clone();
            async move {
                let payload: T = serde_json::from_value(input)
                    .map_err(|e| AgentError::ModelBehavior(format!("Invalid handoff input: {e}")))?;
                func(ctx, payload).await
            }
        })
    }
}

/// Tool name for handing off to `agent_name`: `transfer_to_` plus the name
/// in snake case.
pub fn default_tool_name(agent_name: &str) -> String {
    let snake: String = agent_name
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("transfer_to_{snake}")
}

pub fn default_tool_description(agent: &Agent) -> String {
    format!(
        "Handoff to the {} agent to handle the request. {}",
        agent.name,
        agent.handoff_description.as_deref().unwrap_or("")
    )
}

fn empty_object_schema() -> Value {
    json!({
        "type": "object",
        "properties": {},
        "additionalProperties": false,
        "required": []
    })
}

#[derive(Clone)]
pub struct Handoff {
    pub tool_name: String,
    pub tool_description: String,
    pub input_json_schema: Value,
    pub agent_name: String,
    pub strict_json_schema: bool,
    /// Always `None` for realtime handoffs.
    pub input_filter: Option<HandoffInputFilter>,
    agent: Arc<Agent>,
    on_handoff: Option<OnHandoff>,
    has_input_type: bool,
    enabled: Enabled,
    realtime: bool,
}

impl Handoff {
    pub fn builder(agent: Arc<Agent>) -> HandoffBuilder {
        HandoffBuilder::new(agent)
    }

    /// Handoff for realtime agents. These never accept an input filter.
    pub fn realtime(agent: Arc<Agent>) -> RealtimeHandoffBuilder {
        RealtimeHandoffBuilder {
            inner: HandoffBuilder {
                realtime: true,
                ..HandoffBuilder::new(agent)
            },
        }
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn is_realtime(&self) -> bool {
        self.realtime
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.tool_name.clone(),
            description: self.tool_description.clone(),
            parameters: self.input_json_schema.clone(),
            strict: self.strict_json_schema,
            kind: ToolKind::Function,
        }
    }

    pub async fn is_enabled(&self, context: &Arc<RunContext>, agent: &Arc<Agent>) -> bool {
        self.enabled.check(context, agent).await
    }

    /// Validate the model's payload, run `on_handoff`, and return the agent
    /// that takes over.
    pub(crate) async fn invoke(&self, context: Arc<RunContext>, arguments: &str) -> Result<Arc<Agent>> {
        let payload = if self.has_input_type {
            if arguments.trim().is_empty() {
                return Err(AgentError::ModelBehavior(format!(
                    "Handoff {} expected a JSON payload but got none",
                    self.tool_name
                )));
            }
            let value: Value = serde_json::from_str(arguments).map_err(|e| {
                AgentError::ModelBehavior(format!("Invalid JSON input for handoff {}: {e}", self.tool_name))
            })?;
            schema::validate(&self.input_json_schema, &value).map_err(|e| {
                AgentError::ModelBehavior(format!("Invalid input for handoff {}: {e}", self.tool_name))
            })?;
            Some(value)
        } else {
            None
        };

        let outcome = match (&self.on_handoff, payload) {
            (Some(OnHandoff::Context(func)), _) => func(context).await,
            (Some(OnHandoff::WithInput(func)), Some(value)) => func(context, value).await,
            // Rejected at construction.
            (Some(OnHandoff::WithInput(_)), None) | (None, _) => Ok(()),
        };
        outcome.map_err(|e| AgentError::from_anyhow(e, AgentError::Other))?;
        Ok(self.agent.clone())
    }
}

impl fmt::Debug for Handoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff")
            .field("tool_name", &self.tool_name)
            .field("agent_name", &self.agent_name)
            .field("realtime", &self.realtime)
            .finish()
    }
}

impl From<Arc<Agent>> for Handoff {
    fn from(agent: Arc<Agent>) -> Self {
        HandoffBuilder::new(agent).assemble()
    }
}

pub struct HandoffBuilder {
    agent: Arc<Agent>,
    tool_name: Option<String>,
    tool_description: Option<String>,
    on_handoff: Option<OnHandoff>,
    input_type: Option<Value>,
    input_filter: Option<HandoffInputFilter>,
    enabled: Enabled,
    realtime: bool,
}

impl HandoffBuilder {
    fn new(agent: Arc<Agent>) -> Self {
        Self {
            agent,
            tool_name: None,
            tool_description: None,
            on_handoff: None,
            input_type: None,
            input_filter: None,
            enabled: Enabled::Always(true),
            realtime: false,
        }
    }

    pub fn tool_name_override(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    pub fn tool_description_override(mut self, description: impl Into<String>) -> Self {
        self.tool_description = Some(description.into());
        self
    }

    pub fn on_handoff(mut self, callback: OnHandoff) -> Self {
        self.on_handoff = Some(callback);
        self
    }

    /// JSON Schema of the payload the model must send with the handoff.
    pub fn input_type(mut self, schema: Value) -> Self {
        self.input_type = Some(schema);
        self
    }

    pub fn input_filter(mut self, filter: HandoffInputFilter) -> Self {
        self.input_filter = Some(filter);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Enabled::Always(enabled);
        self
    }

    pub fn enabled_when<F, Fut>(mut self, predicate: F) -> Self
    where
        F: Fn(Arc<RunContext>, Arc<Agent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.enabled = Enabled::when(predicate);
        self
    }

    /// Check that the callback shape matches the declared input type.
    pub fn build(self) -> Result<Handoff> {
        match (&self.on_handoff, &self.input_type) {
            (Some(OnHandoff::WithInput(_)), None) => {
                return Err(AgentError::User(
                    "on_handoff takes an input, so the handoff must declare an input_type".into(),
                ));
            }
            (Some(OnHandoff::Context(_)), Some(_)) => {
                return Err(AgentError::User(
                    "on_handoff must take both the context and the input when an input_type is declared".into(),
                ));
            }
            (None, Some(_)) => {
                return Err(AgentError::User(
                    "Provide both on_handoff and input_type, or neither".into(),
                ));
            }
            _ => {}
        }
        if let Some(schema) = &self.input_type {
            schema::check_schema(schema).map_err(AgentError::User)?;
        }
        Ok(self.assemble())
    }

    fn assemble(self) -> Handoff {
        let agent = self.agent;
        Handoff {
            tool_name: self.tool_name.unwrap_or_else(|| default_tool_name(&agent.name)),
            tool_description: self
                .tool_description
                .unwrap_or_else(|| default_tool_description(&agent)),
            has_input_type: self.input_type.is_some(),
            input_json_schema: self.input_type.unwrap_or_else(empty_object_schema),
            agent_name: agent.name.clone(),
            strict_json_schema: true,
            input_filter: if self.realtime { None } else { self.input_filter },
            on_handoff: self.on_handoff,
            enabled: self.enabled,
            realtime: self.realtime,
            agent,
        }
    }
}

/// Builder for realtime handoffs. It has no way to set an input filter.
pub struct RealtimeHandoffBuilder {
    inner: HandoffBuilder,
}

impl RealtimeHandoffBuilder {
    pub fn tool_name_override(self, name: impl Into<String>) -> Self {
        Self {
            inner: self.inner.tool_name_override(name),
        }
    }

    pub fn tool_description_override(self, description: impl Into<String>) -> Self {
        Self {
            inner: self.inner.tool_description_override(description),
        }
    }

    pub fn on_handoff(self, callback: OnHandoff) -> Self {
        Self {
            inner: self.inner.on_handoff(callback),
        }
    }

    pub fn input_type(self, schema: Value) -> Self {
        Self {
            inner: self.inner.input_type(schema),
        }
    }

    pub fn enabled(self, enabled: bool) -> Self {
        Self {
            inner: self.inner.enabled(enabled),
        }
    }

    pub fn build(self) -> Result<Handoff> {
        self.inner.build()
    }
}
