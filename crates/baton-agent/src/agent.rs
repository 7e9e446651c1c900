//! Agent definitions.
//!
//! An agent is read-mostly: it is built once and can be shared across
//! concurrent runs. The tool and handoff lists are the exception; they can
//! be appended to while a run is in progress. Clones share those lists.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};

use baton_core::config::DEFAULT_MAX_TURNS;
use baton_core::error::{AgentError, Result};
use baton_core::session::Session;
use baton_core::settings::ModelSettings;
use baton_providers::{Model, OutputSchemaDefinition};

use crate::context::RunContext;
use crate::guardrail::{InputGuardrail, OutputGuardrail};
use crate::handoff::Handoff;
use crate::hooks::{AgentHooks, NoopRunHooks, RunHooks};
use crate::run::{RunConfig, RunOptions, Runner};
use crate::schema;
use crate::tool::{AgentTool, FunctionTool, FunctionToolResult, ToolContext};

type InstructionsFn =
    Arc<dyn Fn(Arc<RunContext>, Arc<Agent>) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

/// System prompt, fixed or computed per turn.
#[derive(Clone)]
pub enum Instructions {
    Static(String),
    Dynamic(InstructionsFn),
}

impl Instructions {
    pub fn dynamic<F, Fut>(func: F) -> Self
    where
        F: Fn(Arc<RunContext>, Arc<Agent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        Instructions::Dynamic(Arc::new(move |ctx, agent| func(ctx, agent).boxed()))
    }
}

impl From<&str> for Instructions {
    fn from(text: &str) -> Self {
        Instructions::Static(text.to_string())
    }
}

impl From<String> for Instructions {
    fn from(text: String) -> Self {
        Instructions::Static(text)
    }
}

/// A model by name, resolved through the run's provider, or a ready
/// instance.
#[derive(Clone)]
pub enum ModelRef {
    Name(String),
    Instance(Arc<dyn Model>),
}

impl ModelRef {
    pub fn instance<M: Model + 'static>(model: Arc<M>) -> Self {
        ModelRef::Instance(model)
    }
}

impl From<&str> for ModelRef {
    fn from(name: &str) -> Self {
        ModelRef::Name(name.to_string())
    }
}

impl From<String> for ModelRef {
    fn from(name: String) -> Self {
        ModelRef::Name(name)
    }
}

impl From<Arc<dyn Model>> for ModelRef {
    fn from(model: Arc<dyn Model>) -> Self {
        ModelRef::Instance(model)
    }
}

impl fmt::Debug for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRef::Name(name) => f.debug_tuple("Name").field(name).finish(),
            ModelRef::Instance(_) => f.write_str("Instance(..)"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolsToFinalOutputResult {
    pub is_final_output: bool,
    pub final_output: Option<Value>,
}

impl ToolsToFinalOutputResult {
    pub fn final_output(output: Value) -> Self {
        Self {
            is_final_output: true,
            final_output: Some(output),
        }
    }

    pub fn run_again() -> Self {
        Self::default()
    }
}

type ToolsToFinalOutputFn = Arc<
    dyn Fn(Arc<RunContext>, Vec<FunctionToolResult>) -> BoxFuture<'static, anyhow::Result<ToolsToFinalOutputResult>>
        + Send
        + Sync,
>;

/// What to do after function tools run.
#[derive(Clone, Default)]
pub enum ToolUseBehavior {
    /// Feed tool outputs back to the model.
    #[default]
    RunLlmAgain,
    /// The first tool call's output is the final output.
    StopOnFirstTool,
    /// Stop when any of these tools ran; its output is the final output.
    StopAtTools(Vec<String>),
    Custom(ToolsToFinalOutputFn),
}

impl ToolUseBehavior {
    pub fn custom<F, Fut>(func: F) -> Self
    where
        F: Fn(Arc<RunContext>, Vec<FunctionToolResult>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ToolsToFinalOutputResult>> + Send + 'static,
    {
        ToolUseBehavior::Custom(Arc::new(move |ctx, results| func(ctx, results).boxed()))
    }
}

impl fmt::Debug for ToolUseBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolUseBehavior::RunLlmAgain => f.write_str("RunLlmAgain"),
            ToolUseBehavior::StopOnFirstTool => f.write_str("StopOnFirstTool"),
            ToolUseBehavior::StopAtTools(names) => f.debug_tuple("StopAtTools").field(names).finish(),
            ToolUseBehavior::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Structured output an agent must produce, described by a JSON Schema.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Result<Self> {
        schema::check_schema(&schema).map_err(AgentError::User)?;
        Ok(Self {
            name: name.into(),
            schema,
            strict: true,
        })
    }

    pub fn non_strict(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Parse the model's text output and validate it.
    pub fn validate_json(&self, text: &str) -> Result<Value> {
        let value: Value = serde_json::from_str(text).map_err(|e| {
            AgentError::ModelBehavior(format!("Invalid JSON when parsing output for {}: {e}", self.name))
        })?;
        schema::validate(&self.schema, &value).map_err(|e| {
            AgentError::ModelBehavior(format!("Output for {} does not match its schema: {e}", self.name))
        })?;
        Ok(value)
    }

    pub(crate) fn definition(&self) -> OutputSchemaDefinition {
        OutputSchemaDefinition {
            name: self.name.clone(),
            schema: self.schema.clone(),
            strict: self.strict,
        }
    }
}

/// How an agent exposed through [`Agent::as_tool_with`] runs.
#[derive(Clone, Default)]
pub struct AgentToolOptions {
    /// Config of the nested run. Without one, the nested run keeps the
    /// calling run's provider, default model and tracing settings.
    pub run_config: Option<RunConfig>,
    pub max_turns: Option<u32>,
    pub hooks: Option<Arc<dyn RunHooks>>,
    pub session: Option<Arc<dyn Session>>,
}

#[derive(Clone)]
pub struct Agent {
    pub name: String,
    /// Shown to other agents in the default handoff description.
    pub handoff_description: Option<String>,
    pub instructions: Option<Instructions>,
    pub model: Option<ModelRef>,
    pub model_settings: ModelSettings,
    pub input_guardrails: Vec<InputGuardrail>,
    pub output_guardrails: Vec<OutputGuardrail>,
    /// Plain text output when `None`.
    pub output_type: Option<OutputSchema>,
    pub hooks: Option<Arc<dyn AgentHooks>>,
    pub tool_use_behavior: ToolUseBehavior,
    tools: Arc<RwLock<Vec<AgentTool>>>,
    handoffs: Arc<RwLock<Vec<Handoff>>>,
}

impl Agent {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    /// Copy of this agent with `edit` applied. The copy shares the tool
    /// and handoff lists, so tools added to either are seen by both.
    pub fn clone_with(&self, edit: impl FnOnce(&mut Agent)) -> Arc<Agent> {
        let mut agent = self.clone();
        edit(&mut agent);
        Arc::new(agent)
    }

    /// Snapshot of the tool list.
    pub fn tools(&self) -> Vec<AgentTool> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Append a tool. Safe to call while a run is using this agent; the
    /// tool becomes callable from the next model response on.
    pub fn add_tool(&self, tool: impl Into<AgentTool>) {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tool.into());
    }

    pub fn handoffs(&self) -> Vec<Handoff> {
        self.handoffs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Append a handoff. This is how two agents hand off to each other.
    pub fn add_handoff(&self, handoff: impl Into<Handoff>) {
        self.handoffs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handoff.into());
    }

    pub async fn enabled_tools(self: &Arc<Self>, context: &Arc<RunContext>) -> Vec<AgentTool> {
        self.keep_enabled(self.tools(), context).await
    }

    pub(crate) async fn keep_enabled(
        self: &Arc<Self>,
        tools: Vec<AgentTool>,
        context: &Arc<RunContext>,
    ) -> Vec<AgentTool> {
        let mut enabled = Vec::new();
        for tool in tools {
            if tool.is_enabled(context, self).await {
                enabled.push(tool);
            }
        }
        enabled
    }

    pub async fn enabled_handoffs(self: &Arc<Self>, context: &Arc<RunContext>) -> Vec<Handoff> {
        let mut enabled = Vec::new();
        for handoff in self.handoffs() {
            if handoff.is_enabled(context, self).await {
                enabled.push(handoff);
            }
        }
        enabled
    }

    pub async fn system_prompt(self: &Arc<Self>, context: &Arc<RunContext>) -> Result<Option<String>> {
        match &self.instructions {
            None => Ok(None),
            Some(Instructions::Static(text)) => Ok(Some(text.clone())),
            Some(Instructions::Dynamic(func)) => func(context.clone(), self.clone())
                .await
                .map(Some)
                .map_err(|e| AgentError::from_anyhow(e, AgentError::Other)),
        }
    }

    /// Expose this agent as a tool. The tool runs a nested run with the
    /// model's `input` and returns the nested final output as text.
    pub fn as_tool(self: &Arc<Self>, tool_name: impl Into<String>, description: impl Into<String>) -> FunctionTool {
        self.as_tool_with(tool_name, description, AgentToolOptions::default())
    }

    pub fn as_tool_with(
        self: &Arc<Self>,
        tool_name: impl Into<String>,
        description: impl Into<String>,
        options: AgentToolOptions,
    ) -> FunctionTool {
        #[derive(Deserialize)]
        struct AgentToolInput {
            input: String,
        }

        let agent = self.clone();
        let parameters = json!({
            "type": "object",
            "properties": {
                "input": {"type": "string", "description": "The input to the agent."}
            },
            "required": ["input"],
            "additionalProperties": false
        });
        FunctionTool::typed(tool_name, description, parameters, move |ctx: ToolContext, args: AgentToolInput| {
            let agent = agent.clone();
            let options = options.clone();
            async move {
                let run_config = options
                    .run_config
                    .unwrap_or_else(|| nested_run_config(&ctx.run_config));
                let options = RunOptions {
                    context: Arc::new(ctx.run_context.child()),
                    hooks: options.hooks.unwrap_or_else(|| Arc::new(NoopRunHooks)),
                    session: options.session,
                    max_turns: options.max_turns.unwrap_or(DEFAULT_MAX_TURNS),
                    run_config,
                };
                let result = Runner::run(agent, args.input, options).await?;
                Ok(result.final_output_text())
            }
        })
    }
}

/// What a nested agent-as-tool run inherits from the run that called it.
fn nested_run_config(parent: &RunConfig) -> RunConfig {
    RunConfig {
        model_provider: parent.model_provider.clone(),
        default_model: parent.default_model.clone(),
        tracing_disabled: parent.tracing_disabled,
        trace_include_sensitive_data: parent.trace_include_sensitive_data,
        workflow_name: parent.workflow_name.clone(),
        ..RunConfig::default()
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("tools", &self.tools())
            .field("handoffs", &self.handoffs())
            .field("output_type", &self.output_type.as_ref().map(|o| &o.name))
            .field("tool_use_behavior", &self.tool_use_behavior)
            .finish()
    }
}

pub struct AgentBuilder {
    name: String,
    handoff_description: Option<String>,
    instructions: Option<Instructions>,
    model: Option<ModelRef>,
    model_settings: ModelSettings,
    tools: Vec<AgentTool>,
    handoffs: Vec<Handoff>,
    input_guardrails: Vec<InputGuardrail>,
    output_guardrails: Vec<OutputGuardrail>,
    output_type: Option<OutputSchema>,
    hooks: Option<Arc<dyn AgentHooks>>,
    tool_use_behavior: ToolUseBehavior,
}

impl AgentBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handoff_description: None,
            instructions: None,
            model: None,
            model_settings: ModelSettings::default(),
            tools: Vec::new(),
            handoffs: Vec::new(),
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            output_type: None,
            hooks: None,
            tool_use_behavior: ToolUseBehavior::default(),
        }
    }

    pub fn instructions(mut self, instructions: impl Into<Instructions>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn handoff_description(mut self, description: impl Into<String>) -> Self {
        self.handoff_description = Some(description.into());
        self
    }

    pub fn model(mut self, model: impl Into<ModelRef>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = settings;
        self
    }

    pub fn tool(mut self, tool: impl Into<AgentTool>) -> Self {
        self.tools.push(tool.into());
        self
    }

    pub fn handoff(mut self, handoff: impl Into<Handoff>) -> Self {
        self.handoffs.push(handoff.into());
        self
    }

    pub fn input_guardrail(mut self, guardrail: InputGuardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn output_guardrail(mut self, guardrail: OutputGuardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    pub fn output_type(mut self, schema: OutputSchema) -> Self {
        self.output_type = Some(schema);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn AgentHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn tool_use_behavior(mut self, behavior: ToolUseBehavior) -> Self {
        self.tool_use_behavior = behavior;
        self
    }

    pub fn build(self) -> Arc<Agent> {
        Arc::new(Agent {
            name: self.name,
            handoff_description: self.handoff_description,
            instructions: self.instructions,
            model: self.model,
            model_settings: self.model_settings,
            input_guardrails: self.input_guardrails,
            output_guardrails: self.output_guardrails,
            output_type: self.output_type,
            hooks: self.hooks,
            tool_use_behavior: self.tool_use_behavior,
            tools: Arc::new(RwLock::new(self.tools)),
            handoffs: Arc::new(RwLock::new(self.handoffs)),
        })
    }
}
