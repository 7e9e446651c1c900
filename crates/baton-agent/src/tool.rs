//! Tools an agent can call.
//!
//! Function tools implement [`Tool`]. Hosted-style tools with a side effect
//! owned by the caller (local shell, computer use) are separate kinds that
//! share the same guardrail and hook envelope; [`AgentTool`] is the closed
//! set the runner dispatches over.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use baton_core::error::AgentError;
use baton_core::items::{ContentPart, FunctionOutput};
use baton_providers::{ToolDefinition, ToolKind};

use crate::agent::Agent;
use crate::computer::ComputerTool;
use crate::context::RunContext;
use crate::items::RunItem;
use crate::run::RunConfig;
use crate::shell::LocalShellTool;
use crate::tool_guardrails::{ToolInputGuardrail, ToolOutputGuardrail};

/// Context provided to tools during execution.
#[derive(Clone)]
pub struct ToolContext {
    pub run_context: Arc<RunContext>,
    pub agent: Arc<Agent>,
    pub tool_name: String,
    pub call_id: String,
    /// Raw JSON arguments as the model sent them.
    pub arguments: String,
    /// Config of the run making the call. Nested runs start from it.
    pub run_config: Arc<RunConfig>,
}

/// Output from a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Text(String),
    Structured(Value),
    Image(ToolOutputImage),
    File(ToolOutputFile),
    /// Several outputs sent to the model as one list of input parts.
    List(Vec<ToolOutput>),
}

/// Image returned by a tool, by URL (a data URL works) or uploaded file id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "image")]
pub struct ToolOutputImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ToolOutputImage {
    pub fn url(image_url: impl Into<String>) -> Self {
        Self {
            image_url: Some(image_url.into()),
            ..Self::default()
        }
    }

    pub fn file(file_id: impl Into<String>) -> Self {
        Self {
            file_id: Some(file_id.into()),
            ..Self::default()
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// File returned by a tool: inline base64 data, a URL, or an uploaded file id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "file")]
pub struct ToolOutputFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl ToolOutputFile {
    pub fn data(file_data: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            file_data: Some(file_data.into()),
            filename: Some(filename.into()),
            ..Self::default()
        }
    }

    pub fn url(file_url: impl Into<String>) -> Self {
        Self {
            file_url: Some(file_url.into()),
            ..Self::default()
        }
    }

    pub fn id(file_id: impl Into<String>) -> Self {
        Self {
            file_id: Some(file_id.into()),
            ..Self::default()
        }
    }
}

impl ToolOutput {
    pub fn to_value(&self) -> Value {
        match self {
            ToolOutput::Text(text) => Value::String(text.clone()),
            ToolOutput::Structured(value) => value.clone(),
            rich => serde_json::to_value(rich).unwrap_or(Value::Null),
        }
    }

    /// Payload of the `function_call_output` item. Text and structured
    /// values stay a string; images and files become input parts.
    pub fn to_function_output(&self) -> FunctionOutput {
        match self {
            ToolOutput::Text(text) => FunctionOutput::Text(text.clone()),
            ToolOutput::Structured(value) => FunctionOutput::Text(value.to_string()),
            rich => {
                let mut parts = Vec::new();
                rich.push_parts(&mut parts);
                FunctionOutput::Parts(parts)
            }
        }
    }

    fn push_parts(&self, parts: &mut Vec<ContentPart>) {
        match self {
            ToolOutput::Text(text) => parts.push(ContentPart::InputText { text: text.clone() }),
            ToolOutput::Structured(value) => parts.push(ContentPart::InputText {
                text: value.to_string(),
            }),
            ToolOutput::Image(image) => parts.push(ContentPart::InputImage {
                image_url: image.image_url.clone(),
                file_id: image.file_id.clone(),
                detail: image.detail.clone(),
            }),
            ToolOutput::File(file) => parts.push(ContentPart::InputFile {
                file_data: file.file_data.clone(),
                file_url: file.file_url.clone(),
                file_id: file.file_id.clone(),
                filename: file.filename.clone(),
            }),
            ToolOutput::List(outputs) => {
                for output in outputs {
                    output.push_parts(parts);
                }
            }
        }
    }
}

/// The string the model sees. Rich outputs render as their JSON form.
impl fmt::Display for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolOutput::Text(text) => f.write_str(text),
            ToolOutput::Structured(value) => write!(f, "{value}"),
            rich => write!(f, "{}", rich.to_value()),
        }
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        ToolOutput::Text(text.to_string())
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        ToolOutput::Text(text)
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        ToolOutput::Structured(value)
    }
}

impl From<ToolOutputImage> for ToolOutput {
    fn from(image: ToolOutputImage) -> Self {
        ToolOutput::Image(image)
    }
}

impl From<ToolOutputFile> for ToolOutput {
    fn from(file: ToolOutputFile) -> Self {
        ToolOutput::File(file)
    }
}

impl From<Vec<ToolOutput>> for ToolOutput {
    fn from(outputs: Vec<ToolOutput>) -> Self {
        ToolOutput::List(outputs)
    }
}

/// The core tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as exposed to the model.
    fn name(&self) -> &str;

    /// Human-readable description for the model.
    fn description(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> Value;

    fn strict_schema(&self) -> bool {
        true
    }

    /// Disabled tools are neither advertised nor callable.
    async fn is_enabled(&self, _context: &Arc<RunContext>, _agent: &Arc<Agent>) -> bool {
        true
    }

    fn input_guardrails(&self) -> &[ToolInputGuardrail] {
        &[]
    }

    fn output_guardrails(&self) -> &[ToolOutputGuardrail] {
        &[]
    }

    /// Execute the tool with already-parsed JSON arguments.
    async fn execute(&self, params: Value, context: &ToolContext) -> anyhow::Result<ToolOutput>;
}

type ToolFn =
    Arc<dyn Fn(ToolContext, Value) -> BoxFuture<'static, anyhow::Result<ToolOutput>> + Send + Sync>;
type EnabledFn = Arc<dyn Fn(Arc<RunContext>, Arc<Agent>) -> BoxFuture<'static, bool> + Send + Sync>;
type ErrorFormatter = Arc<dyn Fn(&ToolContext, &anyhow::Error) -> String + Send + Sync>;

/// Static or per-run enablement, shared by tools and handoffs.
#[derive(Clone)]
pub(crate) enum Enabled {
    Always(bool),
    When(EnabledFn),
}

impl Enabled {
    pub(crate) fn when<F, Fut>(predicate: F) -> Self
    where
        F: Fn(Arc<RunContext>, Arc<Agent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Enabled::When(Arc::new(move |ctx, agent| predicate(ctx, agent).boxed()))
    }

    pub(crate) async fn check(&self, context: &Arc<RunContext>, agent: &Arc<Agent>) -> bool {
        match self {
            Enabled::Always(enabled) => *enabled,
            Enabled::When(predicate) => predicate(context.clone(), agent.clone()).await,
        }
    }
}

fn default_error_formatter(_context: &ToolContext, err: &anyhow::Error) -> String {
    format!("An error occurred while running the tool. Please try again. Error: {err}")
}

/// A tool backed by a closure.
///
/// By default a failing body is reported to the model as text; call
/// [`FunctionTool::raise_errors`] to abort the run instead. Errors that are
/// already an [`AgentError`] always propagate.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
    strict: bool,
    func: ToolFn,
    enabled: Enabled,
    input_guardrails: Vec<ToolInputGuardrail>,
    output_guardrails: Vec<ToolOutputGuardrail>,
    on_error: Option<ErrorFormatter>,
}

impl FunctionTool {
    pub fn new<F, Fut, O>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        func: F,
    ) -> Self
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
        O: Into<ToolOutput> + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            strict: true,
            func: Arc::new(move |ctx, params| func(ctx, params).map(|r| r.map(Into::into)).boxed()),
            enabled: Enabled::Always(true),
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            on_error: Some(Arc::new(default_error_formatter)),
        }
    }

    pub fn from_sync<F, O>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        func: F,
    ) -> Self
    where
        F: Fn(&ToolContext, Value) -> anyhow::Result<O> + Send + Sync + 'static,
        O: Into<ToolOutput> + Send + 'static,
    {
        Self::new(name, description, parameters, move |ctx, params| {
            let result = func(&ctx, params);
            async move { result }
        })
    }

    /// Tool whose arguments deserialize into `A`. Arguments that don't fit
    /// are a model behavior error.
    pub fn typed<A, F, Fut, O>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        func: F,
    ) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(ToolContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
        O: Into<ToolOutput> + 'static,
    {
        let func = Arc::new(func);
        Self::new(name, description, parameters, move |ctx: ToolContext, params| {
            let func = func.clone();
            async move {
                let args: A = serde_json::from_value(params).map_err(|e| {
                    AgentError::ModelBehavior(format!(
                        "Invalid JSON input for tool {}: {e}",
                        ctx.tool_name
                    ))
                })?;
                func(ctx, args).await
            }
        })
    }

    /// Advertise the schema as non-strict.
    pub fn non_strict(mut self) -> Self {
        self.strict = false;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Enabled::Always(enabled);
        self
    }

    /// Decide enablement per run from the context and the owning agent.
    pub fn enabled_when<F, Fut>(mut self, predicate: F) -> Self
    where
        F: Fn(Arc<RunContext>, Arc<Agent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.enabled = Enabled::when(predicate);
        self
    }

    pub fn with_input_guardrail(mut self, guardrail: ToolInputGuardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: ToolOutputGuardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    /// Propagate body failures instead of reporting them to the model.
    pub fn raise_errors(mut self) -> Self {
        self.on_error = None;
        self
    }

    /// Custom text reported to the model when the body fails.
    pub fn with_error_formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&ToolContext, &anyhow::Error) -> String + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(formatter));
        self
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    fn strict_schema(&self) -> bool {
        self.strict
    }

    async fn is_enabled(&self, context: &Arc<RunContext>, agent: &Arc<Agent>) -> bool {
        self.enabled.check(context, agent).await
    }

    fn input_guardrails(&self) -> &[ToolInputGuardrail] {
        &self.input_guardrails
    }

    fn output_guardrails(&self) -> &[ToolOutputGuardrail] {
        &self.output_guardrails
    }

    async fn execute(&self, params: Value, context: &ToolContext) -> anyhow::Result<ToolOutput> {
        let err = match (self.func)(context.clone(), params).await {
            Ok(output) => return Ok(output),
            Err(err) => err,
        };
        if err.downcast_ref::<AgentError>().is_some() {
            return Err(err);
        }
        match &self.on_error {
            Some(formatter) => {
                warn!(tool = %self.name, "Tool failed, reporting error to the model");
                Ok(ToolOutput::Text(formatter(context, &err)))
            }
            None => Err(err),
        }
    }
}

/// Every kind of tool an agent can carry.
#[derive(Clone)]
pub enum AgentTool {
    Function(Arc<dyn Tool>),
    LocalShell(Arc<LocalShellTool>),
    Computer(Arc<ComputerTool>),
}

impl AgentTool {
    pub fn name(&self) -> &str {
        match self {
            AgentTool::Function(tool) => tool.name(),
            AgentTool::LocalShell(_) => LocalShellTool::NAME,
            AgentTool::Computer(_) => ComputerTool::NAME,
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        match self {
            AgentTool::Function(tool) => ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
                strict: tool.strict_schema(),
                kind: ToolKind::Function,
            },
            AgentTool::LocalShell(_) => ToolDefinition {
                name: LocalShellTool::NAME.to_string(),
                description: String::new(),
                parameters: Value::Null,
                strict: false,
                kind: ToolKind::LocalShell,
            },
            AgentTool::Computer(tool) => tool.definition(),
        }
    }

    pub async fn is_enabled(&self, context: &Arc<RunContext>, agent: &Arc<Agent>) -> bool {
        match self {
            AgentTool::Function(tool) => tool.is_enabled(context, agent).await,
            AgentTool::LocalShell(_) | AgentTool::Computer(_) => true,
        }
    }

    pub fn input_guardrails(&self) -> &[ToolInputGuardrail] {
        match self {
            AgentTool::Function(tool) => tool.input_guardrails(),
            AgentTool::LocalShell(tool) => tool.input_guardrails(),
            AgentTool::Computer(tool) => tool.input_guardrails(),
        }
    }

    pub fn output_guardrails(&self) -> &[ToolOutputGuardrail] {
        match self {
            AgentTool::Function(tool) => tool.output_guardrails(),
            AgentTool::LocalShell(tool) => tool.output_guardrails(),
            AgentTool::Computer(tool) => tool.output_guardrails(),
        }
    }
}

impl fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AgentTool").field(&self.name()).finish()
    }
}

impl From<FunctionTool> for AgentTool {
    fn from(tool: FunctionTool) -> Self {
        AgentTool::Function(Arc::new(tool))
    }
}

impl From<Arc<dyn Tool>> for AgentTool {
    fn from(tool: Arc<dyn Tool>) -> Self {
        AgentTool::Function(tool)
    }
}

impl From<LocalShellTool> for AgentTool {
    fn from(tool: LocalShellTool) -> Self {
        AgentTool::LocalShell(Arc::new(tool))
    }
}

impl From<ComputerTool> for AgentTool {
    fn from(tool: ComputerTool) -> Self {
        AgentTool::Computer(Arc::new(tool))
    }
}

/// Result of one function tool call, as seen by the tool-use behavior.
#[derive(Clone)]
pub struct FunctionToolResult {
    pub tool: Arc<dyn Tool>,
    pub output: ToolOutput,
    pub run_item: RunItem,
}

impl fmt::Debug for FunctionToolResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionToolResult")
            .field("tool", &self.tool.name())
            .field("output", &self.output)
            .finish()
    }
}
