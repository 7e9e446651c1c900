//! Guardrails wrapped around individual tool calls.
//!
//! An input guardrail sees the call before the tool body runs; an output
//! guardrail sees the tool's result. Each picks one of three behaviors:
//! let the call through, replace the content the model will see, or abort
//! the run with a tripwire error.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use baton_core::error::{AgentError, Result};

use crate::tool::{ToolContext, ToolOutput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolGuardrailBehavior {
    Allow,
    RejectContent { message: String },
    RaiseException,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolGuardrailFunctionOutput {
    pub output_info: Value,
    pub behavior: ToolGuardrailBehavior,
}

impl ToolGuardrailFunctionOutput {
    pub fn allow(output_info: Value) -> Self {
        Self {
            output_info,
            behavior: ToolGuardrailBehavior::Allow,
        }
    }

    pub fn reject_content(message: impl Into<String>, output_info: Value) -> Self {
        Self {
            output_info,
            behavior: ToolGuardrailBehavior::RejectContent {
                message: message.into(),
            },
        }
    }

    pub fn raise_exception(output_info: Value) -> Self {
        Self {
            output_info,
            behavior: ToolGuardrailBehavior::RaiseException,
        }
    }
}

#[derive(Clone)]
pub struct ToolInputGuardrailData {
    pub context: ToolContext,
}

#[derive(Clone)]
pub struct ToolOutputGuardrailData {
    pub context: ToolContext,
    pub output: ToolOutput,
}

#[derive(Debug, Clone)]
pub struct ToolInputGuardrailResult {
    pub guardrail_name: String,
    pub output: ToolGuardrailFunctionOutput,
}

#[derive(Debug, Clone)]
pub struct ToolOutputGuardrailResult {
    pub guardrail_name: String,
    pub output: ToolGuardrailFunctionOutput,
}

type InputFn = Arc<
    dyn Fn(ToolInputGuardrailData) -> BoxFuture<'static, anyhow::Result<ToolGuardrailFunctionOutput>>
        + Send
        + Sync,
>;
type OutputFn = Arc<
    dyn Fn(ToolOutputGuardrailData) -> BoxFuture<'static, anyhow::Result<ToolGuardrailFunctionOutput>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct ToolInputGuardrail {
    name: String,
    func: InputFn,
}

impl ToolInputGuardrail {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(ToolInputGuardrailData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ToolGuardrailFunctionOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |data| func(data).boxed()),
        }
    }

    /// Guardrail from a synchronous check.
    pub fn from_fn<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&ToolInputGuardrailData) -> ToolGuardrailFunctionOutput + Send + Sync + 'static,
    {
        Self::new(name, move |data| {
            let output = func(&data);
            async move { Ok(output) }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) async fn run(&self, data: ToolInputGuardrailData) -> Result<ToolInputGuardrailResult> {
        let output = (self.func)(data)
            .await
            .map_err(|e| AgentError::from_anyhow(e, AgentError::Other))?;
        Ok(ToolInputGuardrailResult {
            guardrail_name: self.name.clone(),
            output,
        })
    }
}

#[derive(Clone)]
pub struct ToolOutputGuardrail {
    name: String,
    func: OutputFn,
}

impl ToolOutputGuardrail {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(ToolOutputGuardrailData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ToolGuardrailFunctionOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |data| func(data).boxed()),
        }
    }

    pub fn from_fn<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&ToolOutputGuardrailData) -> ToolGuardrailFunctionOutput + Send + Sync + 'static,
    {
        Self::new(name, move |data| {
            let output = func(&data);
            async move { Ok(output) }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) async fn run(&self, data: ToolOutputGuardrailData) -> Result<ToolOutputGuardrailResult> {
        let output = (self.func)(data)
            .await
            .map_err(|e| AgentError::from_anyhow(e, AgentError::Other))?;
        Ok(ToolOutputGuardrailResult {
            guardrail_name: self.name.clone(),
            output,
        })
    }
}

/// Outcome of running every input guardrail of one call.
pub(crate) struct InputCheck {
    /// Replacement output when a guardrail rejected the call.
    pub rejection: Option<String>,
    pub results: Vec<ToolInputGuardrailResult>,
}

/// Run input guardrails in order. The first rejection short-circuits; a
/// `raise_exception` aborts with a tripwire error.
pub(crate) async fn check_input(
    guardrails: &[ToolInputGuardrail],
    context: &ToolContext,
) -> Result<InputCheck> {
    let mut results = Vec::with_capacity(guardrails.len());
    for guardrail in guardrails {
        let result = guardrail
            .run(ToolInputGuardrailData {
                context: context.clone(),
            })
            .await?;
        let behavior = result.output.behavior.clone();
        let output_info = result.output.output_info.clone();
        results.push(result);
        match behavior {
            ToolGuardrailBehavior::Allow => {}
            ToolGuardrailBehavior::RejectContent { message } => {
                return Ok(InputCheck {
                    rejection: Some(message),
                    results,
                });
            }
            ToolGuardrailBehavior::RaiseException => {
                return Err(AgentError::ToolInputGuardrailTripwireTriggered {
                    guardrail: guardrail.name().to_string(),
                    output_info,
                    run_data: None,
                });
            }
        }
    }
    Ok(InputCheck {
        rejection: None,
        results,
    })
}

/// Run output guardrails in order, returning the output the model will see.
pub(crate) async fn check_output(
    guardrails: &[ToolOutputGuardrail],
    context: &ToolContext,
    output: ToolOutput,
) -> Result<(ToolOutput, Vec<ToolOutputGuardrailResult>)> {
    let mut results = Vec::with_capacity(guardrails.len());
    for guardrail in guardrails {
        let result = guardrail
            .run(ToolOutputGuardrailData {
                context: context.clone(),
                output: output.clone(),
            })
            .await?;
        let behavior = result.output.behavior.clone();
        let output_info = result.output.output_info.clone();
        results.push(result);
        match behavior {
            ToolGuardrailBehavior::Allow => {}
            ToolGuardrailBehavior::RejectContent { message } => {
                return Ok((ToolOutput::Text(message), results));
            }
            ToolGuardrailBehavior::RaiseException => {
                return Err(AgentError::ToolOutputGuardrailTripwireTriggered {
                    guardrail: guardrail.name().to_string(),
                    output_info,
                    run_data: None,
                });
            }
        }
    }
    Ok((output, results))
}
