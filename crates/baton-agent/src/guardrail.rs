//! Agent-level guardrails.
//!
//! Input guardrails check the original run input once, before the first
//! model call. Output guardrails check the final output once. A triggered
//! tripwire aborts the run.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use baton_core::error::{AgentError, Result};
use baton_core::items::RunInput;

use crate::agent::Agent;
use crate::context::RunContext;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailFunctionOutput {
    pub output_info: Value,
    pub tripwire_triggered: bool,
}

impl GuardrailFunctionOutput {
    pub fn pass(output_info: Value) -> Self {
        Self {
            output_info,
            tripwire_triggered: false,
        }
    }

    pub fn tripwire(output_info: Value) -> Self {
        Self {
            output_info,
            tripwire_triggered: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InputGuardrailResult {
    pub guardrail_name: String,
    pub output: GuardrailFunctionOutput,
}

#[derive(Debug, Clone)]
pub struct OutputGuardrailResult {
    pub guardrail_name: String,
    pub agent_name: String,
    pub agent_output: Value,
    pub output: GuardrailFunctionOutput,
}

impl InputGuardrailResult {
    pub fn tripped(&self) -> bool {
        self.output.tripwire_triggered
    }
}

impl OutputGuardrailResult {
    pub fn tripped(&self) -> bool {
        self.output.tripwire_triggered
    }
}

type InputFn = Arc<
    dyn Fn(Arc<RunContext>, Arc<Agent>, RunInput) -> BoxFuture<'static, anyhow::Result<GuardrailFunctionOutput>>
        + Send
        + Sync,
>;
type OutputFn = Arc<
    dyn Fn(Arc<RunContext>, Arc<Agent>, Value) -> BoxFuture<'static, anyhow::Result<GuardrailFunctionOutput>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct InputGuardrail {
    name: String,
    func: InputFn,
}

impl InputGuardrail {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Arc<RunContext>, Arc<Agent>, RunInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<GuardrailFunctionOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |ctx, agent, input| func(ctx, agent, input).boxed()),
        }
    }

    pub fn from_fn<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&RunContext, &Agent, &RunInput) -> GuardrailFunctionOutput + Send + Sync + 'static,
    {
        Self::new(name, move |ctx, agent, input| {
            let output = func(&ctx, &agent, &input);
            async move { Ok(output) }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) async fn run(
        &self,
        context: Arc<RunContext>,
        agent: Arc<Agent>,
        input: RunInput,
    ) -> Result<InputGuardrailResult> {
        let output = (self.func)(context, agent, input)
            .await
            .map_err(|e| AgentError::from_anyhow(e, AgentError::Other))?;
        Ok(InputGuardrailResult {
            guardrail_name: self.name.clone(),
            output,
        })
    }
}

#[derive(Clone)]
pub struct OutputGuardrail {
    name: String,
    func: OutputFn,
}

impl OutputGuardrail {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Arc<RunContext>, Arc<Agent>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<GuardrailFunctionOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |ctx, agent, output| func(ctx, agent, output).boxed()),
        }
    }

    pub fn from_fn<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&RunContext, &Agent, &Value) -> GuardrailFunctionOutput + Send + Sync + 'static,
    {
        Self::new(name, move |ctx, agent, output| {
            let result = func(&ctx, &agent, &output);
            async move { Ok(result) }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) async fn run(
        &self,
        context: Arc<RunContext>,
        agent: Arc<Agent>,
        agent_output: Value,
    ) -> Result<OutputGuardrailResult> {
        let output = (self.func)(context, agent.clone(), agent_output.clone())
            .await
            .map_err(|e| AgentError::from_anyhow(e, AgentError::Other))?;
        Ok(OutputGuardrailResult {
            guardrail_name: self.name.clone(),
            agent_name: agent.name.clone(),
            agent_output,
            output,
        })
    }
}
