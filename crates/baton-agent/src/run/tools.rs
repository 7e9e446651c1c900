//! Tool execution for one turn.
//!
//! Every call goes through the same envelope: input guardrails, then the
//! `on_tool_start` hook, the tool itself, the `on_tool_end` hook, and output
//! guardrails. Function calls in one response run concurrently; computer and
//! shell actions run one after another since they drive a single machine.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{Instrument, debug, debug_span};

use baton_core::error::{AgentError, Result};
use baton_core::items::Item;

use crate::tool::{FunctionToolResult, ToolContext, ToolOutput};
use crate::tool_guardrails::{self, ToolInputGuardrail, ToolInputGuardrailResult, ToolOutputGuardrail, ToolOutputGuardrailResult};
use crate::items::RunItem;
use crate::shell::LocalShellCommandRequest;

use super::turn::{ToolRunComputerAction, ToolRunFunction, ToolRunLocalShellCall, TurnEnv};

/// Guardrail results collected while running a turn's tools.
#[derive(Debug, Default)]
pub(crate) struct GuardrailLog {
    pub input: Vec<ToolInputGuardrailResult>,
    pub output: Vec<ToolOutputGuardrailResult>,
}

impl GuardrailLog {
    pub fn extend(&mut self, other: GuardrailLog) {
        self.input.extend(other.input);
        self.output.extend(other.output);
    }
}

/// Parse model-supplied arguments. Empty means no arguments.
pub(crate) fn parse_arguments(tool: &str, arguments: &str) -> Result<Value> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(arguments)
        .map_err(|e| AgentError::ModelBehavior(format!("Invalid JSON input for tool {tool}: {e}")))
}

/// Run one call inside the guardrail and hook envelope. `invoke` is only
/// polled when every input guardrail allows the call.
async fn run_guarded<Fut>(
    env: &TurnEnv<'_>,
    tool_ctx: &ToolContext,
    input_guardrails: &[ToolInputGuardrail],
    output_guardrails: &[ToolOutputGuardrail],
    invoke: Fut,
) -> Result<(ToolOutput, GuardrailLog)>
where
    Fut: Future<Output = Result<ToolOutput>>,
{
    let mut log = GuardrailLog::default();
    let check = tool_guardrails::check_input(input_guardrails, tool_ctx).await?;
    log.input = check.results;
    if let Some(message) = check.rejection {
        debug!(tool = %tool_ctx.tool_name, "Tool call rejected by input guardrail");
        return Ok((ToolOutput::Text(message), log));
    }

    env.hooks.tool_start(env.context, env.agent, &tool_ctx.tool_name).await?;
    let output = invoke.await?;
    env.hooks
        .tool_end(env.context, env.agent, &tool_ctx.tool_name, &output.to_string())
        .await?;

    let (output, results) = tool_guardrails::check_output(output_guardrails, tool_ctx, output).await?;
    log.output = results;
    Ok((output, log))
}

fn tool_context(env: &TurnEnv<'_>, tool_name: &str, call_id: &str, arguments: String) -> ToolContext {
    ToolContext {
        run_context: env.context.clone(),
        agent: env.agent.clone(),
        tool_name: tool_name.to_string(),
        call_id: call_id.to_string(),
        arguments,
        run_config: env.config.clone(),
    }
}

async fn run_function_call(env: &TurnEnv<'_>, run: &ToolRunFunction) -> Result<(FunctionToolResult, GuardrailLog)> {
    let call = &run.call;
    let tool_ctx = tool_context(env, &call.name, &call.call_id, call.arguments.clone());
    if env.config.trace_include_sensitive_data {
        debug!(tool = %call.name, arguments = %call.arguments, "Executing tool");
    } else {
        debug!(tool = %call.name, "Executing tool");
    }

    let invoke = async {
        let params = parse_arguments(&call.name, &call.arguments)?;
        run.tool.execute(params, &tool_ctx).await.map_err(|e| {
            AgentError::from_anyhow(e, |source| AgentError::Tool {
                tool: call.name.clone(),
                source,
            })
        })
    };
    let (output, log) = run_guarded(
        env,
        &tool_ctx,
        run.tool.input_guardrails(),
        run.tool.output_guardrails(),
        invoke,
    )
    .await?;

    let run_item = RunItem::ToolCallOutput {
        agent: env.agent.clone(),
        raw: Item::function_call_output(call.call_id.clone(), output.to_function_output()),
        output: output.clone(),
    };
    Ok((
        FunctionToolResult {
            tool: run.tool.clone(),
            output,
            run_item,
        },
        log,
    ))
}

/// Run every function call concurrently. Results keep the model's order.
///
/// A failing call does not cancel its siblings: every call runs to
/// completion, then the first error in the model's order is returned.
pub(crate) async fn execute_function_tool_calls(
    env: &TurnEnv<'_>,
    runs: &[ToolRunFunction],
) -> Result<(Vec<FunctionToolResult>, GuardrailLog)> {
    let calls = runs.iter().map(move |run| {
        let span = debug_span!("function_tool", tool = %run.call.name, call_id = %run.call.call_id);
        run_function_call(env, run).instrument(span)
    });
    let outcomes = join_all(calls).await;

    let mut results = Vec::with_capacity(outcomes.len());
    let mut log = GuardrailLog::default();
    for outcome in outcomes {
        let (result, call_log) = outcome?;
        results.push(result);
        log.extend(call_log);
    }
    Ok((results, log))
}

pub(crate) async fn execute_computer_actions(
    env: &TurnEnv<'_>,
    runs: &[ToolRunComputerAction],
) -> Result<(Vec<RunItem>, GuardrailLog)> {
    let mut items = Vec::with_capacity(runs.len());
    let mut log = GuardrailLog::default();
    for run in runs {
        let arguments = serde_json::to_string(&run.action)?;
        let tool_ctx = tool_context(env, crate::computer::ComputerTool::NAME, &run.call_id, arguments);
        let invoke = async { Ok(ToolOutput::Text(run.tool.run(&run.call_id, &run.action).await)) };
        let (output, call_log) = run_guarded(
            env,
            &tool_ctx,
            run.tool.input_guardrails(),
            run.tool.output_guardrails(),
            invoke,
        )
        .await?;
        log.extend(call_log);
        items.push(RunItem::ToolCallOutput {
            agent: env.agent.clone(),
            raw: Item::ComputerCallOutput {
                call_id: run.call_id.clone(),
                output: output.to_string(),
            },
            output,
        });
    }
    Ok((items, log))
}

pub(crate) async fn execute_local_shell_calls(
    env: &TurnEnv<'_>,
    runs: &[ToolRunLocalShellCall],
) -> Result<(Vec<RunItem>, GuardrailLog)> {
    let mut items = Vec::with_capacity(runs.len());
    let mut log = GuardrailLog::default();
    for run in runs {
        let arguments = serde_json::to_string(&run.action)?;
        let tool_ctx = tool_context(env, crate::shell::LocalShellTool::NAME, &run.call_id, arguments);
        let request = LocalShellCommandRequest {
            context: Arc::clone(env.context),
            call_id: run.call_id.clone(),
            action: run.action.clone(),
            data: run.raw.clone(),
        };
        let invoke = async { Ok(ToolOutput::Text(run.tool.run(&request).await)) };
        let (output, call_log) = run_guarded(
            env,
            &tool_ctx,
            run.tool.input_guardrails(),
            run.tool.output_guardrails(),
            invoke,
        )
        .await?;
        log.extend(call_log);
        items.push(RunItem::ToolCallOutput {
            agent: env.agent.clone(),
            raw: Item::LocalShellCallOutput {
                call_id: run.call_id.clone(),
                output: output.to_string(),
            },
            output,
        });
    }
    Ok((items, log))
}
