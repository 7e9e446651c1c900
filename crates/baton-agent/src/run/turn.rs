//! One turn: sort a model response into run items, run what it asked for,
//! and decide what happens next.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use baton_core::error::{AgentError, Result};
use baton_core::items::{ComputerAction, Item, LocalShellAction, ModelResponse, RunInput};

use crate::agent::{Agent, ToolUseBehavior, ToolsToFinalOutputResult};
use crate::computer::ComputerTool;
use crate::context::RunContext;
use crate::handoff::Handoff;
use crate::hooks::HookDispatcher;
use crate::items::RunItem;
use crate::shell::LocalShellTool;
use crate::tool::{AgentTool, FunctionToolResult, Tool};
use crate::tool_guardrails::{ToolInputGuardrailResult, ToolOutputGuardrailResult};

use super::RunConfig;
use super::handoffs;
use super::tools::{self, GuardrailLog};

/// Borrowed run state every step of a turn needs.
pub(crate) struct TurnEnv<'a> {
    pub agent: &'a Arc<Agent>,
    pub context: &'a Arc<RunContext>,
    pub hooks: &'a HookDispatcher,
    pub config: &'a Arc<RunConfig>,
}

#[derive(Debug, Clone)]
pub(crate) struct FunctionCallData {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

pub(crate) struct ToolRunFunction {
    pub tool: Arc<dyn Tool>,
    pub call: FunctionCallData,
}

pub(crate) struct ToolRunHandoff {
    pub handoff: Handoff,
    pub call: FunctionCallData,
}

pub(crate) struct ToolRunComputerAction {
    pub tool: Arc<ComputerTool>,
    pub call_id: String,
    pub action: ComputerAction,
}

pub(crate) struct ToolRunLocalShellCall {
    pub tool: Arc<LocalShellTool>,
    pub call_id: String,
    pub action: LocalShellAction,
    pub raw: Item,
}

/// A model response sorted into run items and pending work.
#[derive(Default)]
pub(crate) struct ProcessedResponse {
    pub new_items: Vec<RunItem>,
    pub handoffs: Vec<ToolRunHandoff>,
    pub functions: Vec<ToolRunFunction>,
    pub computer_actions: Vec<ToolRunComputerAction>,
    pub local_shell_calls: Vec<ToolRunLocalShellCall>,
}

impl ProcessedResponse {
    pub fn has_tools_to_run(&self) -> bool {
        !self.functions.is_empty() || !self.computer_actions.is_empty() || !self.local_shell_calls.is_empty()
    }
}

pub(crate) enum NextStep {
    FinalOutput(Value),
    Handoff(Arc<Agent>),
    RunAgain,
}

pub(crate) struct SingleTurnResult {
    /// Input history, possibly rewritten by a handoff filter.
    pub original_input: RunInput,
    /// Everything generated so far, as the next agent will see it.
    pub generated: Vec<RunItem>,
    /// Items produced by this turn, before any filter.
    pub turn_items: Vec<RunItem>,
    pub next_step: NextStep,
    pub tool_input_guardrail_results: Vec<ToolInputGuardrailResult>,
    pub tool_output_guardrail_results: Vec<ToolOutputGuardrailResult>,
}

/// Sort the response's output against the tools and handoffs enabled right
/// now. A call naming something the agent does not have is a model error.
pub(crate) fn process_model_response(
    agent: &Arc<Agent>,
    tools: &[AgentTool],
    handoffs: &[Handoff],
    response: &ModelResponse,
) -> Result<ProcessedResponse> {
    let handoff_map: HashMap<&str, &Handoff> = handoffs.iter().map(|h| (h.tool_name.as_str(), h)).collect();
    let function_map: HashMap<&str, &Arc<dyn Tool>> = tools
        .iter()
        .filter_map(|t| match t {
            AgentTool::Function(tool) => Some((tool.name(), tool)),
            _ => None,
        })
        .collect();
    let computer = tools.iter().find_map(|t| match t {
        AgentTool::Computer(tool) => Some(tool.clone()),
        _ => None,
    });
    let shell = tools.iter().find_map(|t| match t {
        AgentTool::LocalShell(tool) => Some(tool.clone()),
        _ => None,
    });

    let mut processed = ProcessedResponse::default();
    for item in &response.output {
        match item {
            Item::Message { .. } => processed.new_items.push(RunItem::MessageOutput {
                agent: agent.clone(),
                raw: item.clone(),
            }),
            Item::Reasoning { .. } => processed.new_items.push(RunItem::Reasoning {
                agent: agent.clone(),
                raw: item.clone(),
            }),
            Item::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            } => {
                let call = FunctionCallData {
                    call_id: call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                };
                if let Some(handoff) = handoff_map.get(name.as_str()) {
                    processed.new_items.push(RunItem::HandoffCall {
                        agent: agent.clone(),
                        raw: item.clone(),
                    });
                    processed.handoffs.push(ToolRunHandoff {
                        handoff: (*handoff).clone(),
                        call,
                    });
                } else if let Some(tool) = function_map.get(name.as_str()) {
                    processed.new_items.push(RunItem::ToolCall {
                        agent: agent.clone(),
                        raw: item.clone(),
                    });
                    processed.functions.push(ToolRunFunction {
                        tool: (*tool).clone(),
                        call,
                    });
                } else {
                    return Err(AgentError::ModelBehavior(format!(
                        "Tool {name} not found in agent {}",
                        agent.name
                    )));
                }
            }
            Item::ComputerCall { call_id, action, .. } => {
                let Some(tool) = &computer else {
                    return Err(AgentError::ModelBehavior(format!(
                        "Model produced computer action without a computer tool in agent {}",
                        agent.name
                    )));
                };
                processed.new_items.push(RunItem::ToolCall {
                    agent: agent.clone(),
                    raw: item.clone(),
                });
                processed.computer_actions.push(ToolRunComputerAction {
                    tool: tool.clone(),
                    call_id: call_id.clone(),
                    action: action.clone(),
                });
            }
            Item::LocalShellCall { call_id, action, .. } => {
                let Some(tool) = &shell else {
                    return Err(AgentError::ModelBehavior(format!(
                        "Model produced local shell call without a local shell tool in agent {}",
                        agent.name
                    )));
                };
                processed.new_items.push(RunItem::ToolCall {
                    agent: agent.clone(),
                    raw: item.clone(),
                });
                processed.local_shell_calls.push(ToolRunLocalShellCall {
                    tool: tool.clone(),
                    call_id: call_id.clone(),
                    action: action.clone(),
                    raw: item.clone(),
                });
            }
            other => warn!(kind = other.kind(), "Ignoring unexpected item in model output"),
        }
    }
    Ok(processed)
}

/// Run the turn's tools and handoffs and decide the next step.
pub(crate) async fn execute_tools_and_side_effects(
    env: &TurnEnv<'_>,
    original_input: RunInput,
    pre_step_items: Vec<RunItem>,
    processed: ProcessedResponse,
) -> Result<SingleTurnResult> {
    let ran_tools = processed.has_tools_to_run();
    let ProcessedResponse {
        mut new_items,
        handoffs: handoff_runs,
        functions,
        computer_actions,
        local_shell_calls,
    } = processed;

    let mut log = GuardrailLog::default();
    let (function_results, function_log) = tools::execute_function_tool_calls(env, &functions).await?;
    log.extend(function_log);
    new_items.extend(function_results.iter().map(|r| r.run_item.clone()));

    let (computer_items, computer_log) = tools::execute_computer_actions(env, &computer_actions).await?;
    log.extend(computer_log);
    new_items.extend(computer_items);

    let (shell_items, shell_log) = tools::execute_local_shell_calls(env, &local_shell_calls).await?;
    log.extend(shell_log);
    new_items.extend(shell_items);

    let mut handoff_runs = handoff_runs.into_iter();
    if let Some(first) = handoff_runs.next() {
        let ignored = handoff_runs.collect();
        return handoffs::execute_handoffs(env, original_input, pre_step_items, new_items, first, ignored, log).await;
    }

    let next_step = decide_next_step(env, &function_results, &new_items, ran_tools).await?;
    if let NextStep::FinalOutput(output) = &next_step {
        env.hooks.agent_end(env.context, env.agent, output).await?;
    }

    let mut generated = pre_step_items;
    generated.extend(new_items.iter().cloned());
    Ok(SingleTurnResult {
        original_input,
        generated,
        turn_items: new_items,
        next_step,
        tool_input_guardrail_results: log.input,
        tool_output_guardrail_results: log.output,
    })
}

async fn decide_next_step(
    env: &TurnEnv<'_>,
    function_results: &[FunctionToolResult],
    new_items: &[RunItem],
    ran_tools: bool,
) -> Result<NextStep> {
    let from_tools = tools_to_final_output(env, function_results).await?;
    if from_tools.is_final_output {
        debug!(agent = %env.agent.name, "Tool output is the final output");
        return Ok(NextStep::FinalOutput(from_tools.final_output.unwrap_or(Value::Null)));
    }

    let text = new_items.iter().rev().find_map(|item| match item {
        RunItem::MessageOutput { raw, .. } => raw.last_output_text(),
        _ => None,
    });
    match &env.agent.output_type {
        Some(schema) => match text {
            Some(text) => Ok(NextStep::FinalOutput(schema.validate_json(&text)?)),
            None => Ok(NextStep::RunAgain),
        },
        None if !ran_tools => Ok(NextStep::FinalOutput(Value::String(text.unwrap_or_default()))),
        None => Ok(NextStep::RunAgain),
    }
}

async fn tools_to_final_output(
    env: &TurnEnv<'_>,
    results: &[FunctionToolResult],
) -> Result<ToolsToFinalOutputResult> {
    if results.is_empty() {
        return Ok(ToolsToFinalOutputResult::run_again());
    }
    match &env.agent.tool_use_behavior {
        ToolUseBehavior::RunLlmAgain => Ok(ToolsToFinalOutputResult::run_again()),
        ToolUseBehavior::StopOnFirstTool => Ok(ToolsToFinalOutputResult::final_output(results[0].output.to_value())),
        ToolUseBehavior::StopAtTools(names) => Ok(results
            .iter()
            .find(|r| names.iter().any(|n| n == r.tool.name()))
            .map(|r| ToolsToFinalOutputResult::final_output(r.output.to_value()))
            .unwrap_or_else(ToolsToFinalOutputResult::run_again)),
        ToolUseBehavior::Custom(func) => func(env.context.clone(), results.to_vec())
            .await
            .map_err(|e| AgentError::from_anyhow(e, AgentError::Other)),
    }
}
