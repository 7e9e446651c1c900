//! Handing control from one agent to another.

use serde_json::json;
use tracing::{info, warn};

use baton_core::error::Result;
use baton_core::items::{Item, RunInput};

use crate::handoff::HandoffInputData;
use crate::items::RunItem;
use crate::tool::ToolOutput;

use super::tools::GuardrailLog;
use super::turn::{NextStep, SingleTurnResult, ToolRunHandoff, TurnEnv};

const MULTIPLE_HANDOFFS_MESSAGE: &str = "Multiple handoffs detected, ignoring this one.";

/// Act on the first handoff in the response. Any others get an output
/// telling the model they were ignored.
pub(crate) async fn execute_handoffs(
    env: &TurnEnv<'_>,
    original_input: RunInput,
    pre_step_items: Vec<RunItem>,
    mut new_items: Vec<RunItem>,
    run: ToolRunHandoff,
    ignored: Vec<ToolRunHandoff>,
    log: GuardrailLog,
) -> Result<SingleTurnResult> {
    if !ignored.is_empty() {
        warn!(agent = %env.agent.name, count = ignored.len(), "Model requested several handoffs, using the first");
    }
    for extra in &ignored {
        new_items.push(RunItem::ToolCallOutput {
            agent: env.agent.clone(),
            raw: Item::function_call_output(extra.call.call_id.clone(), MULTIPLE_HANDOFFS_MESSAGE),
            output: ToolOutput::from(MULTIPLE_HANDOFFS_MESSAGE),
        });
    }

    let target = run.handoff.invoke(env.context.clone(), &run.call.arguments).await?;
    new_items.push(RunItem::HandoffOutput {
        agent: env.agent.clone(),
        raw: Item::function_call_output(run.call.call_id.clone(), json!({"assistant": target.name}).to_string()),
        source: env.agent.clone(),
        target: target.clone(),
    });
    info!(from = %env.agent.name, to = %target.name, "Handing off");
    env.hooks.handoff(env.context, env.agent, &target).await?;

    let filter = if run.handoff.is_realtime() {
        None
    } else {
        run.handoff
            .input_filter
            .as_ref()
            .or(env.config.handoff_input_filter.as_ref())
    };

    let turn_items = new_items.clone();
    let (original_input, generated) = match filter {
        Some(filter) => {
            let filtered = filter
                .apply(HandoffInputData {
                    input_history: original_input,
                    pre_handoff_items: pre_step_items,
                    new_items,
                    run_context: env.context.clone(),
                })
                .await?;
            let mut generated = filtered.pre_handoff_items;
            generated.extend(filtered.new_items);
            (filtered.input_history, generated)
        }
        None => {
            let mut generated = pre_step_items;
            generated.extend(new_items);
            (original_input, generated)
        }
    };

    Ok(SingleTurnResult {
        original_input,
        generated,
        turn_items,
        next_step: NextStep::Handoff(target),
        tool_input_guardrail_results: log.input,
        tool_output_guardrail_results: log.output,
    })
}
