//! Ready-made handoff input filters.

use baton_core::items::{Item, RunInput};

use crate::handoff::{HandoffInputData, HandoffInputFilter};
use crate::items::RunItem;

fn is_tool_item(item: &Item) -> bool {
    matches!(
        item,
        Item::FunctionCall { .. }
            | Item::FunctionCallOutput { .. }
            | Item::LocalShellCall { .. }
            | Item::LocalShellCallOutput { .. }
            | Item::ComputerCall { .. }
            | Item::ComputerCallOutput { .. }
    )
}

fn keep_run_item(item: &RunItem) -> bool {
    !matches!(
        item,
        RunItem::ToolCall { .. }
            | RunItem::ToolCallOutput { .. }
            | RunItem::HandoffCall { .. }
            | RunItem::HandoffOutput { .. }
    )
}

/// Strip every tool call, tool output, and handoff item, so the next agent
/// sees only the conversation.
pub fn remove_all_tools(data: HandoffInputData) -> HandoffInputData {
    let input_history = match data.input_history {
        RunInput::Text(text) => RunInput::Text(text),
        RunInput::Items(items) => RunInput::Items(items.into_iter().filter(|i| !is_tool_item(i)).collect()),
    };
    HandoffInputData {
        input_history,
        pre_handoff_items: data.pre_handoff_items.into_iter().filter(keep_run_item).collect(),
        new_items: data.new_items.into_iter().filter(keep_run_item).collect(),
        run_context: data.run_context,
    }
}

/// [`remove_all_tools`] as a filter value.
pub fn remove_all_tools_filter() -> HandoffInputFilter {
    HandoffInputFilter::from_fn(remove_all_tools)
}
