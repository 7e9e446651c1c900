//! Run items: provider items tagged with the agent that produced them.

use std::fmt;
use std::sync::Arc;

use baton_core::items::Item;

use crate::agent::Agent;
use crate::tool::ToolOutput;

/// One item generated during a run.
///
/// Every variant keeps the raw provider-shaped payload, so flattening a run
/// back into model input is lossless.
#[derive(Clone)]
pub enum RunItem {
    MessageOutput {
        agent: Arc<Agent>,
        raw: Item,
    },
    ToolCall {
        agent: Arc<Agent>,
        raw: Item,
    },
    ToolCallOutput {
        agent: Arc<Agent>,
        raw: Item,
        output: ToolOutput,
    },
    Reasoning {
        agent: Arc<Agent>,
        raw: Item,
    },
    HandoffCall {
        agent: Arc<Agent>,
        raw: Item,
    },
    HandoffOutput {
        agent: Arc<Agent>,
        raw: Item,
        source: Arc<Agent>,
        target: Arc<Agent>,
    },
}

impl RunItem {
    pub fn agent(&self) -> &Arc<Agent> {
        match self {
            RunItem::MessageOutput { agent, .. }
            | RunItem::ToolCall { agent, .. }
            | RunItem::ToolCallOutput { agent, .. }
            | RunItem::Reasoning { agent, .. }
            | RunItem::HandoffCall { agent, .. }
            | RunItem::HandoffOutput { agent, .. } => agent,
        }
    }

    pub fn raw(&self) -> &Item {
        match self {
            RunItem::MessageOutput { raw, .. }
            | RunItem::ToolCall { raw, .. }
            | RunItem::ToolCallOutput { raw, .. }
            | RunItem::Reasoning { raw, .. }
            | RunItem::HandoffCall { raw, .. }
            | RunItem::HandoffOutput { raw, .. } => raw,
        }
    }

    pub fn to_input_item(&self) -> Item {
        self.raw().clone()
    }

    /// Kind label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RunItem::MessageOutput { .. } => "message_output_item",
            RunItem::ToolCall { .. } => "tool_call_item",
            RunItem::ToolCallOutput { .. } => "tool_call_output_item",
            RunItem::Reasoning { .. } => "reasoning_item",
            RunItem::HandoffCall { .. } => "handoff_call_item",
            RunItem::HandoffOutput { .. } => "handoff_output_item",
        }
    }

    /// Whether this item came back from the model, as opposed to being
    /// synthesized by the runner.
    pub fn is_model_output(&self) -> bool {
        matches!(
            self,
            RunItem::MessageOutput { .. }
                | RunItem::ToolCall { .. }
                | RunItem::Reasoning { .. }
                | RunItem::HandoffCall { .. }
        )
    }

    /// Text of an assistant message item.
    pub fn text(&self) -> Option<String> {
        match self {
            RunItem::MessageOutput { raw, .. } => raw.last_output_text(),
            _ => None,
        }
    }
}

impl fmt::Debug for RunItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunItem")
            .field("kind", &self.kind())
            .field("agent", &self.agent().name)
            .field("raw", self.raw())
            .finish()
    }
}
