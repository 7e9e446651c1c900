//! Builds the item list sent to the model each turn.
//!
//! With no server-side state the full history goes out every call. When
//! the provider keeps the history (a conversation id or a chained previous
//! response id), only the items it has not seen are sent: the original
//! input on the first call, then whatever the runner synthesized since the
//! last successful call. Items the model itself produced are never echoed
//! back.
//!
//! Sent items are remembered by value rather than by position, since a
//! handoff filter may rewrite the generated history between calls.

use baton_core::items::{Item, ModelResponse, RunInput};

use crate::items::RunItem;

use super::RunConfig;

#[derive(Debug, Clone, PartialEq)]
enum HistoryMode {
    Full,
    Conversation { id: String },
    PreviousResponse { id: Option<String> },
}

#[derive(Debug)]
pub(crate) struct InputAssembler {
    mode: HistoryMode,
    /// Whether a model call has succeeded yet.
    delivered_input: bool,
    /// Generated items the server already holds.
    sent: Vec<Item>,
}

impl InputAssembler {
    pub fn new(config: &RunConfig) -> Self {
        let mode = if let Some(id) = &config.conversation_id {
            HistoryMode::Conversation { id: id.clone() }
        } else if let Some(id) = &config.previous_response_id {
            HistoryMode::PreviousResponse { id: Some(id.clone()) }
        } else {
            HistoryMode::Full
        };
        Self {
            mode,
            delivered_input: false,
            sent: Vec::new(),
        }
    }

    pub fn assemble(&self, original_input: &RunInput, generated: &[RunItem]) -> Vec<Item> {
        if self.mode == HistoryMode::Full {
            let mut items = original_input.to_items();
            items.extend(generated.iter().map(RunItem::to_input_item));
            return items;
        }

        let mut items = if self.delivered_input {
            Vec::new()
        } else {
            original_input.to_items()
        };
        items.extend(
            generated
                .iter()
                .filter(|item| !item.is_model_output())
                .map(RunItem::to_input_item)
                .filter(|item| !self.sent.contains(item)),
        );
        items
    }

    /// Record a successful call that was assembled from `generated`.
    pub fn mark_sent(&mut self, generated: &[RunItem], response: &ModelResponse) {
        self.delivered_input = true;
        if self.mode != HistoryMode::Full {
            for item in generated.iter().filter(|item| !item.is_model_output()) {
                let item = item.to_input_item();
                if !self.sent.contains(&item) {
                    self.sent.push(item);
                }
            }
        }
        if let HistoryMode::PreviousResponse { id } = &mut self.mode {
            if let Some(new_id) = &response.response_id {
                *id = Some(new_id.clone());
            }
        }
    }

    pub fn previous_response_id(&self) -> Option<String> {
        match &self.mode {
            HistoryMode::PreviousResponse { id } => id.clone(),
            _ => None,
        }
    }

    pub fn conversation_id(&self) -> Option<String> {
        match &self.mode {
            HistoryMode::Conversation { id } => Some(id.clone()),
            _ => None,
        }
    }
}
