//! Provider stream events.

use serde::{Deserialize, Serialize};

use baton_core::items::{Item, ModelResponse};

/// One event from a streaming model call, passed through to run consumers
/// verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ModelStreamEvent {
    #[serde(rename = "response.created")]
    ResponseCreated { response_id: Option<String> },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { output_index: usize, item: Item },

    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { output_index: usize, delta: String },

    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta { output_index: usize, delta: String },

    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningSummaryTextDelta { output_index: usize, delta: String },

    #[serde(rename = "response.output_item.done")]
    OutputItemDone { output_index: usize, item: Item },

    /// Terminal event carrying the assembled response.
    #[serde(rename = "response.completed")]
    ResponseCompleted { response: ModelResponse },
}

impl ModelStreamEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            ModelStreamEvent::ResponseCreated { .. } => "response.created",
            ModelStreamEvent::OutputItemAdded { .. } => "response.output_item.added",
            ModelStreamEvent::OutputTextDelta { .. } => "response.output_text.delta",
            ModelStreamEvent::FunctionCallArgumentsDelta { .. } => {
                "response.function_call_arguments.delta"
            }
            ModelStreamEvent::ReasoningSummaryTextDelta { .. } => {
                "response.reasoning_summary_text.delta"
            }
            ModelStreamEvent::OutputItemDone { .. } => "response.output_item.done",
            ModelStreamEvent::ResponseCompleted { .. } => "response.completed",
        }
    }
}

/// Replay a finished response as the event sequence a streaming provider
/// would have produced. Useful for models without native streaming.
pub fn response_events(response: &ModelResponse) -> Vec<ModelStreamEvent> {
    let mut events = vec![ModelStreamEvent::ResponseCreated {
        response_id: response.response_id.clone(),
    }];

    for (output_index, item) in response.output.iter().enumerate() {
        events.push(ModelStreamEvent::OutputItemAdded {
            output_index,
            item: item.clone(),
        });
        match item {
            Item::Message { .. } => {
                if let Some(delta) = item.text().filter(|t| !t.is_empty()) {
                    events.push(ModelStreamEvent::OutputTextDelta {
                        output_index,
                        delta,
                    });
                }
            }
            Item::FunctionCall { arguments, .. } if !arguments.is_empty() => {
                events.push(ModelStreamEvent::FunctionCallArgumentsDelta {
                    output_index,
                    delta: arguments.clone(),
                });
            }
            Item::Reasoning { summary, .. } => {
                for part in summary {
                    events.push(ModelStreamEvent::ReasoningSummaryTextDelta {
                        output_index,
                        delta: part.text.clone(),
                    });
                }
            }
            _ => {}
        }
        events.push(ModelStreamEvent::OutputItemDone {
            output_index,
            item: item.clone(),
        });
    }

    events.push(ModelStreamEvent::ResponseCompleted {
        response: response.clone(),
    });
    events
}
