//! Provider-shaped conversation items.
//!
//! These are the raw payloads exchanged with a model: what goes into a
//! request as history and what comes back as output. The runner wraps them
//! in richer run items that remember which agent produced them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::usage::Usage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Developer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText {
        text: String,
    },
    OutputText {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        annotations: Vec<Value>,
    },
    Refusal {
        refusal: String,
    },
    InputImage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    InputFile {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// Payload of a function call output: plain text, or a list of input
/// parts when a tool returns images or files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionOutput {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl From<String> for FunctionOutput {
    fn from(text: String) -> Self {
        FunctionOutput::Text(text)
    }
}

impl From<&str> for FunctionOutput {
    fn from(text: &str) -> Self {
        FunctionOutput::Text(text.to_string())
    }
}

impl From<Vec<ContentPart>> for FunctionOutput {
    fn from(parts: Vec<ContentPart>) -> Self {
        FunctionOutput::Parts(parts)
    }
}

impl PartialEq<str> for FunctionOutput {
    fn eq(&self, other: &str) -> bool {
        matches!(self, FunctionOutput::Text(text) if text == other)
    }
}

impl PartialEq<&str> for FunctionOutput {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningSummary {
    pub text: String,
}

/// Command a model asks the local shell tool to run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalShellAction {
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<std::collections::HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Wheel,
    Back,
    Forward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

/// A single computer-use action issued by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComputerAction {
    Click { x: i64, y: i64, button: MouseButton },
    DoubleClick { x: i64, y: i64 },
    Drag { path: Vec<Point> },
    Keypress { keys: Vec<String> },
    Move { x: i64, y: i64 },
    Screenshot,
    Scroll { x: i64, y: i64, scroll_x: i64, scroll_y: i64 },
    Type { text: String },
    Wait,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Item {
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        role: Role,
        content: MessageContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    FunctionCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: FunctionOutput,
    },
    Reasoning {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default)]
        summary: Vec<ReasoningSummary>,
    },
    LocalShellCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        action: LocalShellAction,
    },
    LocalShellCallOutput {
        call_id: String,
        output: String,
    },
    ComputerCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        action: ComputerAction,
    },
    ComputerCallOutput {
        call_id: String,
        output: String,
    },
}

impl Item {
    pub fn user_message(text: impl Into<String>) -> Self {
        Item::Message {
            id: None,
            role: Role::User,
            content: MessageContent::Text(text.into()),
            status: None,
        }
    }

    pub fn assistant_message(text: impl Into<String>) -> Self {
        Item::Message {
            id: None,
            role: Role::Assistant,
            content: MessageContent::Parts(vec![ContentPart::OutputText {
                text: text.into(),
                annotations: Vec::new(),
            }]),
            status: Some("completed".into()),
        }
    }

    pub fn function_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Item::FunctionCall {
            id: None,
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn function_call_output(
        call_id: impl Into<String>,
        output: impl Into<FunctionOutput>,
    ) -> Self {
        Item::FunctionCallOutput {
            call_id: call_id.into(),
            output: output.into(),
        }
    }

    /// Wire name of the item's `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Item::Message { .. } => "message",
            Item::FunctionCall { .. } => "function_call",
            Item::FunctionCallOutput { .. } => "function_call_output",
            Item::Reasoning { .. } => "reasoning",
            Item::LocalShellCall { .. } => "local_shell_call",
            Item::LocalShellCallOutput { .. } => "local_shell_call_output",
            Item::ComputerCall { .. } => "computer_call",
            Item::ComputerCallOutput { .. } => "computer_call_output",
        }
    }

    /// Call id for tool calls and tool outputs.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Item::FunctionCall { call_id, .. }
            | Item::FunctionCallOutput { call_id, .. }
            | Item::LocalShellCall { call_id, .. }
            | Item::LocalShellCallOutput { call_id, .. }
            | Item::ComputerCall { call_id, .. }
            | Item::ComputerCallOutput { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    /// Concatenated text of a message. `None` for non-message items.
    pub fn text(&self) -> Option<String> {
        let Item::Message { content, .. } = self else {
            return None;
        };
        Some(match content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::InputText { text } | ContentPart::OutputText { text, .. } => {
                        Some(text.as_str())
                    }
                    _ => None,
                })
                .collect(),
        })
    }

    /// Text of the last output-text part of an assistant message, the
    /// candidate for a run's final output.
    pub fn last_output_text(&self) -> Option<String> {
        let Item::Message { content, role, .. } = self else {
            return None;
        };
        if *role != Role::Assistant {
            return None;
        }
        match content {
            MessageContent::Text(text) => Some(text.clone()),
            MessageContent::Parts(parts) => parts.iter().rev().find_map(|p| match p {
                ContentPart::OutputText { text, .. } => Some(text.clone()),
                _ => None,
            }),
        }
    }
}

/// Input handed to a run: either a plain user string or a list of items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunInput {
    Text(String),
    Items(Vec<Item>),
}

impl RunInput {
    pub fn to_items(&self) -> Vec<Item> {
        match self {
            RunInput::Text(text) => vec![Item::user_message(text.clone())],
            RunInput::Items(items) => items.clone(),
        }
    }
}

impl Default for RunInput {
    fn default() -> Self {
        RunInput::Items(Vec::new())
    }
}

impl From<&str> for RunInput {
    fn from(text: &str) -> Self {
        RunInput::Text(text.to_string())
    }
}

impl From<String> for RunInput {
    fn from(text: String) -> Self {
        RunInput::Text(text)
    }
}

impl From<Vec<Item>> for RunInput {
    fn from(items: Vec<Item>) -> Self {
        RunInput::Items(items)
    }
}

/// Result of one non-streaming model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub output: Vec<Item>,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}
