//! Model collaborator abstraction.
//!
//! A [`Model`] turns a [`ModelRequest`] into either a complete
//! [`ModelResponse`] or a stream of [`ModelStreamEvent`]s. A
//! [`ModelProvider`] resolves model names to instances.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use baton_core::items::{Item, ModelResponse};
use baton_core::settings::ModelSettings;

pub mod multi;
pub mod stream;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use multi::MultiProvider;
pub use stream::{ModelStreamEvent, response_events};

/// Kind of tool advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolKind {
    Function,
    LocalShell,
    Computer {
        environment: String,
        display_width: u32,
        display_height: u32,
    },
}

/// Tool definition sent with a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    #[serde(default)]
    pub strict: bool,
    pub kind: ToolKind,
}

/// Structured output the model is asked to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchemaDefinition {
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

/// How much of a request a model implementation may record in its own traces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTracing {
    Disabled,
    #[default]
    Enabled,
    EnabledWithoutData,
}

impl ModelTracing {
    pub fn from_flags(disabled: bool, include_data: bool) -> Self {
        match (disabled, include_data) {
            (true, _) => ModelTracing::Disabled,
            (false, true) => ModelTracing::Enabled,
            (false, false) => ModelTracing::EnabledWithoutData,
        }
    }

    pub fn include_data(self) -> bool {
        self == ModelTracing::Enabled
    }
}

/// Everything a model needs for one call.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub system_instructions: Option<String>,
    pub input: Vec<Item>,
    pub model_settings: ModelSettings,
    pub tools: Vec<ToolDefinition>,
    pub output_schema: Option<OutputSchemaDefinition>,
    pub handoffs: Vec<ToolDefinition>,
    pub tracing: ModelTracing,
    /// Server-side chaining pointer, set only in previous-response mode.
    pub previous_response_id: Option<String>,
    /// Server-side conversation, set only in conversation mode.
    pub conversation_id: Option<String>,
}

pub type ModelEventStream = Pin<Box<dyn Stream<Item = anyhow::Result<ModelStreamEvent>> + Send>>;

/// The model collaborator.
#[async_trait]
pub trait Model: Send + Sync {
    /// Complete a request in one shot.
    async fn get_response(&self, request: &ModelRequest) -> anyhow::Result<ModelResponse>;

    /// Stream a request. The stream must end with
    /// [`ModelStreamEvent::ResponseCompleted`] carrying the full response.
    async fn stream_response(&self, request: &ModelRequest) -> anyhow::Result<ModelEventStream>;
}

/// Resolves model names to instances. `None` asks for the provider default.
pub trait ModelProvider: Send + Sync {
    fn get_model(&self, name: Option<&str>) -> anyhow::Result<Arc<dyn Model>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_tracing_from_flags() {
        assert_eq!(ModelTracing::from_flags(true, true), ModelTracing::Disabled);
        assert_eq!(ModelTracing::from_flags(false, true), ModelTracing::Enabled);
        assert_eq!(
            ModelTracing::from_flags(false, false),
            ModelTracing::EnabledWithoutData
        );
        assert!(!ModelTracing::EnabledWithoutData.include_data());
    }

    #[test]
    fn test_tool_definition_serialization() {
        let def = ToolDefinition {
            name: "computer_use_preview".into(),
            description: String::new(),
            parameters: Value::Null,
            strict: false,
            kind: ToolKind::Computer {
                environment: "browser".into(),
                display_width: 1024,
                display_height: 768,
            },
        };
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["kind"]["type"], "computer");
        assert_eq!(value["kind"]["display_width"], 1024);
    }
}
