//! Model tuning parameters.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Required,
    None,
    /// Force a specific tool by name.
    #[serde(untagged)]
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Truncation {
    Auto,
    Disabled,
}

/// Optional knobs passed through to the model. Every field is optional so
/// two settings objects can be layered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncation: Option<Truncation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_usage: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_headers: Option<HashMap<String, String>>,
}

impl ModelSettings {
    /// Layer `overrides` on top of `self`: each field set in `overrides`
    /// wins, unset fields keep the value from `self`.
    pub fn resolve(&self, overrides: Option<&ModelSettings>) -> ModelSettings {
        let Some(o) = overrides else {
            return self.clone();
        };
        ModelSettings {
            temperature: o.temperature.or(self.temperature),
            top_p: o.top_p.or(self.top_p),
            frequency_penalty: o.frequency_penalty.or(self.frequency_penalty),
            presence_penalty: o.presence_penalty.or(self.presence_penalty),
            tool_choice: o.tool_choice.clone().or_else(|| self.tool_choice.clone()),
            parallel_tool_calls: o.parallel_tool_calls.or(self.parallel_tool_calls),
            truncation: o.truncation.or(self.truncation),
            max_tokens: o.max_tokens.or(self.max_tokens),
            reasoning_effort: o.reasoning_effort.or(self.reasoning_effort),
            metadata: o.metadata.clone().or_else(|| self.metadata.clone()),
            store: o.store.or(self.store),
            include_usage: o.include_usage.or(self.include_usage),
            extra_body: o.extra_body.clone().or_else(|| self.extra_body.clone()),
            extra_headers: o.extra_headers.clone().or_else(|| self.extra_headers.clone()),
        }
    }
}
