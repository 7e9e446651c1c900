//! Computer-use tool.
//!
//! The model issues `computer_call` items (click, type, scroll, ...). Each
//! action is performed on a caller-supplied [`Computer`], after which a
//! screenshot is taken and returned to the model as a PNG data URL.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use tracing::{debug, warn};

use baton_core::items::ComputerAction;
use baton_providers::{ToolDefinition, ToolKind};

use crate::tool_guardrails::{ToolInputGuardrail, ToolOutputGuardrail};

#[async_trait]
pub trait Computer: Send + Sync {
    /// `browser`, `mac`, `windows`, or `linux`.
    fn environment(&self) -> &str;

    /// Display width and height in pixels.
    fn dimensions(&self) -> (u32, u32);

    async fn perform(&self, action: &ComputerAction) -> anyhow::Result<()>;

    /// PNG bytes of the current screen.
    async fn screenshot(&self) -> anyhow::Result<Vec<u8>>;
}

pub struct ComputerTool {
    computer: Arc<dyn Computer>,
    input_guardrails: Vec<ToolInputGuardrail>,
    output_guardrails: Vec<ToolOutputGuardrail>,
}

impl ComputerTool {
    pub const NAME: &'static str = "computer_use_preview";

    pub fn new(computer: Arc<dyn Computer>) -> Self {
        Self {
            computer,
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
        }
    }

    pub fn with_input_guardrail(mut self, guardrail: ToolInputGuardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: ToolOutputGuardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    pub fn input_guardrails(&self) -> &[ToolInputGuardrail] {
        &self.input_guardrails
    }

    pub fn output_guardrails(&self) -> &[ToolOutputGuardrail] {
        &self.output_guardrails
    }

    pub fn definition(&self) -> ToolDefinition {
        let (width, height) = self.computer.dimensions();
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: String::new(),
            parameters: Value::Null,
            strict: false,
            kind: ToolKind::Computer {
                environment: self.computer.environment().to_string(),
                display_width: width,
                display_height: height,
            },
        }
    }

    /// Perform `action` and return a screenshot data URL, or the failure
    /// as text.
    pub(crate) async fn run(&self, call_id: &str, action: &ComputerAction) -> String {
        debug!(call_id, "Performing computer action");
        let result = async {
            self.computer.perform(action).await?;
            self.computer.screenshot().await
        }
        .await;
        match result {
            Ok(png) => format!("data:image/png;base64,{}", STANDARD.encode(png)),
            Err(e) => {
                warn!(call_id, "Computer action failed");
                format!("Computer action failed: {e}")
            }
        }
    }
}
