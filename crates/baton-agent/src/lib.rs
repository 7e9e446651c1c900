//! Agent run loop.
//!
//! An [`Agent`] is a model plus instructions, tools, guardrails, and
//! handoffs to other agents. The [`Runner`] drives it turn by turn: call the
//! model, run the tools it asked for, follow handoffs, and stop once a final
//! output is produced. Runs can be consumed in one shot or as a stream of
//! [`StreamEvent`]s with cooperative cancellation.

pub mod agent;
pub mod computer;
pub mod context;
pub mod filters;
pub mod guardrail;
pub mod handoff;
pub mod hooks;
pub mod items;
pub mod run;
mod schema;
pub mod shell;
pub mod tool;
pub mod tool_guardrails;

pub use agent::{
    Agent, AgentBuilder, AgentToolOptions, Instructions, ModelRef, OutputSchema, ToolUseBehavior,
    ToolsToFinalOutputResult,
};
pub use context::RunContext;
pub use guardrail::{GuardrailFunctionOutput, InputGuardrail, OutputGuardrail};
pub use handoff::{Handoff, HandoffInputData, HandoffInputFilter, OnHandoff};
pub use hooks::{AgentHooks, RunHooks};
pub use items::RunItem;
pub use run::{
    CallModelData, CallModelInputFilter, CancelMode, ModelInputData, RunConfig, RunOptions,
    RunResult, RunResultStreaming, Runner, StreamEvent,
};
pub use tool::{
    AgentTool, FunctionTool, FunctionToolResult, Tool, ToolContext, ToolOutput, ToolOutputFile,
    ToolOutputImage,
};
pub use tool_guardrails::{
    ToolGuardrailBehavior, ToolGuardrailFunctionOutput, ToolInputGuardrail, ToolOutputGuardrail,
};

pub use baton_core::error::{AgentError, Result};
