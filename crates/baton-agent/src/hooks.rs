//! Lifecycle hooks.
//!
//! [`RunHooks`] are supplied per run and observe every agent in it;
//! [`AgentHooks`] are bound to one agent and observe only that agent. The
//! two traits are deliberately distinct so one cannot be passed where the
//! other is expected.
//!
//! A hook that fails with a plain error is logged and the run goes on; a
//! hook that returns an `AgentError` ends the run with that error.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use baton_core::error::{AgentError, Result};
use baton_core::items::{Item, ModelResponse};

use crate::agent::Agent;
use crate::context::RunContext;

/// Observer for every agent in a run.
#[async_trait]
pub trait RunHooks: Send + Sync {
    async fn on_agent_start(&self, _context: &RunContext, _agent: &Arc<Agent>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_agent_end(
        &self,
        _context: &RunContext,
        _agent: &Arc<Agent>,
        _output: &Value,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_handoff(
        &self,
        _context: &RunContext,
        _from_agent: &Arc<Agent>,
        _to_agent: &Arc<Agent>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_tool_start(&self, _context: &RunContext, _agent: &Arc<Agent>, _tool: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_tool_end(
        &self,
        _context: &RunContext,
        _agent: &Arc<Agent>,
        _tool: &str,
        _result: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_llm_start(
        &self,
        _context: &RunContext,
        _agent: &Arc<Agent>,
        _system_prompt: Option<&str>,
        _input: &[Item],
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_llm_end(
        &self,
        _context: &RunContext,
        _agent: &Arc<Agent>,
        _response: &ModelResponse,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Observer bound to a single agent.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    async fn on_start(&self, _context: &RunContext, _agent: &Arc<Agent>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_end(&self, _context: &RunContext, _agent: &Arc<Agent>, _output: &Value) -> anyhow::Result<()> {
        Ok(())
    }

    /// Fired on the agent being handed control. `source` is the agent
    /// handing off.
    async fn on_handoff(
        &self,
        _context: &RunContext,
        _agent: &Arc<Agent>,
        _source: &Arc<Agent>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_tool_start(&self, _context: &RunContext, _agent: &Arc<Agent>, _tool: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_tool_end(
        &self,
        _context: &RunContext,
        _agent: &Arc<Agent>,
        _tool: &str,
        _result: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_llm_start(
        &self,
        _context: &RunContext,
        _agent: &Arc<Agent>,
        _system_prompt: Option<&str>,
        _input: &[Item],
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_llm_end(
        &self,
        _context: &RunContext,
        _agent: &Arc<Agent>,
        _response: &ModelResponse,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Run hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRunHooks;

impl RunHooks for NoopRunHooks {}

/// Plain observer failures are logged and the run continues. An
/// [`AgentError`] returned by a hook is passed on and ends the run.
fn settle(event: &'static str, scope: &'static str, result: anyhow::Result<()>) -> Result<()> {
    let Err(err) = result else {
        return Ok(());
    };
    match err.downcast::<AgentError>() {
        Ok(err) => Err(err),
        Err(err) => {
            warn!(event, scope, error = %err, "Hook handler error, continuing");
            Ok(())
        }
    }
}

/// Fans each lifecycle event out to the run hooks, then the agent's hooks.
#[derive(Clone)]
pub(crate) struct HookDispatcher {
    run: Arc<dyn RunHooks>,
}

impl HookDispatcher {
    pub fn new(run: Arc<dyn RunHooks>) -> Self {
        Self { run }
    }

    pub async fn agent_start(&self, ctx: &RunContext, agent: &Arc<Agent>) -> Result<()> {
        settle("agent_start", "run", self.run.on_agent_start(ctx, agent).await)?;
        if let Some(hooks) = &agent.hooks {
            settle("agent_start", "agent", hooks.on_start(ctx, agent).await)?;
        }
        Ok(())
    }

    pub async fn agent_end(&self, ctx: &RunContext, agent: &Arc<Agent>, output: &Value) -> Result<()> {
        settle("agent_end", "run", self.run.on_agent_end(ctx, agent, output).await)?;
        if let Some(hooks) = &agent.hooks {
            settle("agent_end", "agent", hooks.on_end(ctx, agent, output).await)?;
        }
        Ok(())
    }

    pub async fn handoff(&self, ctx: &RunContext, from: &Arc<Agent>, to: &Arc<Agent>) -> Result<()> {
        settle("handoff", "run", self.run.on_handoff(ctx, from, to).await)?;
        if let Some(hooks) = &to.hooks {
            settle("handoff", "agent", hooks.on_handoff(ctx, to, from).await)?;
        }
        Ok(())
    }

    pub async fn tool_start(&self, ctx: &RunContext, agent: &Arc<Agent>, tool: &str) -> Result<()> {
        settle("tool_start", "run", self.run.on_tool_start(ctx, agent, tool).await)?;
        if let Some(hooks) = &agent.hooks {
            settle("tool_start", "agent", hooks.on_tool_start(ctx, agent, tool).await)?;
        }
        Ok(())
    }

    pub async fn tool_end(&self, ctx: &RunContext, agent: &Arc<Agent>, tool: &str, result: &str) -> Result<()> {
        settle("tool_end", "run", self.run.on_tool_end(ctx, agent, tool, result).await)?;
        if let Some(hooks) = &agent.hooks {
            settle("tool_end", "agent", hooks.on_tool_end(ctx, agent, tool, result).await)?;
        }
        Ok(())
    }

    pub async fn llm_start(
        &self,
        ctx: &RunContext,
        agent: &Arc<Agent>,
        system_prompt: Option<&str>,
        input: &[Item],
    ) -> Result<()> {
        settle(
            "llm_start",
            "run",
            self.run.on_llm_start(ctx, agent, system_prompt, input).await,
        )?;
        if let Some(hooks) = &agent.hooks {
            settle(
                "llm_start",
                "agent",
                hooks.on_llm_start(ctx, agent, system_prompt, input).await,
            )?;
        }
        Ok(())
    }

    pub async fn llm_end(&self, ctx: &RunContext, agent: &Arc<Agent>, response: &ModelResponse) -> Result<()> {
        settle("llm_end", "run", self.run.on_llm_end(ctx, agent, response).await)?;
        if let Some(hooks) = &agent.hooks {
            settle("llm_end", "agent", hooks.on_llm_end(ctx, agent, response).await)?;
        }
        Ok(())
    }
}
