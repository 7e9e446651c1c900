//! The run loop.
//!
//! [`RunDriver`] owns all mutable state of one run: the input, the generated
//! items, raw responses, and guardrail results. Turns run strictly one after
//! another. When a [`StreamChannel`] is attached the driver also emits
//! events and publishes a snapshot after every turn.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::try_join_all;
use serde_json::Value;
use tokio_stream::StreamExt;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use uuid::Uuid;

use baton_core::error::{AgentError, Result, RunErrorDetails};
use baton_core::items::{ModelResponse, RunInput};
use baton_core::session::Session;
use baton_providers::{Model, ModelRequest, ModelStreamEvent, ModelTracing};

use crate::agent::{Agent, ModelRef, OutputSchema};
use crate::context::RunContext;
use crate::guardrail::{InputGuardrailResult, OutputGuardrailResult};
use crate::handoff::Handoff;
use crate::hooks::HookDispatcher;
use crate::items::RunItem;
use crate::tool::AgentTool;
use crate::tool_guardrails::{ToolInputGuardrailResult, ToolOutputGuardrailResult};

use super::input::InputAssembler;
use super::result::{RunResult, StreamState};
use super::streaming::{EventSink, StreamEvent};
use super::turn::{self, NextStep, TurnEnv};
use super::{CallModelData, ModelInputData, RunConfig, RunOptions};

/// Where a streamed run sends its events and snapshots.
pub(crate) struct StreamChannel {
    pub sink: EventSink,
    pub state: Arc<Mutex<StreamState>>,
}

pub(crate) struct RunDriver {
    starting_agent: Arc<Agent>,
    original_input: RunInput,
    context: Arc<RunContext>,
    hooks: HookDispatcher,
    session: Option<Arc<dyn Session>>,
    max_turns: u32,
    config: Arc<RunConfig>,
    generated: Vec<RunItem>,
    raw_responses: Vec<ModelResponse>,
    input_guardrail_results: Vec<InputGuardrailResult>,
    output_guardrail_results: Vec<OutputGuardrailResult>,
    tool_input_guardrail_results: Vec<ToolInputGuardrailResult>,
    tool_output_guardrail_results: Vec<ToolOutputGuardrailResult>,
    assembler: InputAssembler,
    stream: Option<StreamChannel>,
    current_turn: u32,
}

impl RunDriver {
    pub fn new(agent: Arc<Agent>, input: RunInput, options: RunOptions, stream: Option<StreamChannel>) -> Self {
        let assembler = InputAssembler::new(&options.run_config);
        Self {
            starting_agent: agent,
            original_input: input,
            context: options.context,
            hooks: HookDispatcher::new(options.hooks),
            session: options.session,
            max_turns: options.max_turns,
            config: Arc::new(options.run_config),
            generated: Vec::new(),
            raw_responses: Vec::new(),
            input_guardrail_results: Vec::new(),
            output_guardrail_results: Vec::new(),
            tool_input_guardrail_results: Vec::new(),
            tool_output_guardrail_results: Vec::new(),
            assembler,
            stream,
            current_turn: 0,
        }
    }

    pub async fn run(self) -> Result<RunResult> {
        let span = if self.config.tracing_disabled {
            Span::none()
        } else {
            info_span!(
                "agent_run",
                run_id = %Uuid::new_v4(),
                workflow = %self.config.workflow_name,
                agent = %self.starting_agent.name,
            )
        };
        self.drive().instrument(span).await
    }

    async fn drive(mut self) -> Result<RunResult> {
        self.prepare_session().await?;

        let mut current = self.starting_agent.clone();
        let mut agent_changed = true;
        loop {
            if self.cancel_mode_immediate() {
                debug!("Run cancelled before next turn");
                return Ok(self.finish(Value::Null, current));
            }
            if agent_changed {
                agent_changed = false;
                self.emit(StreamEvent::AgentUpdated {
                    new_agent: current.clone(),
                })
                .await;
                self.hooks.agent_start(&self.context, &current).await?;
            }

            self.current_turn += 1;
            if self.current_turn > self.max_turns {
                warn!(max_turns = self.max_turns, agent = %current.name, "Max turns exceeded");
                let err = AgentError::MaxTurnsExceeded {
                    max_turns: self.max_turns,
                    run_data: None,
                };
                return Err(err.with_run_data(self.run_data(&current)));
            }
            if self.current_turn == 1 {
                self.run_input_guardrails(&current).await?;
            }

            let span = if self.config.tracing_disabled {
                Span::none()
            } else {
                info_span!("turn", turn = self.current_turn, agent = %current.name)
            };
            let next_step = self
                .run_turn(&current)
                .instrument(span)
                .await
                .map_err(|e| e.with_run_data(self.run_data(&current)))?;

            match next_step {
                NextStep::FinalOutput(output) => {
                    self.run_output_guardrails(&current, &output).await?;
                    info!(agent = %current.name, turns = self.current_turn, "Run complete");
                    return Ok(self.finish(output, current));
                }
                NextStep::Handoff(next) => {
                    current = next;
                    agent_changed = true;
                }
                NextStep::RunAgain => {}
            }

            if self.cancel_requested() {
                info!(turns = self.current_turn, "Run stopped after turn");
                return Ok(self.finish(Value::Null, current));
            }
        }
    }

    /// Prepend stored history and persist the caller's new input once.
    async fn prepare_session(&mut self) -> Result<()> {
        let Some(session) = self.session.clone() else {
            return Ok(());
        };
        let history = session.get_items(None).await?;
        let new_input = self.original_input.to_items();
        debug!(
            session = session.session_id(),
            history = history.len(),
            "Loaded session history"
        );
        if !history.is_empty() {
            let mut items = history;
            items.extend(new_input.iter().cloned());
            self.original_input = RunInput::Items(items);
        }
        session.add_items(new_input).await
    }

    async fn run_turn(&mut self, agent: &Arc<Agent>) -> Result<NextStep> {
        let system_prompt = agent.system_prompt(&self.context).await?;
        let snapshot = agent.tools();
        let known = snapshot.len();
        let mut tools = agent.keep_enabled(snapshot, &self.context).await;
        let handoffs = agent.enabled_handoffs(&self.context).await;
        debug!(
            tools = tools.len(),
            handoffs = handoffs.len(),
            "Calling model"
        );

        let response = self.call_model(agent, system_prompt, &tools, &handoffs).await?;

        // Tools added while the model was thinking are callable from this
        // response on. Advertised tools keep the enablement they were sent with.
        let appended = agent.tools().into_iter().skip(known).collect();
        tools.extend(agent.keep_enabled(appended, &self.context).await);
        let processed = turn::process_model_response(agent, &tools, &handoffs, &response)?;

        let env = TurnEnv {
            agent,
            context: &self.context,
            hooks: &self.hooks,
            config: &self.config,
        };
        let turn = turn::execute_tools_and_side_effects(
            &env,
            self.original_input.clone(),
            self.generated.clone(),
            processed,
        )
        .await?;

        self.original_input = turn.original_input;
        self.generated = turn.generated;
        self.tool_input_guardrail_results
            .extend(turn.tool_input_guardrail_results);
        self.tool_output_guardrail_results
            .extend(turn.tool_output_guardrail_results);

        for item in &turn.turn_items {
            self.emit(StreamEvent::run_item(item.clone())).await;
        }
        self.save_turn(&turn.turn_items).await?;
        self.publish(agent, Value::Null);
        Ok(turn.next_step)
    }

    async fn call_model(
        &mut self,
        agent: &Arc<Agent>,
        system_prompt: Option<String>,
        tools: &[AgentTool],
        handoffs: &[Handoff],
    ) -> Result<ModelResponse> {
        let mut model_data = ModelInputData {
            input: self.assembler.assemble(&self.original_input, &self.generated),
            instructions: system_prompt,
        };
        if let Some(filter) = &self.config.call_model_input_filter {
            model_data = filter
                .apply(CallModelData {
                    model_data,
                    agent: agent.clone(),
                    context: self.context.clone(),
                })
                .await?;
        }

        let model = self.resolve_model(agent)?;
        let request = ModelRequest {
            system_instructions: model_data.instructions,
            input: model_data.input,
            model_settings: agent.model_settings.resolve(self.config.model_settings.as_ref()),
            tools: tools.iter().map(AgentTool::definition).collect(),
            output_schema: agent.output_type.as_ref().map(OutputSchema::definition),
            handoffs: handoffs.iter().map(Handoff::definition).collect(),
            tracing: ModelTracing::from_flags(self.config.tracing_disabled, self.config.trace_include_sensitive_data),
            previous_response_id: self.assembler.previous_response_id(),
            conversation_id: self.assembler.conversation_id(),
        };
        if self.config.trace_include_sensitive_data {
            debug!(input = ?request.input, "Model request");
        }

        self.hooks
            .llm_start(&self.context, agent, request.system_instructions.as_deref(), &request.input)
            .await?;
        let response = match &self.stream {
            None => model.get_response(&request).await,
            Some(channel) => stream_model(model.as_ref(), &request, &channel.sink).await,
        }
        .map_err(|e| AgentError::from_anyhow(e, AgentError::Model))?;
        self.hooks.llm_end(&self.context, agent, &response).await?;

        if self.config.trace_include_sensitive_data {
            debug!(output = ?response.output, "Model response");
        }
        debug!(
            items = response.output.len(),
            total_tokens = response.usage.total_tokens,
            "Model responded"
        );
        self.context.add_usage(&response.usage);
        self.assembler.mark_sent(&self.generated, &response);
        self.raw_responses.push(response.clone());
        Ok(response)
    }

    /// The run config's model wins over the agent's. Names go through the
    /// provider; instances are used as-is.
    fn resolve_model(&self, agent: &Agent) -> Result<Arc<dyn Model>> {
        let chosen = self.config.model.as_ref().or(agent.model.as_ref());
        let name = match chosen {
            Some(ModelRef::Instance(model)) => return Ok(model.clone()),
            Some(ModelRef::Name(name)) => Some(name.as_str()),
            None => self.config.default_model.as_deref(),
        };
        let Some(provider) = &self.config.model_provider else {
            return Err(AgentError::User(format!(
                "No model provider configured to resolve model {} for agent {}",
                name.unwrap_or("(default)"),
                agent.name
            )));
        };
        provider
            .get_model(name)
            .map_err(|e| AgentError::from_anyhow(e, |e| AgentError::User(format!("Failed to resolve model: {e}"))))
    }

    async fn run_input_guardrails(&mut self, agent: &Arc<Agent>) -> Result<()> {
        let guardrails: Vec<_> = agent
            .input_guardrails
            .iter()
            .chain(self.config.input_guardrails.iter())
            .collect();
        if guardrails.is_empty() {
            return Ok(());
        }
        let results = try_join_all(
            guardrails
                .iter()
                .map(|g| g.run(self.context.clone(), agent.clone(), self.original_input.clone())),
        )
        .await?;

        let tripped = results.iter().find(|r| r.tripped()).cloned();
        self.input_guardrail_results.extend(results);
        if let Some(result) = tripped {
            warn!(guardrail = %result.guardrail_name, "Input guardrail tripwire triggered");
            let err = AgentError::InputGuardrailTripwireTriggered {
                guardrail: result.guardrail_name,
                output_info: result.output.output_info,
                run_data: None,
            };
            return Err(err.with_run_data(self.run_data(agent)));
        }
        Ok(())
    }

    async fn run_output_guardrails(&mut self, agent: &Arc<Agent>, output: &Value) -> Result<()> {
        let guardrails: Vec<_> = agent
            .output_guardrails
            .iter()
            .chain(self.config.output_guardrails.iter())
            .collect();
        if guardrails.is_empty() {
            return Ok(());
        }
        let results = try_join_all(
            guardrails
                .iter()
                .map(|g| g.run(self.context.clone(), agent.clone(), output.clone())),
        )
        .await?;

        let tripped = results.iter().find(|r| r.tripped()).cloned();
        self.output_guardrail_results.extend(results);
        if let Some(result) = tripped {
            warn!(guardrail = %result.guardrail_name, "Output guardrail tripwire triggered");
            let err = AgentError::OutputGuardrailTripwireTriggered {
                guardrail: result.guardrail_name,
                output_info: result.output.output_info,
                run_data: None,
            };
            return Err(err.with_run_data(self.run_data(agent)));
        }
        Ok(())
    }

    /// Persist one turn's items. Called exactly once per completed turn.
    async fn save_turn(&self, items: &[RunItem]) -> Result<()> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        let items: Vec<_> = items.iter().map(RunItem::to_input_item).collect();
        debug!(session = session.session_id(), items = items.len(), "Saving turn to session");
        session.add_items(items).await
    }

    async fn emit(&self, event: StreamEvent) {
        if let Some(channel) = &self.stream {
            channel.sink.emit(event).await;
        }
    }

    fn publish(&self, agent: &Arc<Agent>, final_output: Value) {
        let Some(channel) = &self.stream else {
            return;
        };
        let mut state = channel.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.current_turn = self.current_turn;
        state.result = self.snapshot(agent.clone(), final_output);
    }

    fn cancel_mode_immediate(&self) -> bool {
        self.stream
            .as_ref()
            .is_some_and(|c| c.sink.cancel_state().is_immediate())
    }

    fn cancel_requested(&self) -> bool {
        self.stream
            .as_ref()
            .is_some_and(|c| c.sink.cancel_state().mode().is_some())
    }

    fn snapshot(&self, last_agent: Arc<Agent>, final_output: Value) -> RunResult {
        RunResult {
            input: self.original_input.clone(),
            new_items: self.generated.clone(),
            raw_responses: self.raw_responses.clone(),
            final_output,
            input_guardrail_results: self.input_guardrail_results.clone(),
            output_guardrail_results: self.output_guardrail_results.clone(),
            tool_input_guardrail_results: self.tool_input_guardrail_results.clone(),
            tool_output_guardrail_results: self.tool_output_guardrail_results.clone(),
            context: self.context.clone(),
            last_agent,
        }
    }

    fn finish(self, final_output: Value, last_agent: Arc<Agent>) -> RunResult {
        self.publish(&last_agent, final_output.clone());
        self.snapshot(last_agent, final_output)
    }

    fn run_data(&self, agent: &Arc<Agent>) -> RunErrorDetails {
        RunErrorDetails {
            input: self.original_input.clone(),
            new_items: self.generated.iter().map(RunItem::to_input_item).collect(),
            raw_responses: self.raw_responses.clone(),
            last_agent: agent.name.clone(),
            usage: self.context.usage(),
        }
    }
}

/// Forward provider events and return the response they complete.
async fn stream_model(model: &dyn Model, request: &ModelRequest, sink: &EventSink) -> anyhow::Result<ModelResponse> {
    let mut events = model.stream_response(request).await?;
    let mut completed = None;
    while let Some(event) = events.next().await {
        let event = event?;
        if let ModelStreamEvent::ResponseCompleted { response } = &event {
            completed = Some(response.clone());
        }
        sink.emit(StreamEvent::RawResponse(event)).await;
    }
    completed.ok_or_else(|| {
        anyhow::Error::new(AgentError::ModelBehavior(
            "Model stream ended without a completed response".into(),
        ))
    })
}
