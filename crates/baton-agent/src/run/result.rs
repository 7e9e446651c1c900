//! Results of a run, finished or streaming.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use baton_core::error::Result;
use baton_core::items::{Item, ModelResponse, RunInput};
use baton_core::usage::Usage;

use crate::agent::Agent;
use crate::context::RunContext;
use crate::guardrail::{InputGuardrailResult, OutputGuardrailResult};
use crate::items::RunItem;
use crate::tool_guardrails::{ToolInputGuardrailResult, ToolOutputGuardrailResult};

use super::RunOptions;
use super::controller::{RunDriver, StreamChannel};
use super::streaming::{CancelMode, CancelState, EventSink, StreamEvent};

#[derive(Debug, Clone)]
pub struct RunResult {
    /// Input the run started from, after session history and any handoff
    /// filter were applied.
    pub input: RunInput,
    pub new_items: Vec<RunItem>,
    pub raw_responses: Vec<ModelResponse>,
    /// `Null` when the run stopped before producing one.
    pub final_output: Value,
    pub input_guardrail_results: Vec<InputGuardrailResult>,
    pub output_guardrail_results: Vec<OutputGuardrailResult>,
    pub tool_input_guardrail_results: Vec<ToolInputGuardrailResult>,
    pub tool_output_guardrail_results: Vec<ToolOutputGuardrailResult>,
    pub context: Arc<RunContext>,
    pub(crate) last_agent: Arc<Agent>,
}

impl RunResult {
    pub(crate) fn empty(input: RunInput, agent: Arc<Agent>, context: Arc<RunContext>) -> Self {
        Self {
            input,
            new_items: Vec::new(),
            raw_responses: Vec::new(),
            final_output: Value::Null,
            input_guardrail_results: Vec::new(),
            output_guardrail_results: Vec::new(),
            tool_input_guardrail_results: Vec::new(),
            tool_output_guardrail_results: Vec::new(),
            context,
            last_agent: agent,
        }
    }

    /// The agent that was active when the run ended.
    pub fn last_agent(&self) -> &Arc<Agent> {
        &self.last_agent
    }

    /// Original input followed by every generated item, ready to feed into
    /// the next run.
    pub fn to_input_list(&self) -> Vec<Item> {
        let mut items = self.input.to_items();
        items.extend(self.new_items.iter().map(RunItem::to_input_item));
        items
    }

    pub fn last_response_id(&self) -> Option<&str> {
        self.raw_responses.last()?.response_id.as_deref()
    }

    pub fn final_output_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.final_output.clone())?)
    }

    /// Final output as text: strings as-is, other values as JSON.
    pub fn final_output_text(&self) -> String {
        match &self.final_output {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn usage(&self) -> Usage {
        self.context.usage()
    }
}

/// What a streamed run has produced so far.
#[derive(Debug)]
pub(crate) struct StreamState {
    pub result: RunResult,
    pub current_turn: u32,
}

/// A run executing on a background task.
///
/// Events are read with [`next_event`](Self::next_event) or
/// [`stream_events`](Self::stream_events). A failure inside the run arrives
/// as the last event. Dropping the handle aborts the run.
pub struct RunResultStreaming {
    events: tokio::sync::Mutex<mpsc::Receiver<Result<StreamEvent>>>,
    cancel: Arc<CancelState>,
    state: Arc<Mutex<StreamState>>,
    complete: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RunResultStreaming {
    pub(crate) fn start(agent: Arc<Agent>, input: RunInput, options: RunOptions) -> Self {
        let cancel = Arc::new(CancelState::new());
        let (sink, rx) = EventSink::channel(cancel.clone());
        let state = Arc::new(Mutex::new(StreamState {
            result: RunResult::empty(input.clone(), agent.clone(), options.context.clone()),
            current_turn: 0,
        }));
        let complete = Arc::new(AtomicBool::new(false));

        let channel = StreamChannel {
            sink: sink.clone(),
            state: state.clone(),
        };
        let driver = RunDriver::new(agent, input, options, Some(channel));
        let token = cancel.token().clone();
        let done = complete.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => debug!("Streamed run cancelled"),
                result = driver.run() => {
                    if let Err(e) = result {
                        sink.fail(e).await;
                    }
                }
            }
            done.store(true, Ordering::SeqCst);
        });

        Self {
            events: tokio::sync::Mutex::new(rx),
            cancel,
            state,
            complete,
            task: Mutex::new(Some(task)),
        }
    }

    /// Next event, or `None` once the run has finished or was cancelled.
    pub async fn next_event(&self) -> Option<Result<StreamEvent>> {
        let mut rx = self.events.lock().await;
        if self.cancel.is_immediate() {
            self.shut_down(&mut rx);
            return None;
        }
        let token = self.cancel.token().clone();
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            event = rx.recv() => event,
        };
        if next.is_none() {
            if self.cancel.is_immediate() {
                self.shut_down(&mut rx);
            }
            self.complete.store(true, Ordering::SeqCst);
        }
        next
    }

    /// The event sequence. Finite and not restartable.
    pub fn stream_events(&self) -> impl Stream<Item = Result<StreamEvent>> + '_ {
        futures::stream::unfold(self, |this| async move { this.next_event().await.map(|event| (event, this)) })
    }

    /// Request cancellation. Repeated calls keep the strongest mode.
    pub fn cancel(&self, mode: CancelMode) {
        self.cancel.request(mode);
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    /// Copy of everything produced so far.
    pub fn snapshot(&self) -> RunResult {
        self.state().result.clone()
    }

    pub fn new_items(&self) -> Vec<RunItem> {
        self.state().result.new_items.clone()
    }

    pub fn raw_responses(&self) -> Vec<ModelResponse> {
        self.state().result.raw_responses.clone()
    }

    pub fn final_output(&self) -> Value {
        self.state().result.final_output.clone()
    }

    pub fn last_agent(&self) -> Arc<Agent> {
        self.state().result.last_agent.clone()
    }

    pub fn current_turn(&self) -> u32 {
        self.state().current_turn
    }

    pub fn to_input_list(&self) -> Vec<Item> {
        self.state().result.to_input_list()
    }

    pub fn usage(&self) -> Usage {
        self.state().result.usage()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shut_down(&self, rx: &mut mpsc::Receiver<Result<StreamEvent>>) {
        rx.close();
        while rx.try_recv().is_ok() {}
        self.abort();
        self.complete.store(true, Ordering::SeqCst);
    }

    fn abort(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }
}

impl Drop for RunResultStreaming {
    fn drop(&mut self) {
        self.abort();
    }
}
