//! Stream events and cooperative cancellation.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use baton_core::error::{AgentError, Result};
use baton_providers::ModelStreamEvent;

use crate::agent::Agent;
use crate::items::RunItem;

/// Bound on buffered events; the producer waits when the consumer lags.
pub(crate) const EVENT_QUEUE_CAPACITY: usize = 100;

/// How a streamed run stops. Ordered by strength.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum CancelMode {
    /// Finish the current turn, including its tools and session save, then
    /// stop before the next one.
    AfterTurn,
    /// Stop now and discard anything still queued.
    #[default]
    Immediate,
}

/// Shared cancellation request. Repeated requests keep the strongest mode.
pub(crate) struct CancelState {
    mode: Mutex<Option<CancelMode>>,
    token: CancellationToken,
}

impl CancelState {
    pub fn new() -> Self {
        Self {
            mode: Mutex::new(None),
            token: CancellationToken::new(),
        }
    }

    pub fn request(&self, mode: CancelMode) {
        let mut current = self.mode.lock().unwrap_or_else(PoisonError::into_inner);
        let next = current.map_or(mode, |existing| existing.max(mode));
        if *current == Some(next) {
            return;
        }
        *current = Some(next);
        debug!(mode = ?next, "Run cancellation requested");
        if next == CancelMode::Immediate {
            self.token.cancel();
        }
    }

    pub fn mode(&self) -> Option<CancelMode> {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_immediate(&self) -> bool {
        self.mode() == Some(CancelMode::Immediate)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Name of a run item event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunItemEventName {
    MessageOutputCreated,
    HandoffRequested,
    HandoffOccured,
    ToolCalled,
    ToolOutput,
    ReasoningItemCreated,
}

impl RunItemEventName {
    pub fn as_str(self) -> &'static str {
        match self {
            RunItemEventName::MessageOutputCreated => "message_output_created",
            RunItemEventName::HandoffRequested => "handoff_requested",
            RunItemEventName::HandoffOccured => "handoff_occured",
            RunItemEventName::ToolCalled => "tool_called",
            RunItemEventName::ToolOutput => "tool_output",
            RunItemEventName::ReasoningItemCreated => "reasoning_item_created",
        }
    }

    pub(crate) fn for_item(item: &RunItem) -> Self {
        match item {
            RunItem::MessageOutput { .. } => RunItemEventName::MessageOutputCreated,
            RunItem::HandoffCall { .. } => RunItemEventName::HandoffRequested,
            RunItem::HandoffOutput { .. } => RunItemEventName::HandoffOccured,
            RunItem::ToolCall { .. } => RunItemEventName::ToolCalled,
            RunItem::ToolCallOutput { .. } => RunItemEventName::ToolOutput,
            RunItem::Reasoning { .. } => RunItemEventName::ReasoningItemCreated,
        }
    }
}

impl fmt::Display for RunItemEventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The current agent changed. Also sent for the starting agent.
    AgentUpdated { new_agent: Arc<Agent> },
    /// Provider event, passed through untouched.
    RawResponse(ModelStreamEvent),
    /// A run item was generated.
    RunItem { name: RunItemEventName, item: RunItem },
}

impl StreamEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            StreamEvent::AgentUpdated { .. } => "agent_updated_stream_event",
            StreamEvent::RawResponse(_) => "raw_response_event",
            StreamEvent::RunItem { .. } => "run_item_stream_event",
        }
    }

    pub(crate) fn run_item(item: RunItem) -> Self {
        StreamEvent::RunItem {
            name: RunItemEventName::for_item(&item),
            item,
        }
    }
}

/// Producer half of the event queue.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<Result<StreamEvent>>,
    cancel: Arc<CancelState>,
}

impl EventSink {
    pub fn channel(cancel: Arc<CancelState>) -> (Self, mpsc::Receiver<Result<StreamEvent>>) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        (Self { tx, cancel }, rx)
    }

    pub fn cancel_state(&self) -> &CancelState {
        &self.cancel
    }

    /// Queue an event. Dropped once an immediate cancel is requested or the
    /// consumer is gone.
    pub async fn emit(&self, event: StreamEvent) {
        if self.cancel.is_immediate() {
            return;
        }
        let _ = self.tx.send(Ok(event)).await;
    }

    /// Surface a run failure through the same queue.
    pub async fn fail(&self, err: AgentError) {
        let _ = self.tx.send(Err(err)).await;
    }
}
