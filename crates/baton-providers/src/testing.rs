//! Scripted in-memory model.
//!
//! `FakeModel` replays queued turn outputs in order and records the
//! requests it receives, so runner behavior can be asserted without a
//! network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use baton_core::items::{Item, ModelResponse};
use baton_core::usage::Usage;

use crate::stream::response_events;
use crate::{Model, ModelEventStream, ModelRequest};

pub const FAKE_RESPONSE_ID: &str = "resp-789";

static NEXT_CALL_ID: AtomicUsize = AtomicUsize::new(1);

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum FakeTurn {
    Output(Vec<Item>),
    Error(String),
}

#[derive(Default)]
struct Recorded {
    first: Option<ModelRequest>,
    last: Option<ModelRequest>,
}

pub struct FakeModel {
    turns: Mutex<VecDeque<FakeTurn>>,
    recorded: Mutex<Recorded>,
    usage: Mutex<Usage>,
    calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FakeModel {
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            recorded: Mutex::new(Recorded::default()),
            usage: Mutex::new(Usage::single_request(0, 0)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_output(items: Vec<Item>) -> Self {
        let model = Self::new();
        model.set_next_output(items);
        model
    }

    pub fn set_next_output(&self, items: Vec<Item>) {
        lock(&self.turns).push_back(FakeTurn::Output(items));
    }

    pub fn add_multiple_turn_outputs(&self, turns: Vec<Vec<Item>>) {
        lock(&self.turns).extend(turns.into_iter().map(FakeTurn::Output));
    }

    /// Queue a turn that fails like a transport error.
    pub fn set_next_error(&self, message: impl Into<String>) {
        lock(&self.turns).push_back(FakeTurn::Error(message.into()));
    }

    /// Usage reported by every subsequent response.
    pub fn set_hardcoded_usage(&self, usage: Usage) {
        *lock(&self.usage) = usage;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn first_turn_args(&self) -> Option<ModelRequest> {
        lock(&self.recorded).first.clone()
    }

    pub fn last_turn_args(&self) -> Option<ModelRequest> {
        lock(&self.recorded).last.clone()
    }

    fn next_response(&self, request: &ModelRequest) -> anyhow::Result<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut recorded = lock(&self.recorded);
            if recorded.first.is_none() {
                recorded.first = Some(request.clone());
            }
            recorded.last = Some(request.clone());
        }

        // An exhausted script behaves like a model with nothing to say.
        let turn = lock(&self.turns)
            .pop_front()
            .unwrap_or(FakeTurn::Output(Vec::new()));
        match turn {
            FakeTurn::Error(message) => Err(anyhow::anyhow!(message)),
            FakeTurn::Output(output) => Ok(ModelResponse {
                output,
                usage: lock(&self.usage).clone(),
                response_id: Some(FAKE_RESPONSE_ID.to_string()),
            }),
        }
    }
}

impl Default for FakeModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Model for FakeModel {
    async fn get_response(&self, request: &ModelRequest) -> anyhow::Result<ModelResponse> {
        self.next_response(request)
    }

    async fn stream_response(&self, request: &ModelRequest) -> anyhow::Result<ModelEventStream> {
        let response = self.next_response(request)?;
        let events = response_events(&response);
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

pub fn text_message(text: &str) -> Item {
    Item::assistant_message(text)
}

/// Function call with a fresh call id.
pub fn function_call(name: &str, arguments: &str) -> Item {
    let n = NEXT_CALL_ID.fetch_add(1, Ordering::SeqCst);
    Item::function_call(format!("call_{n}"), name, arguments)
}
