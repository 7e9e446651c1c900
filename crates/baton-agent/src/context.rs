//! Per-run context shared with tools, hooks, guardrails, and filters.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use baton_core::usage::Usage;

/// Caller state plus the run's cumulative usage.
///
/// The runner owns usage accounting; callers attach arbitrary state with
/// [`RunContext::with_state`] and read it back with [`RunContext::state`].
pub struct RunContext {
    state: Option<Arc<dyn Any + Send + Sync>>,
    usage: Mutex<Usage>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            state: None,
            usage: Mutex::new(Usage::default()),
        }
    }

    pub fn with_state<T: Any + Send + Sync>(state: T) -> Self {
        Self {
            state: Some(Arc::new(state)),
            usage: Mutex::new(Usage::default()),
        }
    }

    /// Caller state, if present and of type `T`.
    pub fn state<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.state.as_deref()?.downcast_ref::<T>()
    }

    /// A context for a nested run: same caller state, fresh usage.
    pub fn child(&self) -> Self {
        Self {
            state: self.state.clone(),
            usage: Mutex::new(Usage::default()),
        }
    }

    pub fn usage(&self) -> Usage {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn add_usage(&self, usage: &Usage) {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(usage);
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("has_state", &self.state.is_some())
            .field("usage", &self.usage())
            .finish()
    }
}
