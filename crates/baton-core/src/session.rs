//! Conversation memory shared across runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::items::Item;

/// Storage for the item history of a conversation.
///
/// The runner reads the history once when a run starts and then appends
/// each turn's new items through `add_items`.
#[async_trait]
pub trait Session: Send + Sync {
    fn session_id(&self) -> &str;

    /// Stored items in insertion order. With a limit, only the latest
    /// `limit` items are returned, still oldest first.
    async fn get_items(&self, limit: Option<usize>) -> Result<Vec<Item>>;

    async fn add_items(&self, items: Vec<Item>) -> Result<()>;

    /// Remove and return the most recent item.
    async fn pop_item(&self) -> Result<Option<Item>>;

    async fn clear_session(&self) -> Result<()>;
}

struct MemoryState {
    items: Vec<Item>,
    updated_at: DateTime<Utc>,
}

/// Process-local session backed by a vector.
pub struct MemorySession {
    id: String,
    state: RwLock<MemoryState>,
}

impl MemorySession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: RwLock::new(MemoryState {
                items: Vec::new(),
                updated_at: Utc::now(),
            }),
        }
    }

    /// Session with a random id.
    pub fn ephemeral() -> Self {
        Self::new(format!("session_{}", uuid::Uuid::new_v4().simple()))
    }

    pub async fn updated_at(&self) -> DateTime<Utc> {
        self.state.read().await.updated_at
    }
}

#[async_trait]
impl Session for MemorySession {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn get_items(&self, limit: Option<usize>) -> Result<Vec<Item>> {
        let state = self.state.read().await;
        let start = match limit {
            Some(n) => state.items.len().saturating_sub(n),
            None => 0,
        };
        Ok(state.items[start..].to_vec())
    }

    async fn add_items(&self, items: Vec<Item>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().await;
        state.items.extend(items);
        state.updated_at = Utc::now();
        Ok(())
    }

    async fn pop_item(&self) -> Result<Option<Item>> {
        let mut state = self.state.write().await;
        let item = state.items.pop();
        if item.is_some() {
            state.updated_at = Utc::now();
        }
        Ok(item)
    }

    async fn clear_session(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.items.clear();
        state.updated_at = Utc::now();
        Ok(())
    }
}
