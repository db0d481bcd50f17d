use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;

/// Durable (or at least secondary) storage the queue spills into once its
/// in-memory buffer is full.
///
/// Implementations must be `Send + Sync`: the queue calls them from producer
/// tasks and from its background replenishment task concurrently.
#[async_trait]
pub trait OverflowStore<T>: Send + Sync {
    /// Report whether at least one item is waiting in the store.
    async fn has_more(&self) -> bool;

    /// Append `items` to the store, preserving their order.
    async fn save(&self, items: Vec<T>) -> Result<(), StoreError>;

    /// Remove and return up to `limit` of the oldest items.
    ///
    /// May return fewer than `limit`. An empty store is not an error: return
    /// an empty `Vec` rather than a "not found" failure.
    async fn pull(&self, limit: usize) -> Result<Vec<T>, StoreError>;
}

/// Unbounded in-process store.
///
/// Useful as a second tier behind a small hot buffer, and as a test double.
pub struct MemoryStore<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("memory store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> OverflowStore<T> for MemoryStore<T> {
    async fn has_more(&self) -> bool {
        !self.is_empty()
    }

    async fn save(&self, items: Vec<T>) -> Result<(), StoreError> {
        self.items
            .lock()
            .expect("memory store poisoned")
            .extend(items);
        Ok(())
    }

    async fn pull(&self, limit: usize) -> Result<Vec<T>, StoreError> {
        let mut items = self.items.lock().expect("memory store poisoned");
        let n = limit.min(items.len());
        Ok(items.drain(..n).collect())
    }
}
