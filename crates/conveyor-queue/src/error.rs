use thiserror::Error;

/// Errors raised by an [`OverflowStore`](crate::store::OverflowStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An item could not be encoded to, or decoded from, its stored form.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store cannot serve requests right now (e.g. a remote backend is down).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur within the queue subsystem.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Invalid construction parameters.
    #[error("Invalid queue configuration: {0}")]
    Config(String),

    /// The queue has been closed; no further puts or pulls are served.
    #[error("Queue is closed")]
    Closed,

    /// Writing an item to the overflow store failed.
    #[error("Overflow store error: {0}")]
    Store(#[source] StoreError),

    /// Reading back from the overflow store failed during replenishment.
    #[error("Read message from overflow store failed: {0}")]
    Replenish(#[source] StoreError),

    /// Buffered items could not be saved back to the store at close time.
    #[error("Save buffered items to overflow store failed: {0}")]
    Flush(#[source] StoreError),
}

impl QueueError {
    pub fn is_closed(&self) -> bool {
        matches!(self, QueueError::Closed)
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
