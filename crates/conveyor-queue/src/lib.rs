//! `conveyor-queue` — bounded in-memory queue with a pluggable overflow store.
//!
//! # Overview
//!
//! [`BufferedQueue`] keeps up to `size` items in a tokio mpsc buffer. When an
//! [`OverflowStore`] is configured, items that do not fit (or that would
//! overtake an existing backlog) are written to the store, and a background
//! task moves them back into memory every `load_interval`.
//!
//! | Store           | Persistence                          |
//! |-----------------|--------------------------------------|
//! | `MemoryStore`   | none, unbounded `VecDeque`           |
//! | `SqliteStore`   | JSON rows in the `queue_overflow` table |
//!
//! `close()` joins the background task and saves whatever is still buffered
//! back to the store.

pub mod db;
pub mod error;
pub mod queue;
pub mod sqlite;
pub mod store;

pub use error::{QueueError, Result, StoreError};
pub use queue::{BufferedQueue, QueueOptions};
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, OverflowStore};
