use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::{db::init_db, error::StoreError, store::OverflowStore};

/// Overflow store persisting items as JSON rows in SQLite.
///
/// Rows are keyed by queue name, so one database file can back several
/// logical queues. Row ids are monotonic, which gives FIFO order per queue.
pub struct SqliteStore<T> {
    conn: Arc<Mutex<Connection>>,
    queue: String,
    _item: PhantomData<fn() -> T>,
}

impl<T> SqliteStore<T> {
    /// Wrap `conn`, creating the schema if needed.
    pub fn new(conn: Connection, queue: impl Into<String>) -> Result<Self, StoreError> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            queue: queue.into(),
            _item: PhantomData,
        })
    }

    /// Open (or create) the database file at `path` in WAL mode.
    pub fn open(path: &str, queue: impl Into<String>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(conn, queue)
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Number of rows currently stored for this queue.
    pub fn len(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().expect("overflow db poisoned");
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_overflow WHERE queue = ?1",
            [&self.queue],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl<T> OverflowStore<T> for SqliteStore<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    async fn has_more(&self) -> bool {
        let conn = self.conn.lock().expect("overflow db poisoned");
        match conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM queue_overflow WHERE queue = ?1)",
            [&self.queue],
            |row| row.get::<_, bool>(0),
        ) {
            Ok(more) => more,
            Err(e) => {
                warn!(queue = %self.queue, error = %e, "overflow has_more query failed");
                false
            }
        }
    }

    async fn save(&self, items: Vec<T>) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }
        // Encode before taking the lock so a bad item leaves the table untouched.
        let payloads = items
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        let now = Utc::now().to_rfc3339();

        let mut conn = self.conn.lock().expect("overflow db poisoned");
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO queue_overflow (queue, payload, created_at) VALUES (?1, ?2, ?3)",
            )?;
            for payload in &payloads {
                stmt.execute(rusqlite::params![self.queue, payload, now])?;
            }
        }
        tx.commit()?;

        debug!(queue = %self.queue, count = payloads.len(), "items saved to overflow");
        Ok(())
    }

    async fn pull(&self, limit: usize) -> Result<Vec<T>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows: Vec<(i64, String)> = {
            let mut conn = self.conn.lock().expect("overflow db poisoned");
            let tx = conn.transaction()?;
            // Collect eagerly so `stmt` is dropped before the DELETE borrows `tx`.
            let rows = {
                let mut stmt = tx.prepare_cached(
                    "SELECT id, payload FROM queue_overflow
                     WHERE queue = ?1 ORDER BY id LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![self.queue, limit as i64], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };
            if let Some((last_id, _)) = rows.last() {
                tx.execute(
                    "DELETE FROM queue_overflow WHERE queue = ?1 AND id <= ?2",
                    rusqlite::params![self.queue, last_id],
                )?;
            }
            tx.commit()?;
            rows
        };

        let items = rows
            .into_iter()
            .filter_map(|(id, payload)| match serde_json::from_str(&payload) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(queue = %self.queue, row_id = id, error = %e, "dropping undecodable overflow row");
                    None
                }
            })
            .collect();
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Event {
        seq: u32,
        body: String,
    }

    fn event(seq: u32) -> Event {
        Event {
            seq,
            body: format!("event-{seq}"),
        }
    }

    fn store(queue: &str) -> SqliteStore<Event> {
        SqliteStore::new(Connection::open_in_memory().unwrap(), queue).unwrap()
    }

    #[tokio::test]
    async fn save_then_pull_preserves_order() {
        let s = store("events");
        s.save(vec![event(1), event(2)]).await.unwrap();
        s.save(vec![event(3)]).await.unwrap();

        assert!(s.has_more().await);
        assert_eq!(s.pull(2).await.unwrap(), vec![event(1), event(2)]);
        assert_eq!(s.pull(2).await.unwrap(), vec![event(3)]);
        assert!(!s.has_more().await);
    }

    #[tokio::test]
    async fn pull_deletes_rows() {
        let s = store("events");
        s.save((0..5).map(event).collect()).await.unwrap();
        assert_eq!(s.len().unwrap(), 5);

        let pulled = s.pull(3).await.unwrap();
        assert_eq!(pulled.len(), 3);
        assert_eq!(s.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn empty_pull_is_not_an_error() {
        let s = store("events");
        assert!(s.pull(10).await.unwrap().is_empty());
        assert!(s.pull(0).await.unwrap().is_empty());
        assert!(s.is_empty().unwrap());
    }

    #[tokio::test]
    async fn queues_sharing_a_table_are_isolated() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let shared = Arc::new(Mutex::new(conn));
        let a: SqliteStore<Event> = SqliteStore {
            conn: Arc::clone(&shared),
            queue: "a".to_string(),
            _item: PhantomData,
        };
        let b: SqliteStore<Event> = SqliteStore {
            conn: shared,
            queue: "b".to_string(),
            _item: PhantomData,
        };

        a.save(vec![event(1)]).await.unwrap();
        assert!(a.has_more().await);
        assert!(!b.has_more().await);
        assert!(b.pull(10).await.unwrap().is_empty());
        assert_eq!(a.pull(10).await.unwrap(), vec![event(1)]);
    }

    #[tokio::test]
    async fn undecodable_rows_are_skipped_and_removed() {
        let s = store("events");
        s.save(vec![event(1)]).await.unwrap();
        {
            let conn = s.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO queue_overflow (queue, payload, created_at) VALUES ('events', 'not json', '')",
                [],
            )
            .unwrap();
        }
        s.save(vec![event(2)]).await.unwrap();

        assert_eq!(s.pull(10).await.unwrap(), vec![event(1), event(2)]);
        assert_eq!(s.len().unwrap(), 0);
    }
}
