use rusqlite::Connection;

use crate::error::StoreError;

/// Initialise the overflow schema in `conn`.
///
/// Creates the `queue_overflow` table (idempotent) and an index on
/// `(queue, id)` so pulling the oldest rows of one logical queue stays cheap
/// when several queues share the same database file.
pub fn init_db(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS queue_overflow (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            queue       TEXT    NOT NULL,
            payload     TEXT    NOT NULL,   -- JSON-encoded item
            created_at  TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_queue_overflow_queue_id
            ON queue_overflow (queue, id);
        ",
    )?;
    Ok(())
}
