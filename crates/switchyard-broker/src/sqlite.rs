//! SQLite-backed durable queue.
//!
//! All scheduler and worker processes share one queue database. A message
//! is `ready` until a consumer claims it, `unacked` until that consumer
//! acks or nacks. Acked messages are deleted; nacked messages return to
//! `ready` until their attempts are exhausted, then park in the
//! dead-letter table.
//!
//! A consumer that dies without acknowledging leaves its message
//! `unacked`; the next consumer startup returns such messages to `ready`.
//! This is the at-least-once redelivery contract: a worker crash
//! redelivers, a handler failure under ack-always does not.

use std::path::Path;

use chrono::Utc;
use rusqlite::params;
use tokio::sync::Mutex;
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

use async_trait::async_trait;
use switchyard_core::{TransportError, WorkItem};

use crate::broker::{Broker, Delivery, DEFAULT_MAX_ATTEMPTS};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    payload BLOB NOT NULL,
    status TEXT NOT NULL DEFAULT 'ready',
    attempts INTEGER NOT NULL DEFAULT 0,
    published_at TEXT NOT NULL,
    claimed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_messages_queue_status ON messages(queue, status, id);

CREATE TABLE IF NOT EXISTS dead_letters (
    id INTEGER PRIMARY KEY,
    queue TEXT NOT NULL,
    payload BLOB NOT NULL,
    attempts INTEGER NOT NULL,
    failed_at TEXT NOT NULL
);
"#;

fn consume_err(e: tokio_rusqlite::Error) -> TransportError {
    TransportError::Consume(e.to_string())
}

/// Durable broker handle bound to one named queue.
pub struct SqliteBroker {
    conn: Connection,
    queue: String,
    max_attempts: u32,
    in_flight: Mutex<Option<i64>>,
}

impl SqliteBroker {
    /// Open the queue database and declare the queue, producer side.
    ///
    /// Failure here is fatal at process startup: callers exit rather than
    /// retry.
    pub async fn open(path: impl AsRef<Path>, queue: &str) -> Result<Self, TransportError> {
        let conn = Connection::open(path.as_ref().to_path_buf())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        conn.call(|conn| {
            // The queue file is shared by every scheduler and worker
            // process; WAL plus a busy timeout keep concurrent access
            // waiting instead of failing with SQLITE_BUSY.
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            conn.pragma_update(None, "journal_mode", "wal")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

        debug!(queue, "queue declared");
        Ok(Self {
            conn,
            queue: queue.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            in_flight: Mutex::new(None),
        })
    }

    /// Open the queue as a consumer: messages left unacknowledged by a
    /// crashed consumer are returned to `ready` for redelivery.
    pub async fn open_consumer(path: impl AsRef<Path>, queue: &str) -> Result<Self, TransportError> {
        let broker = Self::open(path, queue).await?;
        let name = broker.queue.clone();
        let recovered = broker
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE messages SET status = 'ready', claimed_at = NULL
                     WHERE queue = ?1 AND status = 'unacked'",
                    [&name],
                )?;
                Ok(n)
            })
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        if recovered > 0 {
            warn!(queue, recovered, "unacknowledged messages requeued");
        }
        Ok(broker)
    }

    /// Set the redelivery budget before dead-lettering.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Dead-lettered message count, for operators and tests.
    pub async fn dead_letter_count(&self) -> Result<usize, TransportError> {
        let name = self.queue.clone();
        self.conn
            .call(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM dead_letters WHERE queue = ?1",
                    [&name],
                    |row| row.get(0),
                )?;
                Ok(n as usize)
            })
            .await
            .map_err(consume_err)
    }
}

#[async_trait]
impl Broker for SqliteBroker {
    async fn publish(&self, item: &WorkItem) -> Result<(), TransportError> {
        let payload = item.to_bytes()?;
        let name = self.queue.clone();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO messages (queue, payload, status, attempts, published_at)
                     VALUES (?1, ?2, 'ready', 0, ?3)",
                    params![name, payload, now],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        debug!(queue = %self.queue, cmd = %item.cmd, "work item published");
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, TransportError> {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.is_some() {
            return Err(TransportError::PrefetchExceeded);
        }

        let name = self.queue.clone();
        let now = Utc::now().to_rfc3339();
        let claimed = self
            .conn
            .call(move |conn| {
                // One statement, so the status check and the claim are
                // atomic: two consumers can never claim the same row.
                let row: Option<(i64, Vec<u8>, u32)> = conn
                    .query_row(
                        "UPDATE messages
                         SET status = 'unacked', attempts = attempts + 1, claimed_at = ?2
                         WHERE id = (SELECT id FROM messages
                                     WHERE queue = ?1 AND status = 'ready'
                                     ORDER BY id LIMIT 1)
                           AND status = 'ready'
                         RETURNING id, payload, attempts",
                        params![name, now],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;
                Ok(row)
            })
            .await
            .map_err(consume_err)?;

        Ok(claimed.map(|(id, payload, attempts)| {
            *in_flight = Some(id);
            Delivery {
                id,
                payload,
                attempts,
            }
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        let mut in_flight = self.in_flight.lock().await;
        if *in_flight != Some(delivery.id) {
            return Err(TransportError::Consume(format!(
                "delivery {} is not in flight",
                delivery.id
            )));
        }

        let id = delivery.id;
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
                Ok(())
            })
            .await
            .map_err(consume_err)?;

        *in_flight = None;
        debug!(queue = %self.queue, id, "delivery acked");
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        let mut in_flight = self.in_flight.lock().await;
        if *in_flight != Some(delivery.id) {
            return Err(TransportError::Consume(format!(
                "delivery {} is not in flight",
                delivery.id
            )));
        }

        let id = delivery.id;
        let exhausted = delivery.attempts >= self.max_attempts;
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if exhausted {
                    tx.execute(
                        "INSERT INTO dead_letters (id, queue, payload, attempts, failed_at)
                         SELECT id, queue, payload, attempts, ?2 FROM messages WHERE id = ?1",
                        params![id, now],
                    )?;
                    tx.execute("DELETE FROM messages WHERE id = ?1", [id])?;
                } else {
                    tx.execute(
                        "UPDATE messages SET status = 'ready', claimed_at = NULL WHERE id = ?1",
                        [id],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(consume_err)?;

        *in_flight = None;
        if exhausted {
            info!(queue = %self.queue, id, attempts = delivery.attempts, "delivery dead-lettered");
        } else {
            debug!(queue = %self.queue, id, attempts = delivery.attempts, "delivery requeued");
        }
        Ok(())
    }

    async fn depth(&self) -> Result<usize, TransportError> {
        let name = self.queue.clone();
        self.conn
            .call(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE queue = ?1 AND status = 'ready'",
                    [&name],
                    |row| row.get(0),
                )?;
                Ok(n as usize)
            })
            .await
            .map_err(consume_err)
    }
}
