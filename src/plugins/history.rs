//! Read side of the external run-history store.
//!
//! Handlers elsewhere in the suite write this table after every attempt;
//! the dispatcher only ever reads it, to build retry work items.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::Connection;

use switchyard_core::{HookError, RunHistory, RunRecord};

pub(crate) struct SqliteRunHistory {
    conn: Connection,
}

impl SqliteRunHistory {
    pub(crate) async fn open(path: impl AsRef<Path>) -> Result<Self, HookError> {
        let conn = Connection::open(path.as_ref().to_path_buf())
            .await
            .map_err(|e| HookError::Collaborator(e.to_string()))?;
        Ok(Self { conn })
    }
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

#[async_trait]
impl RunHistory for SqliteRunHistory {
    async fn records_for(&self, command: &str) -> Result<Vec<RunRecord>, HookError> {
        let want = command.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT device, command, last_attempt, last_success, passed, message
                     FROM run_history WHERE command = ?1 ORDER BY device",
                )?;
                let rows = stmt
                    .query_map([&want], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, bool>(4)?,
                            row.get::<_, String>(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(|e| HookError::Collaborator(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(
                |(device, command, attempt, success, passed, message)| RunRecord {
                    device,
                    command,
                    last_attempt: parse_ts(&attempt),
                    last_success: success.as_deref().map(parse_ts),
                    passed,
                    message,
                },
            )
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_records_written_by_handlers() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("history.db");

        // Simulate a handler having written its table.
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE run_history (
                     device TEXT, command TEXT, last_attempt TEXT,
                     last_success TEXT, passed INTEGER, message TEXT
                 );
                 INSERT INTO run_history VALUES
                     ('sw1', 'config-backup', '2024-03-01T02:30:00+00:00',
                      '2024-03-01T02:30:00+00:00', 1, 'ok'),
                     ('sw2', 'config-backup', '2024-03-01T02:30:00+00:00',
                      NULL, 0, 'ssh timeout');",
            )
            .unwrap();
        }

        let history = SqliteRunHistory::open(&path).await.unwrap();
        let records = history.records_for("config-backup").await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].passed);
        assert!(!records[1].passed);
        assert!(records[1].last_success.is_none());

        assert!(history.records_for("render-configs").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_table_is_a_collaborator_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let history = SqliteRunHistory::open(dir.path().join("empty.db"))
            .await
            .unwrap();
        assert!(matches!(
            history.records_for("config-backup").await,
            Err(HookError::Collaborator(_))
        ));
    }
}
