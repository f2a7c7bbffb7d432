//! Database schema management.

use rusqlite::Connection;
use tokio_rusqlite::Error;

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = r#"
-- Job definitions, replaced wholesale by the administrative import
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    command TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    pre_hook TEXT,
    post_hook TEXT,
    default_args TEXT NOT NULL DEFAULT '{}'
);

-- Cron expressions bound to jobs, many-to-one
CREATE TABLE IF NOT EXISTS schedules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    cron TEXT NOT NULL,
    FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
);

-- Exactly one outstanding next-execution instant per binding
CREATE TABLE IF NOT EXISTS pending_fires (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    schedule_id INTEGER NOT NULL,
    fire_at TEXT NOT NULL,
    FOREIGN KEY (schedule_id) REFERENCES schedules(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_schedules_job ON schedules(job_id);
CREATE INDEX IF NOT EXISTS idx_pending_fires_at ON pending_fires(fire_at);

-- Advisory lock: at most one active scheduler instance
CREATE TABLE IF NOT EXISTS scheduler_lease (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    holder TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
"#;
