//! The persistent store.
//!
//! One `Store` wraps one SQLite database. Timestamps are RFC 3339 UTC
//! strings, which compare correctly as text in SQL.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::params;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use switchyard_core::cron;
use switchyard_core::{DueFire, JobDefinition, PendingFire, ScheduleBinding, StoreError};

use crate::import::ImportedJob;
use crate::schema::init_schema;

/// A schedule binding joined with its job and (optional) pending fire,
/// for the administrative listing.
#[derive(Debug, Clone)]
pub struct ScheduledFire {
    pub binding_id: i64,
    pub job_id: String,
    pub command: String,
    pub cron: String,
    pub fire_at: Option<DateTime<Utc>>,
}

/// SQLite-backed store for jobs, bindings, pending fires and the
/// scheduler lease.
pub struct Store {
    conn: Connection,
}

fn query_err(e: tokio_rusqlite::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Query(format!("bad timestamp '{raw}': {e}")))
}

fn job_from_row(
    id: String,
    command: String,
    description: String,
    pre_hook: Option<String>,
    post_hook: Option<String>,
    args_json: String,
) -> JobDefinition {
    JobDefinition {
        id,
        command,
        description,
        pre_hook,
        post_hook,
        default_args: serde_json::from_str(&args_json).unwrap_or_default(),
    }
}

impl Store {
    /// Open (and initialize) a file-backed store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(path)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::with_conn(conn).await
    }

    /// Open an in-memory store, mainly for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::with_conn(conn).await
    }

    async fn with_conn(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| Ok(init_schema(conn)?))
            .await
            .map_err(query_err)?;
        Ok(Self { conn })
    }

    /// Transactionally delete all jobs, bindings and pending fires, then
    /// insert the replacement set. Import is full-replace, never a merge;
    /// any failure rolls the whole import back.
    pub async fn replace_all_jobs(&self, jobs: Vec<ImportedJob>) -> Result<(), StoreError> {
        let count = jobs.len();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                tx.execute("DELETE FROM pending_fires", [])?;
                tx.execute("DELETE FROM schedules", [])?;
                tx.execute("DELETE FROM jobs", [])?;

                for imported in &jobs {
                    let job = &imported.job;
                    let args = serde_json::to_string(&job.default_args)
                        .unwrap_or_else(|_| "{}".to_string());
                    tx.execute(
                        "INSERT INTO jobs (id, command, description, pre_hook, post_hook, default_args)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![job.id, job.command, job.description, job.pre_hook, job.post_hook, args],
                    )?;
                    for expr in &imported.schedules {
                        tx.execute(
                            "INSERT INTO schedules (job_id, cron) VALUES (?1, ?2)",
                            params![job.id, expr],
                        )?;
                    }
                }

                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(query_err)?;

        info!(jobs = count, "registry replaced");
        Ok(())
    }

    /// All schedule bindings.
    pub async fn list_bindings(&self) -> Result<Vec<ScheduleBinding>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, job_id, cron FROM schedules ORDER BY id")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(ScheduleBinding {
                            id: row.get(0)?,
                            job_id: row.get(1)?,
                            cron: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(query_err)
    }

    /// Insert one pending fire per binding, computed from each binding's
    /// cron expression relative to `now`.
    ///
    /// Not idempotent: running it against a store that already has pending
    /// fires doubles the rows. Callers run it once, right after an import.
    pub async fn init_pending_fires(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let bindings = self.list_bindings().await?;

        let mut fires = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            let next = cron::next_fire(&binding.cron, now)
                .map_err(|e| StoreError::Query(e.to_string()))?;
            fires.push((binding.id, next.to_rfc3339()));
        }

        let count = fires.len();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (binding_id, fire_at) in &fires {
                    tx.execute(
                        "INSERT INTO pending_fires (schedule_id, fire_at) VALUES (?1, ?2)",
                        params![binding_id, fire_at],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(query_err)?;

        info!(fires = count, "pending fires initialized");
        Ok(count)
    }

    /// All pending fires with `fire_at <= now`, joined with their binding
    /// and job definition, earliest first.
    pub async fn due_fires(&self, now: DateTime<Utc>) -> Result<Vec<DueFire>, StoreError> {
        let now_str = now.to_rfc3339();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT f.id, f.schedule_id, f.fire_at,
                            s.job_id, s.cron,
                            j.command, j.description, j.pre_hook, j.post_hook, j.default_args
                     FROM pending_fires f
                     JOIN schedules s ON s.id = f.schedule_id
                     JOIN jobs j ON j.id = s.job_id
                     WHERE f.fire_at <= ?1
                     ORDER BY f.fire_at",
                )?;
                let rows = stmt
                    .query_map([&now_str], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,            // fire id
                            row.get::<_, i64>(1)?,            // schedule id
                            row.get::<_, String>(2)?,         // fire_at
                            row.get::<_, String>(3)?,         // job id
                            row.get::<_, String>(4)?,         // cron
                            row.get::<_, String>(5)?,         // command
                            row.get::<_, String>(6)?,         // description
                            row.get::<_, Option<String>>(7)?, // pre_hook
                            row.get::<_, Option<String>>(8)?, // post_hook
                            row.get::<_, String>(9)?,         // default_args
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(query_err)?;

        let mut due = Vec::with_capacity(rows.len());
        for (fire_id, schedule_id, fire_at, job_id, cron, command, description, pre, post, args) in
            rows
        {
            due.push(DueFire {
                fire: PendingFire {
                    id: fire_id,
                    binding_id: schedule_id,
                    fire_at: parse_ts(&fire_at)?,
                },
                binding: ScheduleBinding {
                    id: schedule_id,
                    job_id: job_id.clone(),
                    cron,
                },
                job: job_from_row(job_id, command, description, pre, post, args),
            });
        }
        Ok(due)
    }

    /// Replace a binding's pending fire: insert the new row, delete the
    /// old one. A single store transaction, but deliberately not atomic
    /// with the publish step that precedes it.
    pub async fn advance_fire(
        &self,
        binding_id: i64,
        old_fire_id: i64,
        next_fire_at: DateTime<Utc>,
    ) -> Result<PendingFire, StoreError> {
        let fire_at = next_fire_at.to_rfc3339();
        let new_id = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO pending_fires (schedule_id, fire_at) VALUES (?1, ?2)",
                    params![binding_id, fire_at],
                )?;
                let new_id = tx.last_insert_rowid();
                tx.execute("DELETE FROM pending_fires WHERE id = ?1", [old_fire_id])?;
                tx.commit()?;
                Ok(new_id)
            })
            .await
            .map_err(query_err)?;

        debug!(binding_id, old_fire_id, new_fire_id = new_id, "fire advanced");
        Ok(PendingFire {
            id: new_id,
            binding_id,
            fire_at: next_fire_at,
        })
    }

    /// Load one job definition by id.
    pub async fn get_job(&self, id: &str) -> Result<JobDefinition, StoreError> {
        let want = id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, command, description, pre_hook, post_hook, default_args
                     FROM jobs WHERE id = ?1",
                )?;
                let mut rows = stmt
                    .query_map([&want], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, String>(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows.pop())
            })
            .await
            .map_err(query_err)?;

        match row {
            Some((id, command, description, pre, post, args)) => {
                Ok(job_from_row(id, command, description, pre, post, args))
            }
            None => Err(StoreError::NotFound(format!("job '{id}'"))),
        }
    }

    /// All job definitions, ordered by id.
    pub async fn list_jobs(&self) -> Result<Vec<JobDefinition>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, command, description, pre_hook, post_hook, default_args
                     FROM jobs ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, String>(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(query_err)?;

        Ok(rows
            .into_iter()
            .map(|(id, c, d, pre, post, a)| job_from_row(id, c, d, pre, post, a))
            .collect())
    }

    /// Schedule bindings joined with their job and pending fire. With
    /// `all` set, bindings without a pending fire (e.g. before `init`)
    /// are included too.
    pub async fn list_scheduled_fires(&self, all: bool) -> Result<Vec<ScheduledFire>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let sql = if all {
                    "SELECT s.id, s.job_id, j.command, s.cron, f.fire_at
                     FROM schedules s
                     JOIN jobs j ON j.id = s.job_id
                     LEFT JOIN pending_fires f ON f.schedule_id = s.id
                     ORDER BY s.id"
                } else {
                    "SELECT s.id, s.job_id, j.command, s.cron, f.fire_at
                     FROM schedules s
                     JOIN jobs j ON j.id = s.job_id
                     JOIN pending_fires f ON f.schedule_id = s.id
                     ORDER BY f.fire_at"
                };
                let mut stmt = conn.prepare(sql)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, Option<String>>(4)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(query_err)?;

        let mut fires = Vec::with_capacity(rows.len());
        for (binding_id, job_id, command, cron, fire_at) in rows {
            let fire_at = match fire_at {
                Some(raw) => Some(parse_ts(&raw)?),
                None => None,
            };
            fires.push(ScheduledFire {
                binding_id,
                job_id,
                command,
                cron,
                fire_at,
            });
        }
        Ok(fires)
    }

    /// Remove one job with its bindings and pending fires.
    pub async fn deregister_job(&self, id: &str) -> Result<(), StoreError> {
        let want = id.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM pending_fires WHERE schedule_id IN
                     (SELECT id FROM schedules WHERE job_id = ?1)",
                    [&want],
                )?;
                tx.execute("DELETE FROM schedules WHERE job_id = ?1", [&want])?;
                let n = tx.execute("DELETE FROM jobs WHERE id = ?1", [&want])?;
                tx.commit()?;
                Ok(n)
            })
            .await
            .map_err(query_err)?;

        if removed == 0 {
            return Err(StoreError::NotFound(format!("job '{id}'")));
        }
        info!(job_id = %id, "job deregistered");
        Ok(())
    }

    /// Remove every job, binding and pending fire.
    pub async fn deregister_all(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM pending_fires", [])?;
                tx.execute("DELETE FROM schedules", [])?;
                tx.execute("DELETE FROM jobs", [])?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(query_err)?;
        info!("all jobs deregistered");
        Ok(())
    }

    /// Acquire or renew the scheduler lease.
    ///
    /// Fails with [`StoreError::LeaseHeld`] while another holder's lease is
    /// unexpired. The same holder re-acquiring renews the expiry.
    pub async fn acquire_lease(
        &self,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let me = holder.to_string();
        let now_str = now.to_rfc3339();
        let expires = (now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()))
            .to_rfc3339();

        let blocked = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<(String, String)> = tx
                    .query_row(
                        "SELECT holder, expires_at FROM scheduler_lease WHERE id = 1",
                        [],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;

                if let Some((other, expires_at)) = existing {
                    if other != me && expires_at.as_str() > now_str.as_str() {
                        return Ok(Some((other, expires_at)));
                    }
                }

                tx.execute(
                    "INSERT OR REPLACE INTO scheduler_lease (id, holder, expires_at)
                     VALUES (1, ?1, ?2)",
                    params![me, expires],
                )?;
                tx.commit()?;
                Ok(None)
            })
            .await
            .map_err(query_err)?;

        match blocked {
            Some((holder, expires_at)) => Err(StoreError::LeaseHeld { holder, expires_at }),
            None => Ok(()),
        }
    }

    /// Release the lease if this holder still owns it.
    pub async fn release_lease(&self, holder: &str) -> Result<(), StoreError> {
        let me = holder.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM scheduler_lease WHERE holder = ?1", [&me])?;
                Ok(())
            })
            .await
            .map_err(query_err)
    }
}
