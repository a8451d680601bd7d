use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, error, instrument, warn};

use crate::db::init_db;
use crate::error::{JobError, Result};
use crate::types::{Job, JobStats, JobStatus};

/// Durable storage for job rows.
///
/// Every status transition is a conditional write guarded by the expected
/// current status, so the store alone decides which caller wins a race.
/// Implementations backed by a store without predicate updates must emulate
/// the same compare-and-swap (e.g. with a version column).
pub trait JobStore: Send + Sync {
    /// Insert a new row. Either the whole row is written or nothing is.
    fn insert(&self, job: &Job) -> Result<()>;

    /// Pending rows with `scheduled_for <= now`, oldest first.
    ///
    /// A selected row that cannot be decoded is moved to `failed` so it stops
    /// occupying the selection window.
    fn due(&self, now: DateTime<Utc>, limit: Option<u32>) -> Result<Vec<Job>>;

    /// `pending → processing`. `Ok(false)` means another caller got there first.
    fn claim(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// `processing → completed`. `Ok(false)` if the row was not processing.
    fn complete(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// `processing → failed`, recording `error`. `Ok(false)` if the row was not processing.
    fn fail(&self, id: &str, error: &str, now: DateTime<Utc>) -> Result<bool>;

    fn get(&self, id: &str) -> Result<Option<Job>>;

    /// Most recently scheduled first, optionally filtered by status.
    fn list(&self, status: Option<JobStatus>, limit: u32) -> Result<Vec<Job>>;

    fn stats(&self) -> Result<JobStats>;

    /// Delete completed/failed rows last updated before `older_than`.
    fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<usize>;
}

const JOB_COLUMNS: &str =
    "id, job_type, payload, status, scheduled_for, error, created_at, updated_at";

/// [`JobStore`] over a single SQLite connection.
///
/// The connection sits behind a `Mutex` that is held for one statement at a
/// time and never across an `.await`. Cloning shares the connection; several
/// processes can point separate stores at the same database file.
#[derive(Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open (or create) a database file with WAL enabled.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(JobError::StoreWrite)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(JobError::StoreWrite)?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory().map_err(JobError::StoreWrite)?)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the guard cannot leave a statement half-applied.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(
        &self,
        id: &str,
        from: JobStatus,
        to: JobStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let n = self
            .conn()
            .execute(
                "UPDATE background_jobs SET status = ?1, error = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![to.as_str(), error, format_ts(now), id, from.as_str()],
            )
            .map_err(JobError::StoreWrite)?;
        Ok(n == 1)
    }
}

impl JobStore for SqliteJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type))]
    fn insert(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_string(&job.payload)?;
        self.conn()
            .execute(
                "INSERT INTO background_jobs
                 (id, job_type, payload, status, scheduled_for, error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    job.id,
                    job.job_type,
                    payload,
                    job.status.as_str(),
                    format_ts(job.scheduled_for),
                    job.error,
                    format_ts(job.created_at),
                    format_ts(job.updated_at),
                ],
            )
            .map_err(JobError::StoreWrite)?;
        debug!("job row inserted");
        Ok(())
    }

    #[instrument(skip(self))]
    fn due(&self, now: DateTime<Utc>, limit: Option<u32>) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT {JOB_COLUMNS} FROM background_jobs
                 WHERE status = 'pending' AND scheduled_for <= ?1
                 ORDER BY scheduled_for ASC, created_at ASC, id ASC
                 LIMIT ?2"
            ))
            .map_err(JobError::StoreRead)?;
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map_or(-1, i64::from);
        let rows = stmt
            .query_map(params![format_ts(now), limit], |row| {
                Ok((row.get::<_, String>(0)?, row_to_job(row)))
            })
            .map_err(JobError::StoreRead)?;

        let mut jobs = Vec::new();
        let mut unreadable = Vec::new();
        for row in rows {
            match row.map_err(JobError::StoreRead)? {
                (_, Ok(job)) => jobs.push(job),
                (id, Err(e)) => {
                    warn!(job_id = %id, error = %e, "unreadable due job row, marking failed");
                    unreadable.push((id, format!("Unreadable job row: {e}")));
                }
            }
        }
        drop(stmt);

        for (id, message) in unreadable {
            if let Err(e) = conn.execute(
                "UPDATE background_jobs SET status = 'failed', error = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'pending'",
                params![message, format_ts(now), id],
            ) {
                error!(job_id = %id, error = %e, "failed to mark unreadable job row");
            }
        }
        Ok(jobs)
    }

    #[instrument(skip(self))]
    fn claim(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.transition(id, JobStatus::Pending, JobStatus::Processing, None, now)
    }

    #[instrument(skip(self))]
    fn complete(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.transition(id, JobStatus::Processing, JobStatus::Completed, None, now)
    }

    #[instrument(skip(self, error))]
    fn fail(&self, id: &str, error: &str, now: DateTime<Utc>) -> Result<bool> {
        self.transition(id, JobStatus::Processing, JobStatus::Failed, Some(error), now)
    }

    fn get(&self, id: &str) -> Result<Option<Job>> {
        self.conn()
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM background_jobs WHERE id = ?1"),
                [id],
                row_to_job,
            )
            .optional()
            .map_err(JobError::StoreRead)
    }

    fn list(&self, status: Option<JobStatus>, limit: u32) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM background_jobs
                 WHERE ?1 IS NULL OR status = ?1
                 ORDER BY scheduled_for DESC, created_at DESC
                 LIMIT ?2"
            ))
            .map_err(JobError::StoreRead)?;
        let jobs = stmt
            .query_map(params![status.map(|s| s.as_str()), limit], row_to_job)
            .map_err(JobError::StoreRead)?
            .filter_map(|r| match r {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable job row");
                    None
                }
            })
            .collect();
        Ok(jobs)
    }

    fn stats(&self) -> Result<JobStats> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM background_jobs GROUP BY status")
            .map_err(JobError::StoreRead)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(JobError::StoreRead)?;

        let mut stats = JobStats::default();
        for row in rows {
            let (status, count) = row.map_err(JobError::StoreRead)?;
            let count = u64::try_from(count).unwrap_or(0);
            match status.parse::<JobStatus>() {
                Ok(JobStatus::Pending) => stats.pending = count,
                Ok(JobStatus::Processing) => stats.processing = count,
                Ok(JobStatus::Completed) => stats.completed = count,
                Ok(JobStatus::Failed) => stats.failed = count,
                Err(e) => warn!("ignoring rows with {e}"),
            }
        }
        Ok(stats)
    }

    #[instrument(skip(self))]
    fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let n = self
            .conn()
            .execute(
                "DELETE FROM background_jobs
                 WHERE status IN ('completed', 'failed') AND updated_at < ?1",
                [format_ts(older_than)],
            )
            .map_err(JobError::StoreWrite)?;
        if n > 0 {
            debug!(count = n, "purged finished jobs");
        }
        Ok(n)
    }
}

/// Fixed-width RFC 3339 (`2026-01-02T03:04:05.123456Z`) so that string
/// comparison in SQL matches chronological order.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let payload: String = row.get(2)?;
    let payload = serde_json::from_str(&payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let status: String = row.get(3)?;
    let status = status.parse::<JobStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(Job {
        id: row.get(0)?,
        job_type: row.get(1)?,
        payload,
        status,
        scheduled_for: parse_ts(row, 4)?,
        error: row.get(5)?,
        created_at: parse_ts(row, 6)?,
        updated_at: parse_ts(row, 7)?,
    })
}
