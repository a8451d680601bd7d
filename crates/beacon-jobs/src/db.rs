use rusqlite::Connection;

use crate::error::{JobError, Result};

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `background_jobs` table (idempotent) and a composite index on
/// `(status, scheduled_for)` so the due-jobs query stays an index range scan.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS background_jobs (
            id             TEXT NOT NULL PRIMARY KEY,
            job_type       TEXT NOT NULL,
            payload        TEXT NOT NULL,   -- JSON object, shape depends on job_type
            status         TEXT NOT NULL DEFAULT 'pending',
            scheduled_for  TEXT NOT NULL,   -- RFC 3339 UTC, fixed precision
            error          TEXT,            -- set only when status = 'failed'
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_background_jobs_due
            ON background_jobs (status, scheduled_for);
        ",
    )
    .map_err(JobError::StoreWrite)?;
    Ok(())
}
