//! `beacon-jobs`: background job scheduler backed by a SQLite row store.
//!
//! # Overview
//!
//! Jobs are persisted to the `background_jobs` table, which is both the queue
//! and the execution log. Nothing in this crate runs on its own: an external
//! trigger (cron route, CLI) calls [`JobScheduler::schedule_job`] to enqueue
//! work and [`JobScheduler::process_pending_jobs`] to claim and run whatever
//! is due.
//!
//! # Job lifecycle
//!
//! | Status       | Meaning                                              |
//! |--------------|------------------------------------------------------|
//! | `pending`    | Waiting for `scheduled_for` to elapse                |
//! | `processing` | Claimed by one processing pass, handler running      |
//! | `completed`  | Handler returned `Ok` (terminal)                     |
//! | `failed`     | Handler errored, panicked or timed out (terminal)    |
//!
//! A job is claimed with a single guarded `UPDATE … WHERE status = 'pending'`,
//! so overlapping processing passes never run the same job twice. Failed jobs
//! are not retried; schedule a new job instead.

pub mod db;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod types;

pub use error::{JobError, Result};
pub use registry::{HandlerRegistry, JobHandler};
pub use scheduler::{JobScheduler, ProcessReport};
pub use store::{JobStore, SqliteJobStore};
pub use types::{
    CacheCleanupPayload, Job, JobPayload, JobStats, JobStatus, JobType, NewsPayload,
    RefreshPayload, TopCoinsPayload,
};
