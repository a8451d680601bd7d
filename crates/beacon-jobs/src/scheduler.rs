use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use beacon_core::config::SchedulerConfig;
use chrono::{DateTime, SubsecRound, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::error::{JobError, Result};
use crate::registry::HandlerRegistry;
use crate::store::JobStore;
use crate::types::{Job, JobPayload, JobStats, JobStatus, JobType};

/// Outcome of one processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    /// Jobs this pass claimed and ran.
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Selected jobs this pass did not run: claim lost to another caller, the
    /// claim itself hit a store error, or the row was not due yet.
    pub skipped: usize,
}

/// Stateless façade over the job table.
///
/// Holds no in-process queue or lock: all coordination between overlapping
/// triggers goes through [`JobStore::claim`].
pub struct JobScheduler {
    store: Arc<dyn JobStore>,
    registry: HandlerRegistry,
    handler_timeout: Duration,
    batch_limit: Option<u32>,
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("registry", &self.registry)
            .field("handler_timeout", &self.handler_timeout)
            .field("batch_limit", &self.batch_limit)
            .finish()
    }
}

impl JobScheduler {
    pub fn new(store: Arc<dyn JobStore>, registry: HandlerRegistry) -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            store,
            registry,
            handler_timeout: Duration::from_secs(defaults.handler_timeout_secs),
            batch_limit: defaults.batch_limit,
        }
    }

    /// Apply the `[scheduler]` config section.
    pub fn with_config(self, config: &SchedulerConfig) -> Self {
        self.handler_timeout(Duration::from_secs(config.handler_timeout_secs))
            .batch_limit(config.batch_limit)
    }

    /// Deadline for a single handler invocation.
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Cap on how many due jobs one processing pass selects.
    pub fn batch_limit(mut self, limit: Option<u32>) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Enqueue a job from untyped input (HTTP body, CLI arguments).
    ///
    /// Fails with `InvalidJobType` for unknown or unregistered types and
    /// `InvalidPayload` when `payload` does not fit the type or
    /// `scheduled_for` is outside years 0000-9999; none of these writes a
    /// row. `scheduled_for` defaults to now.
    pub fn schedule_job(
        &self,
        job_type: &str,
        payload: Value,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let job_type: JobType = job_type.parse()?;
        let payload = JobPayload::decode(job_type, payload)?;
        self.schedule(payload, scheduled_for)
    }

    /// Enqueue a typed job.
    #[instrument(skip(self, payload), fields(job_type = %payload.job_type()))]
    pub fn schedule(
        &self,
        payload: JobPayload,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let job_type = payload.job_type();
        if !self.registry.contains(job_type) {
            warn!("no handler registered");
            return Err(JobError::InvalidJobType(job_type.to_string()));
        }

        // "now" is truncated so an immediate job is due on the next pass
        let scheduled_for = scheduled_for.unwrap_or_else(|| Utc::now().trunc_subsecs(6));
        let job = Job::new(&payload, scheduled_for)?;
        self.store.insert(&job)?;

        info!(job_id = %job.id, scheduled_for = %job.scheduled_for, "job scheduled");
        Ok(job.id)
    }

    /// Claim and run every job that is currently due.
    ///
    /// Returns how many jobs were claimed and run, whatever their outcome.
    pub async fn process_pending_jobs(&self) -> Result<usize> {
        Ok(self.process_pending_jobs_report().await?.processed)
    }

    /// Like [`Self::process_pending_jobs`], with a per-outcome breakdown.
    ///
    /// Only a failure to list due jobs is returned as `Err`; anything that
    /// goes wrong with an individual job is recorded on that job and the
    /// batch continues.
    pub async fn process_pending_jobs_report(&self) -> Result<ProcessReport> {
        let now = Utc::now();
        let due = self.store.due(now, self.batch_limit)?;
        let mut report = ProcessReport::default();

        if due.is_empty() {
            debug!("no due jobs");
            return Ok(report);
        }
        debug!(count = due.len(), "due jobs selected");

        for job in due {
            if !job.is_due(now) {
                warn!(job_id = %job.id, scheduled_for = %job.scheduled_for, "store returned a job that is not due");
                report.skipped += 1;
                continue;
            }
            let span = tracing::info_span!("job", job.id = %job.id, job.type = %job.job_type);
            match self.process_one(&job).instrument(span).await {
                Outcome::Completed => {
                    report.processed += 1;
                    report.completed += 1;
                }
                Outcome::Failed => {
                    report.processed += 1;
                    report.failed += 1;
                }
                Outcome::Skipped => report.skipped += 1,
            }
        }

        info!(
            processed = report.processed,
            completed = report.completed,
            failed = report.failed,
            skipped = report.skipped,
            "processing pass finished"
        );
        Ok(report)
    }

    async fn process_one(&self, job: &Job) -> Outcome {
        match self.store.claim(&job.id, Utc::now()) {
            Ok(true) => {}
            Ok(false) => {
                debug!("claim lost to another caller");
                return Outcome::Skipped;
            }
            Err(e) => {
                error!(error = %e, "claim failed");
                return Outcome::Skipped;
            }
        }

        let result = self.execute(job).await;

        let error = match result {
            Ok(()) => match self.store.complete(&job.id, Utc::now()) {
                Ok(true) => {
                    info!("job completed");
                    return Outcome::Completed;
                }
                Ok(false) => {
                    // Nobody else transitions a processing row; treat as a store fault.
                    error!("job left processing state while its handler ran");
                    return Outcome::Failed;
                }
                Err(e) => {
                    error!(error = %e, "failed to record completion");
                    e.to_string()
                }
            },
            Err(e) => {
                warn!(error = %e, "job failed");
                e.to_string()
            }
        };

        if let Err(e) = self.store.fail(&job.id, &error, Utc::now()) {
            error!(error = %e, "failed to record job failure");
        }
        Outcome::Failed
    }

    async fn execute(&self, job: &Job) -> Result<()> {
        let payload = job.decode_payload()?;
        let handler = self
            .registry
            .get(payload.job_type())
            .ok_or_else(|| JobError::InvalidJobType(job.job_type.clone()))?;

        debug!("running handler");
        let run = AssertUnwindSafe(handler.run(&payload)).catch_unwind();

        match tokio::time::timeout(self.handler_timeout, run).await {
            Err(_) => Err(JobError::HandlerTimeout {
                ms: u64::try_from(self.handler_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Ok(Err(panic)) => Err(JobError::Handler(panic_message(&*panic))),
            Ok(Ok(Err(e))) => Err(JobError::Handler(format!("{e:#}"))),
            Ok(Ok(Ok(()))) => Ok(()),
        }
    }

    pub fn get_job(&self, id: &str) -> Result<Job> {
        self.store
            .get(id)?
            .ok_or_else(|| JobError::JobNotFound { id: id.to_string() })
    }

    pub fn list_jobs(&self, status: Option<JobStatus>, limit: u32) -> Result<Vec<Job>> {
        self.store.list(status, limit)
    }

    pub fn stats(&self) -> Result<JobStats> {
        self.store.stats()
    }

    /// Delete completed/failed rows not updated since `older_than`.
    pub fn purge_finished(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let n = self.store.purge_finished(older_than)?;
        info!(count = n, cutoff = %older_than, "finished jobs purged");
        Ok(n)
    }
}

enum Outcome {
    Completed,
    Failed,
    Skipped,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
