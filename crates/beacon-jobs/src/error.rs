use thiserror::Error;

/// Errors that can occur within the job scheduler.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job type is not a known [`JobType`](crate::JobType), or no handler
    /// is registered for it.
    #[error("Invalid job type: {0}")]
    InvalidJobType(String),

    /// The payload does not fit the shape expected by its job type.
    #[error("Invalid payload for {job_type}: {reason}")]
    InvalidPayload { job_type: String, reason: String },

    /// An insert or status update against the store failed.
    #[error("Store write failed: {0}")]
    StoreWrite(#[source] rusqlite::Error),

    /// A query against the store failed.
    #[error("Store read failed: {0}")]
    StoreRead(#[source] rusqlite::Error),

    /// The handler returned an error or panicked.
    #[error("Handler failed: {0}")]
    Handler(String),

    /// The handler did not finish within the configured deadline.
    #[error("Handler timed out after {ms}ms")]
    HandlerTimeout { ms: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },
}

impl JobError {
    /// Short error code string returned to trigger callers.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::InvalidJobType(_) => "INVALID_JOB_TYPE",
            JobError::InvalidPayload { .. } => "INVALID_PAYLOAD",
            JobError::StoreWrite(_) => "STORE_WRITE_ERROR",
            JobError::StoreRead(_) => "STORE_READ_ERROR",
            JobError::Handler(_) => "HANDLER_ERROR",
            JobError::HandlerTimeout { .. } => "HANDLER_TIMEOUT",
            JobError::Serialization(_) => "SERIALIZATION_ERROR",
            JobError::JobNotFound { .. } => "JOB_NOT_FOUND",
        }
    }

    /// True when the caller supplied something wrong, as opposed to a
    /// failure inside the store or a handler.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            JobError::InvalidJobType(_) | JobError::InvalidPayload { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
