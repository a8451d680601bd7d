use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{JobPayload, JobType};

/// Performs the work named by a job type.
///
/// Handlers are responsible for their own side effects (cache writes,
/// upstream calls). Returning `Err` marks the job `failed` with the error's
/// display text; the scheduler never retries.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, payload: &JobPayload) -> anyhow::Result<()>;
}

/// Static `JobType → handler` mapping, built once and handed to the scheduler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `job_type`, replacing any previous one.
    pub fn register(self, job_type: JobType, handler: impl JobHandler + 'static) -> Self {
        self.register_arc(job_type, Arc::new(handler))
    }

    /// Register a shared handler, e.g. one instance serving several types.
    pub fn register_arc(mut self, job_type: JobType, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(job_type, handler);
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    /// Registered types in declaration order.
    pub fn job_types(&self) -> Vec<JobType> {
        JobType::ALL
            .into_iter()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }
}
