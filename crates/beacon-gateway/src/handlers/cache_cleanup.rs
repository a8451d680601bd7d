use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use beacon_jobs::{JobHandler, JobPayload, JobStore};
use chrono::{Duration, Utc};
use tracing::info;

use crate::cache::MarketCache;

/// Drops expired `market_cache` entries and old completed/failed job rows.
pub struct CacheCleanupHandler {
    cache: MarketCache,
    jobs: Arc<dyn JobStore>,
    retention_hours: u64,
}

impl CacheCleanupHandler {
    pub fn new(cache: MarketCache, jobs: Arc<dyn JobStore>, retention_hours: u64) -> Self {
        Self {
            cache,
            jobs,
            retention_hours,
        }
    }
}

#[async_trait]
impl JobHandler for CacheCleanupHandler {
    async fn run(&self, payload: &JobPayload) -> anyhow::Result<()> {
        let JobPayload::CacheCleanup(p) = payload else {
            return Err(anyhow!("{} is not a cache cleanup", payload.job_type()));
        };
        let now = Utc::now();
        let hours = p.retention_hours.unwrap_or(self.retention_hours);
        let cutoff = i64::try_from(hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|d| now.checked_sub_signed(d))
            .ok_or_else(|| anyhow!("retention of {hours}h is out of range"))?;

        let entries = self.cache.purge_expired(now)?;
        let jobs = self.jobs.purge_finished(cutoff)?;
        info!(entries, jobs, cutoff = %cutoff, "cache cleanup finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_jobs::{CacheCleanupPayload, Job, JobType, SqliteJobStore};
    use rusqlite::Connection;
    use serde_json::json;

    fn finished_job(store: &SqliteJobStore, hours_ago: i64) -> String {
        let at = Utc::now() - Duration::hours(hours_ago);
        let job = Job::new(&JobPayload::empty(JobType::UpdateNews), at).unwrap();
        store.insert(&job).unwrap();
        store.claim(&job.id, at).unwrap();
        store.complete(&job.id, at).unwrap();
        job.id
    }

    #[tokio::test]
    async fn purges_expired_entries_and_old_rows() {
        let cache = MarketCache::new(Connection::open_in_memory().unwrap()).unwrap();
        let store = SqliteJobStore::open_in_memory().unwrap();
        let now = Utc::now();
        cache
            .put("stale", &json!(1), std::time::Duration::from_secs(1), now - Duration::hours(1))
            .unwrap();
        cache
            .put("fresh", &json!(2), std::time::Duration::from_secs(600), now)
            .unwrap();
        let old = finished_job(&store, 48);
        let recent = finished_job(&store, 1);

        let handler = CacheCleanupHandler::new(cache.clone(), Arc::new(store.clone()), 24);
        handler
            .run(&JobPayload::CacheCleanup(CacheCleanupPayload::default()))
            .await
            .unwrap();

        assert!(cache.get_fresh("fresh", now).unwrap().is_some());
        assert_eq!(cache.purge_expired(now).unwrap(), 0);
        assert!(store.get(&old).unwrap().is_none());
        assert!(store.get(&recent).unwrap().is_some());
    }

    #[tokio::test]
    async fn payload_overrides_retention() {
        let cache = MarketCache::new(Connection::open_in_memory().unwrap()).unwrap();
        let store = SqliteJobStore::open_in_memory().unwrap();
        let recent = finished_job(&store, 2);

        let handler = CacheCleanupHandler::new(cache, Arc::new(store.clone()), 168);
        handler
            .run(&JobPayload::CacheCleanup(CacheCleanupPayload {
                retention_hours: Some(1),
            }))
            .await
            .unwrap();

        assert!(store.get(&recent).unwrap().is_none());
    }
}
