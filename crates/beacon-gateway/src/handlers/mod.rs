//! Built-in job handlers and the registry the gateway runs with.

pub mod cache_cleanup;
pub mod market;

use std::sync::Arc;
use std::time::Duration;

use beacon_core::BeaconConfig;
use beacon_jobs::{HandlerRegistry, JobHandler, JobPayload, JobScheduler, JobStore, JobType};

use crate::cache::MarketCache;
use cache_cleanup::CacheCleanupHandler;
use market::MarketRefreshHandler;

/// Job types enqueued by one maintenance refresh, in execution order.
/// Cleanup runs last so it sees the entries the refreshes just wrote.
pub const REFRESH_SET: [JobType; 6] = [
    JobType::UpdateTopCoins,
    JobType::UpdateGlobalData,
    JobType::UpdateNews,
    JobType::UpdateMacroMarketData,
    JobType::UpdateCryptoMarketData,
    JobType::CacheCleanup,
];

/// Wire every built-in handler against the shared cache and job store.
pub fn build_registry(
    config: &BeaconConfig,
    cache: MarketCache,
    jobs: Arc<dyn JobStore>,
) -> anyhow::Result<HandlerRegistry> {
    let market: Arc<dyn JobHandler> = Arc::new(MarketRefreshHandler::new(
        config.market.clone(),
        cache.clone(),
        Duration::from_secs(config.cache.ttl_secs),
    )?);

    let registry = REFRESH_SET
        .into_iter()
        .filter(|t| *t != JobType::CacheCleanup)
        .fold(HandlerRegistry::new(), |r, t| r.register_arc(t, market.clone()))
        .register(
            JobType::CacheCleanup,
            CacheCleanupHandler::new(cache, jobs, config.cache.job_retention_hours),
        );
    Ok(registry)
}

/// Enqueue [`REFRESH_SET`] due now. Returns the new job ids.
pub fn schedule_refresh_set(scheduler: &JobScheduler) -> beacon_jobs::Result<Vec<String>> {
    REFRESH_SET
        .into_iter()
        .map(|t| scheduler.schedule(JobPayload::empty(t), None))
        .collect()
}
