use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::app::AppState;

/// In-process cron: runs a processing pass every `every` until `shutdown`
/// broadcasts `true`.
///
/// Safe to run next to external triggers; both go through the same claim.
pub async fn run(state: Arc<AppState>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    info!(every_secs = every.as_secs(), "job poller started");

    let mut interval = tokio::time::interval(every);
    // a slow pass must not queue a burst of catch-up ticks
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = state.scheduler.process_pending_jobs().await {
                    error!(code = e.code(), "poller pass failed: {e}");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("job poller shutting down");
                    break;
                }
            }
        }
    }
}
