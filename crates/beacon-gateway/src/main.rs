use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use beacon_core::BeaconConfig;
use beacon_jobs::{JobScheduler, JobStatus, JobStore, SqliteJobStore};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

mod app;
mod auth;
mod cache;
mod handlers;
mod http;
mod poller;

#[derive(Parser)]
#[command(name = "beacon", version, about = "Background job scheduler for market data")]
struct Cli {
    /// Config file (default: $BEACON_CONFIG, then ~/.beacon/beacon.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the cron/job HTTP API
    Serve {
        /// Also process due jobs in-process every N seconds
        #[arg(long, value_name = "SECS")]
        poll: Option<u64>,
    },
    /// Enqueue one job
    Schedule {
        /// Job type, e.g. update_top_coins
        job_type: String,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
        /// Run at this RFC 3339 instant
        #[arg(long, conflicts_with = "in_secs")]
        at: Option<DateTime<Utc>>,
        /// Run this many seconds from now
        #[arg(long)]
        in_secs: Option<i64>,
    },
    /// Run every due job once
    Process,
    /// List jobs, most recently scheduled first
    List {
        #[arg(long)]
        status: Option<JobStatus>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show one job
    Show { id: String },
    /// Job counts by status
    Stats,
    /// Delete completed/failed jobs older than the retention window
    Purge {
        /// Defaults to cache.job_retention_hours
        #[arg(long)]
        older_than_hours: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "beacon_gateway=info,beacon_jobs=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > BEACON_CONFIG env > ~/.beacon/beacon.toml
    let config_path = cli.config.clone().or_else(|| std::env::var("BEACON_CONFIG").ok());
    let config = BeaconConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        BeaconConfig::default()
    });

    let scheduler = open_scheduler(&config)?;

    match cli.command {
        Command::Serve { poll } => serve(config, scheduler, poll).await?,
        Command::Schedule {
            job_type,
            payload,
            at,
            in_secs,
        } => {
            let payload = match payload {
                Some(raw) => serde_json::from_str(&raw).context("--payload is not valid JSON")?,
                None => serde_json::Value::Null,
            };
            let scheduled_for = match (at, in_secs) {
                (Some(at), _) => Some(at),
                (None, Some(secs)) => Some(
                    chrono::Duration::try_seconds(secs)
                        .and_then(|d| Utc::now().checked_add_signed(d))
                        .context("--in-secs is out of range")?,
                ),
                (None, None) => None,
            };
            let id = scheduler.schedule_job(&job_type, payload, scheduled_for)?;
            print_json(&serde_json::json!({ "id": id }))?;
        }
        Command::Process => print_json(&scheduler.process_pending_jobs_report().await?)?,
        Command::List { status, limit } => print_json(&scheduler.list_jobs(status, limit)?)?,
        Command::Show { id } => print_json(&scheduler.get_job(&id)?)?,
        Command::Stats => print_json(&scheduler.stats()?)?,
        Command::Purge { older_than_hours } => {
            let hours = older_than_hours.unwrap_or(config.cache.job_retention_hours);
            let cutoff = i64::try_from(hours)
                .ok()
                .and_then(chrono::Duration::try_hours)
                .and_then(|d| Utc::now().checked_sub_signed(d))
                .context("--older-than-hours is out of range")?;
            let purged = scheduler.purge_finished(cutoff)?;
            print_json(&serde_json::json!({ "purged": purged }))?;
        }
    }
    Ok(())
}

/// Open the database and wire the scheduler with the built-in handlers.
fn open_scheduler(config: &BeaconConfig) -> anyhow::Result<JobScheduler> {
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    // each subsystem gets its own connection; WAL lets them share the file
    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::open(db_path)?);
    let cache_conn = rusqlite::Connection::open(db_path)?;
    cache_conn.execute_batch("PRAGMA busy_timeout=5000;")?;
    let cache = cache::MarketCache::new(cache_conn)?;

    let registry = handlers::build_registry(config, cache, store.clone())?;
    Ok(JobScheduler::new(store, registry).with_config(&config.scheduler))
}

async fn serve(config: BeaconConfig, scheduler: JobScheduler, poll: Option<u64>) -> anyhow::Result<()> {
    if poll == Some(0) {
        bail!("--poll must be at least 1 second");
    }
    if config.server.cron_secret.is_none() {
        tracing::warn!("server.cron_secret is not set; /api routes are unauthenticated");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let state = Arc::new(app::AppState::new(config, scheduler));
    let router = app::build_router(state.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    if let Some(secs) = poll {
        tokio::spawn(poller::run(state, Duration::from_secs(secs), shutdown_rx));
    }

    info!("Beacon gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // signal poller to stop
    let _ = shutdown_tx.send(true);
    Ok(())
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
