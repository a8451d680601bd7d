use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 300; // hung upstream calls must not pin a cron run
pub const DEFAULT_CACHE_TTL_SECS: u64 = 600;
pub const DEFAULT_JOB_RETENTION_HOURS: u64 = 168; // one week of execution log
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Top-level config (beacon.toml + BEACON_* env overrides).
///
/// Every section is optional so an empty or missing file yields a working
/// local setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeaconConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub market: MarketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Shared secret expected as `Authorization: Bearer <secret>` on /api/*.
    /// When unset the routes are open; only do that on a private network.
    pub cron_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            cron_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on a single handler invocation.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    /// Maximum number of due jobs selected by one processing pass.
    /// `None` selects everything that is due.
    #[serde(default)]
    pub batch_limit: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            handler_timeout_secs: DEFAULT_HANDLER_TIMEOUT_SECS,
            batch_limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of a market data entry written by a refresh job.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Completed/failed job rows older than this are purged by `cache_cleanup`.
    #[serde(default = "default_job_retention_hours")]
    pub job_retention_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            job_retention_hours: DEFAULT_JOB_RETENTION_HOURS,
        }
    }
}

/// Upstream endpoints polled by the market refresh jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_top_coins_url")]
    pub top_coins_url: String,
    #[serde(default = "default_global_data_url")]
    pub global_data_url: String,
    #[serde(default = "default_news_url")]
    pub news_url: String,
    #[serde(default = "default_macro_market_url")]
    pub macro_market_url: String,
    #[serde(default = "default_crypto_market_url")]
    pub crypto_market_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            top_coins_url: default_top_coins_url(),
            global_data_url: default_global_data_url(),
            news_url: default_news_url(),
            macro_market_url: default_macro_market_url(),
            crypto_market_url: default_crypto_market_url(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_handler_timeout_secs() -> u64 {
    DEFAULT_HANDLER_TIMEOUT_SECS
}
fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}
fn default_job_retention_hours() -> u64 {
    DEFAULT_JOB_RETENTION_HOURS
}
fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_top_coins_url() -> String {
    "https://api.coingecko.com/api/v3/coins/markets?vs_currency=usd&order=market_cap_desc&page=1"
        .to_string()
}
fn default_global_data_url() -> String {
    "https://api.coingecko.com/api/v3/global".to_string()
}
fn default_news_url() -> String {
    "https://min-api.cryptocompare.com/data/v2/news/?lang=EN".to_string()
}
fn default_macro_market_url() -> String {
    "https://api.coingecko.com/api/v3/exchange_rates".to_string()
}
fn default_crypto_market_url() -> String {
    "https://api.coingecko.com/api/v3/simple/price?ids=bitcoin,ethereum,solana&vs_currencies=usd&include_24hr_change=true"
        .to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.beacon/beacon.db", home)
}

impl BeaconConfig {
    /// Load config from a TOML file with BEACON_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `BEACON_SERVER__CRON_SECRET` or `BEACON_SCHEDULER__HANDLER_TIMEOUT_SECS`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::extract(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("BEACON_").split("__")),
        )
    }

    /// Parse config from an in-memory TOML document (no env overrides).
    pub fn from_toml_str(toml: &str) -> crate::error::Result<Self> {
        Self::extract(Figment::new().merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::BeaconError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.beacon/beacon.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = BeaconConfig::from_toml_str("").expect("empty config should parse");
        assert_eq!(cfg.server.port, DEFAULT_PORT);
        assert_eq!(cfg.server.bind, DEFAULT_BIND);
        assert!(cfg.server.cron_secret.is_none());
        assert_eq!(cfg.scheduler.handler_timeout_secs, DEFAULT_HANDLER_TIMEOUT_SECS);
        assert!(cfg.scheduler.batch_limit.is_none());
        assert_eq!(cfg.cache.ttl_secs, DEFAULT_CACHE_TTL_SECS);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let cfg = BeaconConfig::from_toml_str(
            r#"
            [server]
            port = 9000
            cron_secret = "s3cret"

            [scheduler]
            handler_timeout_secs = 30
            batch_limit = 50
            "#,
        )
        .expect("config should parse");

        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.bind, DEFAULT_BIND);
        assert_eq!(cfg.server.cron_secret.as_deref(), Some("s3cret"));
        assert_eq!(cfg.scheduler.handler_timeout_secs, 30);
        assert_eq!(cfg.scheduler.batch_limit, Some(50));
        assert_eq!(cfg.market.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn wrong_type_is_a_config_error() {
        let err = BeaconConfig::from_toml_str("[server]\nport = \"not-a-port\"").unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
