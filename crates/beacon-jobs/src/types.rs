use chrono::{DateTime, Datelike, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{JobError, Result};

/// Closed set of job kinds the platform knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Drop expired market cache entries and old job rows.
    CacheCleanup,
    /// Refresh the top coins by market cap.
    UpdateTopCoins,
    /// Refresh global market totals (market cap, dominance).
    UpdateGlobalData,
    /// Refresh the news feed.
    UpdateNews,
    /// Refresh macro market data (fiat and commodity reference rates).
    UpdateMacroMarketData,
    /// Refresh spot prices for the tracked crypto assets.
    UpdateCryptoMarketData,
}

impl JobType {
    pub const ALL: [JobType; 6] = [
        JobType::CacheCleanup,
        JobType::UpdateTopCoins,
        JobType::UpdateGlobalData,
        JobType::UpdateNews,
        JobType::UpdateMacroMarketData,
        JobType::UpdateCryptoMarketData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::CacheCleanup => "cache_cleanup",
            JobType::UpdateTopCoins => "update_top_coins",
            JobType::UpdateGlobalData => "update_global_data",
            JobType::UpdateNews => "update_news",
            JobType::UpdateMacroMarketData => "update_macro_market_data",
            JobType::UpdateCryptoMarketData => "update_crypto_market_data",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| JobError::InvalidJobType(s.to_string()))
    }
}

/// Lifecycle state of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `scheduled_for` to elapse.
    Pending,
    /// Claimed; the handler is running.
    Processing,
    /// Handler succeeded.
    Completed,
    /// Handler errored, panicked or timed out.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Payload of a `cache_cleanup` job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheCleanupPayload {
    /// Override for how long terminal job rows are kept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_hours: Option<u64>,
}

/// Payload of an `update_top_coins` job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TopCoinsPayload {
    /// Number of coins to fetch (1..=250). Defaults to the upstream page size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Payload of an `update_news` job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NewsPayload {
    /// Restrict the feed to these categories (e.g. `BTC`, `Regulation`).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

/// Payload shared by the plain refresh jobs (global, macro, crypto market).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshPayload {
    /// Refresh even when the cached entry has not expired yet.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,
}

pub const MAX_TOP_COINS: u32 = 250;

/// Strongly typed job payload, one variant per [`JobType`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    CacheCleanup(CacheCleanupPayload),
    UpdateTopCoins(TopCoinsPayload),
    UpdateGlobalData(RefreshPayload),
    UpdateNews(NewsPayload),
    UpdateMacroMarketData(RefreshPayload),
    UpdateCryptoMarketData(RefreshPayload),
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::CacheCleanup(_) => JobType::CacheCleanup,
            JobPayload::UpdateTopCoins(_) => JobType::UpdateTopCoins,
            JobPayload::UpdateGlobalData(_) => JobType::UpdateGlobalData,
            JobPayload::UpdateNews(_) => JobType::UpdateNews,
            JobPayload::UpdateMacroMarketData(_) => JobType::UpdateMacroMarketData,
            JobPayload::UpdateCryptoMarketData(_) => JobType::UpdateCryptoMarketData,
        }
    }

    /// The payload a job of `job_type` gets when the caller supplies none.
    pub fn empty(job_type: JobType) -> Self {
        match job_type {
            JobType::CacheCleanup => JobPayload::CacheCleanup(Default::default()),
            JobType::UpdateTopCoins => JobPayload::UpdateTopCoins(Default::default()),
            JobType::UpdateGlobalData => JobPayload::UpdateGlobalData(Default::default()),
            JobType::UpdateNews => JobPayload::UpdateNews(Default::default()),
            JobType::UpdateMacroMarketData => JobPayload::UpdateMacroMarketData(Default::default()),
            JobType::UpdateCryptoMarketData => {
                JobPayload::UpdateCryptoMarketData(Default::default())
            }
        }
    }

    /// Decode and validate a raw JSON payload for `job_type`.
    ///
    /// `null` is treated as an empty object.
    pub fn decode(job_type: JobType, value: Value) -> Result<Self> {
        let value = if value.is_null() {
            Value::Object(Default::default())
        } else {
            value
        };

        let payload = match job_type {
            JobType::CacheCleanup => JobPayload::CacheCleanup(parse(job_type, value)?),
            JobType::UpdateTopCoins => JobPayload::UpdateTopCoins(parse(job_type, value)?),
            JobType::UpdateGlobalData => JobPayload::UpdateGlobalData(parse(job_type, value)?),
            JobType::UpdateNews => JobPayload::UpdateNews(parse(job_type, value)?),
            JobType::UpdateMacroMarketData => {
                JobPayload::UpdateMacroMarketData(parse(job_type, value)?)
            }
            JobType::UpdateCryptoMarketData => {
                JobPayload::UpdateCryptoMarketData(parse(job_type, value)?)
            }
        };
        payload.validate()?;
        Ok(payload)
    }

    /// Serialise the payload body (without the type tag) for storage.
    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            JobPayload::CacheCleanup(p) => serde_json::to_value(p)?,
            JobPayload::UpdateTopCoins(p) => serde_json::to_value(p)?,
            JobPayload::UpdateNews(p) => serde_json::to_value(p)?,
            JobPayload::UpdateGlobalData(p)
            | JobPayload::UpdateMacroMarketData(p)
            | JobPayload::UpdateCryptoMarketData(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| JobError::InvalidPayload {
            job_type: self.job_type().to_string(),
            reason,
        };

        match self {
            JobPayload::UpdateTopCoins(TopCoinsPayload { limit: Some(limit) })
                if *limit == 0 || *limit > MAX_TOP_COINS =>
            {
                Err(invalid(format!("limit must be within 1..={MAX_TOP_COINS}, got {limit}")))
            }
            JobPayload::UpdateNews(NewsPayload { categories }) => {
                match categories.iter().find(|c| !is_category_token(c)) {
                    Some(bad) => Err(invalid(format!("invalid news category: {bad:?}"))),
                    None => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }
}

fn parse<T: DeserializeOwned>(job_type: JobType, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| JobError::InvalidPayload {
        job_type: job_type.to_string(),
        reason: e.to_string(),
    })
}

// Categories end up in an upstream query string.
fn is_category_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A persisted job record.
///
/// `job_type` and `payload` are kept exactly as stored; use
/// [`Job::decode_payload`] to get the typed view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// UUID v4 string, primary key.
    pub id: String,
    /// Job kind, the `snake_case` name of a [`JobType`].
    pub job_type: String,
    /// JSON payload forwarded to the handler.
    pub payload: Value,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Not eligible for execution before this instant.
    pub scheduled_for: DateTime<Utc>,
    /// Last failure message; only set when `status` is `failed`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A fresh `pending` job for `payload`.
    ///
    /// `scheduled_for` is rounded up to the stored microsecond precision and
    /// must fall within years 0000-9999.
    pub fn new(payload: &JobPayload, scheduled_for: DateTime<Utc>) -> Result<Self> {
        let scheduled_for =
            storable_instant(scheduled_for).ok_or_else(|| JobError::InvalidPayload {
                job_type: payload.job_type().to_string(),
                reason: format!("scheduled_for {scheduled_for} is outside years 0000-9999"),
            })?;
        let now = Utc::now();
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: payload.job_type().to_string(),
            payload: payload.to_value()?,
            status: JobStatus::Pending,
            scheduled_for,
            error: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn kind(&self) -> Result<JobType> {
        self.job_type.parse()
    }

    pub fn decode_payload(&self) -> Result<JobPayload> {
        JobPayload::decode(self.kind()?, self.payload.clone())
    }

    /// Due means `scheduled_for` has elapsed relative to `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for <= now
    }
}

/// `at` rounded up to whole microseconds, or `None` when its RFC 3339 form
/// would not have a four-digit year. Stored timestamps compare as text, so
/// both conditions keep a job from sorting ahead of its instant.
fn storable_instant(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let sub_micro = at.timestamp_subsec_nanos() % 1_000;
    let at = if sub_micro == 0 {
        at
    } else {
        at.checked_add_signed(chrono::Duration::nanoseconds(i64::from(1_000 - sub_micro)))?
    };
    (0..=9999).contains(&at.year()).then_some(at)
}

/// Row counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobStats {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}
