//! The `market_cache` table, written by the market refresh jobs.
//!
//! Pages read market data from here instead of calling upstream APIs on every
//! request. Entries carry their own expiry; `cache_cleanup` deletes the stale
//! ones.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use beacon_jobs::store::format_ts;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

/// Initialise the cache table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS market_cache (
            key         TEXT NOT NULL PRIMARY KEY,
            value       TEXT NOT NULL,
            expires_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_market_cache_expiry
            ON market_cache(expires_at);",
    )
}

#[derive(Clone)]
pub struct MarketCache {
    conn: Arc<Mutex<Connection>>,
}

impl MarketCache {
    /// Wrap an open connection, creating the table if needed.
    pub fn new(conn: Connection) -> rusqlite::Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or replace `key`, valid for `ttl` from `now`.
    pub fn put(
        &self,
        key: &str,
        value: &Value,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .ok_or_else(|| anyhow::anyhow!("cache ttl {ttl:?} is out of range"))?;
        self.conn().execute(
            "INSERT INTO market_cache (key, value, expires_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
            params![key, value.to_string(), format_ts(expires_at), format_ts(now)],
        )?;
        debug!(key, expires_at = %expires_at, "cache entry written");
        Ok(())
    }

    /// The cached value for `key` if it has not expired at `now`.
    pub fn get_fresh(&self, key: &str, now: DateTime<Utc>) -> anyhow::Result<Option<Value>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM market_cache WHERE key = ?1 AND expires_at > ?2",
                params![key, format_ts(now)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    /// Delete every entry that expired at or before `now`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> rusqlite::Result<usize> {
        self.conn().execute(
            "DELETE FROM market_cache WHERE expires_at <= ?1",
            [format_ts(now)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache() -> MarketCache {
        MarketCache::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn fresh_entry_is_returned_until_expiry() {
        let cache = cache();
        let now = Utc::now();
        cache
            .put("global_data", &json!({"btc_dominance": 52.1}), Duration::from_secs(60), now)
            .unwrap();

        assert_eq!(
            cache.get_fresh("global_data", now).unwrap(),
            Some(json!({"btc_dominance": 52.1}))
        );
        let later = now + chrono::Duration::seconds(61);
        assert_eq!(cache.get_fresh("global_data", later).unwrap(), None);
    }

    #[test]
    fn put_replaces_existing_value() {
        let cache = cache();
        let now = Utc::now();
        cache.put("news", &json!([1]), Duration::from_secs(60), now).unwrap();
        cache.put("news", &json!([2]), Duration::from_secs(60), now).unwrap();
        assert_eq!(cache.get_fresh("news", now).unwrap(), Some(json!([2])));
    }

    #[test]
    fn purge_removes_only_expired_entries() {
        let cache = cache();
        let now = Utc::now();
        cache.put("old", &json!(1), Duration::from_secs(1), now - chrono::Duration::hours(1)).unwrap();
        cache.put("new", &json!(2), Duration::from_secs(3600), now).unwrap();

        assert_eq!(cache.purge_expired(now).unwrap(), 1);
        assert!(cache.get_fresh("new", now).unwrap().is_some());
        assert_eq!(cache.purge_expired(now).unwrap(), 0);
    }
}
