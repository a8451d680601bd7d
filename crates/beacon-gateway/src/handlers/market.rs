use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use beacon_core::config::MarketConfig;
use beacon_jobs::{JobHandler, JobPayload};
use chrono::Utc;
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::MarketCache;

/// What one refresh job fetches and where it lands in the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshPlan {
    pub key: &'static str,
    pub url: Url,
    /// Fetch even if the cached entry is still fresh.
    pub force: bool,
}

/// Resolve the upstream request for a refresh payload.
///
/// Payloads that reshape the response (`limit`, `categories`) always fetch,
/// since the cached entry may have been written with different parameters.
/// Returns `None` for payloads that are not market refreshes.
pub fn plan(market: &MarketConfig, payload: &JobPayload) -> anyhow::Result<Option<RefreshPlan>> {
    let plan = match payload {
        JobPayload::UpdateTopCoins(p) => {
            let mut url = parse_url(&market.top_coins_url)?;
            if let Some(limit) = p.limit {
                set_query(&mut url, "per_page", &limit.to_string());
            }
            RefreshPlan {
                key: "top_coins",
                url,
                force: p.limit.is_some(),
            }
        }
        JobPayload::UpdateNews(p) => {
            let mut url = parse_url(&market.news_url)?;
            if !p.categories.is_empty() {
                set_query(&mut url, "categories", &p.categories.join(","));
            }
            RefreshPlan {
                key: "news",
                url,
                force: !p.categories.is_empty(),
            }
        }
        JobPayload::UpdateGlobalData(p) => RefreshPlan {
            key: "global_data",
            url: parse_url(&market.global_data_url)?,
            force: p.force,
        },
        JobPayload::UpdateMacroMarketData(p) => RefreshPlan {
            key: "macro_market",
            url: parse_url(&market.macro_market_url)?,
            force: p.force,
        },
        JobPayload::UpdateCryptoMarketData(p) => RefreshPlan {
            key: "crypto_market",
            url: parse_url(&market.crypto_market_url)?,
            force: p.force,
        },
        JobPayload::CacheCleanup(_) => return Ok(None),
    };
    Ok(Some(plan))
}

fn parse_url(raw: &str) -> anyhow::Result<Url> {
    Url::parse(raw).with_context(|| format!("invalid upstream url: {raw}"))
}

/// Set `key` on the query string, replacing any value already there.
fn set_query(url: &mut Url, key: &str, value: &str) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(key, value);
}

/// Fetches upstream market JSON into `market_cache`.
///
/// One instance serves every refresh job type; the payload variant picks the
/// endpoint.
pub struct MarketRefreshHandler {
    client: reqwest::Client,
    cache: MarketCache,
    market: MarketConfig,
    ttl: Duration,
}

impl MarketRefreshHandler {
    pub fn new(market: MarketConfig, cache: MarketCache, ttl: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(market.request_timeout_secs))
            .user_agent(concat!("beacon/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            cache,
            market,
            ttl,
        })
    }

    async fn fetch(&self, url: &Url) -> anyhow::Result<Value> {
        let resp = self
            .client
            .get(url.clone())
            .header("accept", "application/json")
            .send()
            .await
            .with_context(|| format!("request to {} failed", url.host_str().unwrap_or("upstream")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "upstream market API error");
            bail!("upstream returned {status}");
        }
        Ok(resp.json::<Value>().await?)
    }
}

#[async_trait]
impl JobHandler for MarketRefreshHandler {
    async fn run(&self, payload: &JobPayload) -> anyhow::Result<()> {
        let plan = plan(&self.market, payload)?
            .ok_or_else(|| anyhow!("{} is not a market refresh", payload.job_type()))?;

        if !plan.force && self.cache.get_fresh(plan.key, Utc::now())?.is_some() {
            debug!(key = plan.key, "cache entry still fresh, skipping fetch");
            return Ok(());
        }

        let body = self.fetch(&plan.url).await?;
        self.cache.put(plan.key, &body, self.ttl, Utc::now())?;
        info!(key = plan.key, "market data refreshed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Json, Router};
    use beacon_jobs::{NewsPayload, RefreshPayload, TopCoinsPayload};
    use rusqlite::Connection;
    use serde_json::json;

    fn query(url: &Url) -> Vec<(String, String)> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn top_coins_limit_replaces_page_size() {
        let market = MarketConfig {
            top_coins_url: "https://example.test/coins?vs_currency=usd&per_page=100".into(),
            ..Default::default()
        };
        let payload = JobPayload::UpdateTopCoins(TopCoinsPayload { limit: Some(10) });
        let plan = plan(&market, &payload).unwrap().unwrap();

        assert_eq!(plan.key, "top_coins");
        assert!(plan.force);
        assert_eq!(
            query(&plan.url),
            vec![
                ("vs_currency".to_string(), "usd".to_string()),
                ("per_page".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn news_categories_are_joined() {
        let market = MarketConfig::default();
        let payload = JobPayload::UpdateNews(NewsPayload {
            categories: vec!["BTC".into(), "Regulation".into()],
        });
        let plan = plan(&market, &payload).unwrap().unwrap();
        assert!(query(&plan.url).contains(&("categories".to_string(), "BTC,Regulation".to_string())));
    }

    #[test]
    fn plain_refresh_uses_configured_url() {
        let market = MarketConfig::default();
        let plan = plan(&market, &JobPayload::empty(beacon_jobs::JobType::UpdateGlobalData))
            .unwrap()
            .unwrap();
        assert_eq!(plan.url.as_str(), market.global_data_url);
        assert!(!plan.force);
    }

    #[test]
    fn cleanup_has_no_plan() {
        let market = MarketConfig::default();
        assert!(plan(&market, &JobPayload::empty(beacon_jobs::JobType::CacheCleanup))
            .unwrap()
            .is_none());
    }

    #[test]
    fn bad_configured_url_is_an_error() {
        let market = MarketConfig {
            macro_market_url: "not a url".into(),
            ..Default::default()
        };
        let err = plan(&market, &JobPayload::empty(beacon_jobs::JobType::UpdateMacroMarketData))
            .unwrap_err();
        assert!(err.to_string().contains("invalid upstream url"));
    }

    /// Serve `/ok` with a JSON body and `/down` with a 503 on a random port.
    async fn upstream() -> String {
        let app = Router::new()
            .route("/ok", get(|| async { Json(json!({"data": {"markets": 12000}})) }))
            .route("/down", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn handler(base: &str, path: &str) -> (MarketRefreshHandler, MarketCache) {
        let cache = MarketCache::new(Connection::open_in_memory().unwrap()).unwrap();
        let market = MarketConfig {
            global_data_url: format!("{base}{path}"),
            request_timeout_secs: 5,
            ..Default::default()
        };
        let h = MarketRefreshHandler::new(market, cache.clone(), Duration::from_secs(60)).unwrap();
        (h, cache)
    }

    #[tokio::test]
    async fn refresh_writes_upstream_body_to_cache() {
        let base = upstream().await;
        let (h, cache) = handler(&base, "/ok");

        h.run(&JobPayload::UpdateGlobalData(RefreshPayload::default()))
            .await
            .unwrap();

        assert_eq!(
            cache.get_fresh("global_data", Utc::now()).unwrap(),
            Some(json!({"data": {"markets": 12000}}))
        );
    }

    #[tokio::test]
    async fn fresh_entry_skips_fetch_unless_forced() {
        let base = upstream().await;
        // the endpoint is down, so only a skipped fetch can succeed
        let (h, cache) = handler(&base, "/down");
        cache
            .put("global_data", &json!("cached"), Duration::from_secs(60), Utc::now())
            .unwrap();

        h.run(&JobPayload::UpdateGlobalData(RefreshPayload { force: false }))
            .await
            .unwrap();

        let err = h
            .run(&JobPayload::UpdateGlobalData(RefreshPayload { force: true }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
        assert_eq!(
            cache.get_fresh("global_data", Utc::now()).unwrap(),
            Some(json!("cached"))
        );
    }

    #[tokio::test]
    async fn cleanup_payload_is_rejected() {
        let (h, _) = handler("http://127.0.0.1:9", "/");
        let err = h
            .run(&JobPayload::empty(beacon_jobs::JobType::CacheCleanup))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cache_cleanup is not a market refresh");
    }
}
