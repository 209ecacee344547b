use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{Config, MAX_FETCH_ATTEMPTS, RETRY_BACKOFF_MAX};
use crate::error::{AppError, Result};

/// The three upstream reads the pipeline depends on.
///
/// Implemented over HTTP by [`PolymarketClient`]; tests substitute an
/// in-memory source.
#[allow(async_fn_in_trait)]
pub trait MarketDataApi {
    /// One page of Gamma markets. `closed = Some(false)` asks for open markets only.
    async fn fetch_markets_page(
        &mut self,
        limit: usize,
        offset: usize,
        closed: Option<bool>,
    ) -> Result<Vec<Value>>;

    async fn fetch_order_book(&mut self, token_id: &str) -> Result<Value>;

    async fn fetch_price_history(
        &mut self,
        token_id: &str,
        interval: &str,
        fidelity: u32,
    ) -> Result<Value>;
}

/// Leaky bucket of one: each call waits until `delay` has passed since the
/// previous request was started.
#[derive(Debug)]
pub struct RateLimiter {
    delay: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self { delay, last: None }
    }

    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

/// Delay before retry number `attempt` (1-based): `min`, doubling each time,
/// capped at 10s.
pub fn backoff_delay(min: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    min.saturating_mul(factor)
        .min(RETRY_BACKOFF_MAX)
}

/// Server-side trouble and throttling are worth another try; other client
/// errors are not.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

pub struct PolymarketClient {
    http: reqwest::Client,
    gamma_api_url: String,
    clob_api_url: String,
    limiter: RateLimiter,
    backoff_min: Duration,
}

impl PolymarketClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("polymarket-edge/", env!("CARGO_PKG_VERSION")))
            .timeout(cfg.http_timeout)
            .build()?;
        Ok(Self {
            http,
            gamma_api_url: cfg.gamma_api_url.trim_end_matches('/').to_string(),
            clob_api_url: cfg.clob_api_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::new(cfg.rate_limit_delay),
            backoff_min: cfg.retry_backoff_min,
        })
    }

    /// GET `url` and decode JSON, retrying transient failures with backoff.
    /// The last failure propagates once attempts are exhausted.
    async fn get_json(&mut self, url: &str, query: &[(&str, String)]) -> Result<Value> {
        let mut attempt = 1;
        loop {
            self.limiter.wait().await;
            debug!(url, ?query, attempt, "GET");

            let err = match self.try_get_json(url, query).await {
                Ok(v) => return Ok(v),
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Transient(e)) => e,
            };

            if attempt >= MAX_FETCH_ATTEMPTS {
                warn!(url, attempt, "giving up: {err}");
                return Err(err);
            }
            let delay = backoff_delay(self.backoff_min, attempt);
            warn!(
                url,
                attempt,
                backoff_ms = delay.as_millis() as u64,
                "request failed, retrying: {err}"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn try_get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<Value, Attempt> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| Attempt::Transient(e.into()))?;

        let status = resp.status();
        if !status.is_success() {
            let err = AppError::Api(format!("{url} returned {status}"));
            return Err(if is_retryable_status(status) {
                Attempt::Transient(err)
            } else {
                Attempt::Fatal(err)
            });
        }

        // Body and decode failures are retried like transport errors.
        resp.json::<Value>().await.map_err(|e| {
            if e.is_body() || e.is_decode() {
                Attempt::Transient(e.into())
            } else {
                Attempt::Fatal(e.into())
            }
        })
    }
}

enum Attempt {
    Transient(AppError),
    Fatal(AppError),
}

impl MarketDataApi for PolymarketClient {
    async fn fetch_markets_page(
        &mut self,
        limit: usize,
        offset: usize,
        closed: Option<bool>,
    ) -> Result<Vec<Value>> {
        let url = format!("{}/markets", self.gamma_api_url);
        let mut query = vec![("limit", limit.to_string()), ("offset", offset.to_string())];
        if let Some(closed) = closed {
            query.push(("closed", closed.to_string()));
        }
        info!(limit, offset, ?closed, "fetching markets page");

        let body = self.get_json(&url, &query).await?;
        Ok(unwrap_market_list(body))
    }

    async fn fetch_order_book(&mut self, token_id: &str) -> Result<Value> {
        let url = format!("{}/book", self.clob_api_url);
        self.get_json(&url, &[("token_id", token_id.to_string())]).await
    }

    async fn fetch_price_history(
        &mut self,
        token_id: &str,
        interval: &str,
        fidelity: u32,
    ) -> Result<Value> {
        let url = format!("{}/prices-history", self.clob_api_url);
        let query = [
            ("market", token_id.to_string()),
            ("interval", interval.to_string()),
            ("fidelity", fidelity.to_string()),
        ];
        self.get_json(&url, &query).await
    }
}

/// Gamma answers `/markets` with a bare array, or with `{"data": [...]}` on
/// some deployments.
pub fn unwrap_market_list(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}
