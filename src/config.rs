use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";
pub const CLOB_API_URL: &str = "https://clob.polymarket.com";

/// Canonical public URL prefix; the market slug (or id) is appended.
pub const MARKET_URL_PREFIX: &str = "https://polymarket.com/event/";

/// Gamma `/markets` page size. The API caps `limit` at 100.
pub const PAGE_SIZE: usize = 100;

/// Token ids must be strictly longer than this. Real ids are ~77-digit decimal
/// strings; anything shorter is stray punctuation from a mangled payload.
pub const MIN_TOKEN_ID_LEN: usize = 10;

/// Attempts per outbound request, including the first.
pub const MAX_FETCH_ATTEMPTS: u32 = 3;

/// Exponential backoff bounds between attempts. The lower bound is the
/// default for `Config::retry_backoff_min`.
pub const RETRY_BACKOFF_MIN: Duration = Duration::from_secs(2);
pub const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Markets echoed to the log after discovery.
pub const DISCOVERY_SAMPLE_SIZE: usize = 5;

pub const MARKETS_FILE: &str = "markets_snapshot.json";
pub const LIVE_PRICES_FILE: &str = "live_prices.json";
pub const HISTORICAL_PRICES_FILE: &str = "historical_prices.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub gamma_api_url: String,
    pub clob_api_url: String,
    pub log_level: String,
    /// Directory holding the JSON artifacts handed between stages (DATA_DIR)
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub api_port: u16,
    /// Minimum spacing between outbound requests (RATE_LIMIT_DELAY_MS)
    pub rate_limit_delay: Duration,
    pub http_timeout: Duration,
    /// First retry delay; later retries double it (RETRY_BACKOFF_MS)
    pub retry_backoff_min: Duration,
    /// `interval` parameter for /prices-history (HISTORY_INTERVAL)
    pub history_interval: String,
    /// Sampling resolution in seconds for /prices-history (HISTORY_FIDELITY)
    pub history_fidelity: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gamma_api_url: GAMMA_API_URL.to_string(),
            clob_api_url: CLOB_API_URL.to_string(),
            log_level: "info".to_string(),
            data_dir: PathBuf::from("data"),
            db_path: PathBuf::from("data/polymarket_edge.db"),
            api_port: 3000,
            rate_limit_delay: Duration::from_millis(500),
            http_timeout: Duration::from_secs(10),
            retry_backoff_min: RETRY_BACKOFF_MIN,
            history_interval: "max".to_string(),
            history_fidelity: 60,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            gamma_api_url: std::env::var("GAMMA_API_URL").unwrap_or(defaults.gamma_api_url),
            clob_api_url: std::env::var("CLOB_API_URL").unwrap_or(defaults.clob_api_url),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            db_path: std::env::var("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            api_port: parse_env("API_PORT", defaults.api_port)?,
            rate_limit_delay: Duration::from_millis(parse_env(
                "RATE_LIMIT_DELAY_MS",
                defaults.rate_limit_delay.as_millis() as u64,
            )?),
            http_timeout: Duration::from_secs(parse_env(
                "HTTP_TIMEOUT_SECS",
                defaults.http_timeout.as_secs(),
            )?),
            retry_backoff_min: Duration::from_millis(parse_env(
                "RETRY_BACKOFF_MS",
                defaults.retry_backoff_min.as_millis() as u64,
            )?),
            history_interval: std::env::var("HISTORY_INTERVAL")
                .unwrap_or(defaults.history_interval),
            history_fidelity: parse_env("HISTORY_FIDELITY", defaults.history_fidelity)?,
        })
    }

    pub fn markets_path(&self) -> PathBuf {
        self.data_dir.join(MARKETS_FILE)
    }

    pub fn live_prices_path(&self) -> PathBuf {
        self.data_dir.join(LIVE_PRICES_FILE)
    }

    pub fn historical_prices_path(&self) -> PathBuf {
        self.data_dir.join(HISTORICAL_PRICES_FILE)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} must be a valid number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}
