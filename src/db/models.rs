//! Row types for the store tables, read back by the query API.
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MarketRow {
    pub id: i64,
    pub market_id: String,
    pub question: Option<String>,
    /// JSON-encoded list of outcome labels.
    pub outcomes: Option<String>,
    pub yes_token_id: Option<String>,
    pub no_token_id: Option<String>,
    pub ending_time: Option<DateTime<Utc>>,
    pub category: Option<String>,
    /// JSON-encoded list of tag labels.
    pub tags: Option<String>,
    pub state: Option<String>,
    pub volume: Option<f64>,
    pub liquidity: Option<f64>,
    pub url: Option<String>,
    pub data_updated_at: Option<DateTime<Utc>>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LivePriceRow {
    pub id: i64,
    pub market_id: String,
    pub question: Option<String>,
    pub yes_token_id: Option<String>,
    pub no_token_id: Option<String>,
    pub yes_best_bid: Option<f64>,
    pub yes_best_ask: Option<f64>,
    pub yes_mid_price: Option<f64>,
    pub yes_spread: Option<f64>,
    pub no_best_bid: Option<f64>,
    pub no_best_ask: Option<f64>,
    pub no_mid_price: Option<f64>,
    pub no_spread: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PriceHistoryRow {
    pub id: i64,
    pub market_id: String,
    pub side: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EdgeRow {
    pub id: i64,
    pub market_id: String,
    pub edge_type: Option<String>,
    pub edge_percentage: Option<f64>,
    pub recommendation: Option<String>,
    pub market_price: Option<f64>,
    pub fair_price: Option<f64>,
    pub confidence: Option<f64>,
    pub detected_at: String,
}
