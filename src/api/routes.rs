use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{EdgeRow, LivePriceRow, MarketRow, PriceHistoryRow};
use crate::error::AppError;
use crate::types::{LifecycleState, Side};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/markets", get(get_markets))
        .route("/markets/:id", get(get_market))
        .route("/markets/:id/live", get(get_market_live))
        .route("/markets/:id/history", get(get_market_history))
        .route("/edges", get(get_edges))
        .route("/stats/summary", get(get_stats_summary))
        .with_state(state)
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct MarketsQuery {
    pub state: Option<LifecycleState>,
    pub category: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Deserialize, Default)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize, Default)]
pub struct HistoryQuery {
    pub side: Option<Side>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct MarketResponse {
    pub market_id: String,
    pub question: Option<String>,
    pub outcomes: Vec<String>,
    pub yes_token_id: Option<String>,
    pub no_token_id: Option<String>,
    pub ending_time: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub state: Option<String>,
    pub volume: Option<f64>,
    pub liquidity: Option<f64>,
    pub url: Option<String>,
    pub data_updated_at: Option<DateTime<Utc>>,
}

impl From<MarketRow> for MarketResponse {
    fn from(r: MarketRow) -> Self {
        Self {
            market_id: r.market_id,
            question: r.question,
            outcomes: decode_list(r.outcomes.as_deref()),
            yes_token_id: r.yes_token_id,
            no_token_id: r.no_token_id,
            ending_time: r.ending_time,
            category: r.category,
            tags: decode_list(r.tags.as_deref()),
            state: r.state,
            volume: r.volume,
            liquidity: r.liquidity,
            url: r.url,
            data_updated_at: r.data_updated_at,
        }
    }
}

fn decode_list(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub markets: i64,
    pub live_prices: i64,
    pub price_history: i64,
    pub outcomes: i64,
    pub edges: i64,
    pub latest_live_capture: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_markets(
    State(state): State<ApiState>,
    Query(params): Query<MarketsQuery>,
) -> Result<Json<Vec<MarketResponse>>, AppError> {
    let lifecycle = params.state.map(|s| s.as_str());

    let rows: Vec<MarketRow> = sqlx::query_as(
        r#"
        SELECT * FROM markets
        WHERE (?1 IS NULL OR state = ?1)
          AND (?2 IS NULL OR category = ?2)
        ORDER BY liquidity DESC NULLS LAST, id
        LIMIT ?3
        "#,
    )
    .bind(lifecycle)
    .bind(params.category)
    .bind(clamp_limit(params.limit))
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows.into_iter().map(MarketResponse::from).collect()))
}

async fn get_market(
    State(state): State<ApiState>,
    Path(market_id): Path<String>,
) -> Result<Json<MarketResponse>, AppError> {
    let row: Option<MarketRow> = sqlx::query_as("SELECT * FROM markets WHERE market_id = ?")
        .bind(&market_id)
        .fetch_optional(&state.pool)
        .await?;

    row.map(|r| Json(r.into()))
        .ok_or_else(|| AppError::NotFound(format!("market {market_id}")))
}

async fn get_market_live(
    State(state): State<ApiState>,
    Path(market_id): Path<String>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<LivePriceRow>>, AppError> {
    let rows = sqlx::query_as(
        r#"
        SELECT id, market_id, question, yes_token_id, no_token_id,
               yes_best_bid, yes_best_ask, yes_mid_price, yes_spread,
               no_best_bid, no_best_ask, no_mid_price, no_spread, timestamp
        FROM live_prices
        WHERE market_id = ?
        ORDER BY timestamp DESC
        LIMIT ?
        "#,
    )
    .bind(market_id)
    .bind(clamp_limit(params.limit))
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows))
}

async fn get_market_history(
    State(state): State<ApiState>,
    Path(market_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<PriceHistoryRow>>, AppError> {
    let rows = sqlx::query_as(
        r#"
        SELECT id, market_id, side, price, timestamp
        FROM price_history
        WHERE market_id = ?1
          AND (?2 IS NULL OR side = ?2)
          AND (?3 IS NULL OR timestamp >= ?3)
        ORDER BY timestamp, side
        LIMIT ?4
        "#,
    )
    .bind(market_id)
    .bind(params.side.map(|s| s.as_str()))
    .bind(params.since)
    .bind(clamp_limit(params.limit))
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows))
}

async fn get_edges(
    State(state): State<ApiState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<EdgeRow>>, AppError> {
    let rows = sqlx::query_as("SELECT * FROM edges ORDER BY detected_at DESC, id DESC LIMIT ?")
        .bind(clamp_limit(params.limit))
        .fetch_all(&state.pool)
        .await?;

    Ok(Json(rows))
}

async fn count(pool: &sqlx::SqlitePool, table: &str) -> Result<i64, AppError> {
    // Table names come from the fixed list in get_stats_summary only.
    let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?;
    Ok(n)
}

async fn get_stats_summary(
    State(state): State<ApiState>,
) -> Result<Json<SummaryResponse>, AppError> {
    let pool = &state.pool;
    let latest_live_capture: Option<String> =
        sqlx::query_scalar("SELECT MAX(timestamp) FROM live_prices")
            .fetch_one(pool)
            .await?;

    Ok(Json(SummaryResponse {
        markets: count(pool, "markets").await?,
        live_prices: count(pool, "live_prices").await?,
        price_history: count(pool, "price_history").await?,
        outcomes: count(pool, "outcomes").await?,
        edges: count(pool, "edges").await?,
        latest_live_capture,
    }))
}
