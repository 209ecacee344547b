//! In-memory stand-ins shared by unit tests.

use std::collections::HashMap;

use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::client::MarketDataApi;
use crate::error::{AppError, Result};

/// Serves markets, books and histories from memory. Tokens without an entry
/// fail the way an exhausted retry would.
#[derive(Debug, Default)]
pub struct FakeApi {
    pub markets: Vec<Value>,
    pub books: HashMap<String, Value>,
    pub histories: HashMap<String, Value>,
    pub fail_markets: bool,
    pub page_requests: Vec<(usize, usize)>,
    pub book_requests: Vec<String>,
    pub history_requests: Vec<String>,
}

impl MarketDataApi for FakeApi {
    async fn fetch_markets_page(
        &mut self,
        limit: usize,
        offset: usize,
        _closed: Option<bool>,
    ) -> Result<Vec<Value>> {
        self.page_requests.push((limit, offset));
        if self.fail_markets {
            return Err(AppError::Api("markets unavailable".to_string()));
        }
        Ok(self.markets.iter().skip(offset).take(limit).cloned().collect())
    }

    async fn fetch_order_book(&mut self, token_id: &str) -> Result<Value> {
        self.book_requests.push(token_id.to_string());
        self.books
            .get(token_id)
            .cloned()
            .ok_or_else(|| AppError::Api(format!("no book for {token_id}")))
    }

    async fn fetch_price_history(
        &mut self,
        token_id: &str,
        _interval: &str,
        _fidelity: u32,
    ) -> Result<Value> {
        self.history_requests.push(token_id.to_string());
        self.histories
            .get(token_id)
            .cloned()
            .ok_or_else(|| AppError::Api(format!("no history for {token_id}")))
    }
}

/// Fresh in-memory store with the real migrations applied.
pub async fn memory_pool() -> SqlitePool {
    let options: SqliteConnectOptions = "sqlite::memory:".parse().expect("memory url");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("open in-memory sqlite");
    crate::db::migrate(&pool).await.expect("migrations");
    pool
}
