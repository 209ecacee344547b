use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::MarketDataApi;
use crate::extract::lenient_f64;
use crate::orderbook::{summarize, BookSummary};
use crate::types::{LivePriceSnapshot, Market, MarketHistory, PriceSeries, RawPricePoint, Side};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectStats {
    pub considered: usize,
    pub skipped_missing_tokens: usize,
    pub collected: usize,
    /// Individual token fetches that failed after retries.
    pub failed_fetches: usize,
}

fn limited(markets: &[Market], limit: Option<usize>) -> &[Market] {
    match limit {
        Some(n) => &markets[..n.min(markets.len())],
        None => markets,
    }
}

/// Snapshot both order books of every market. All snapshots of one run share
/// `captured_at`, so re-ingesting the same artifact is a no-op.
pub async fn collect_live_prices<A: MarketDataApi>(
    api: &mut A,
    markets: &[Market],
    limit: Option<usize>,
    captured_at: DateTime<Utc>,
) -> (Vec<LivePriceSnapshot>, CollectStats) {
    let markets = limited(markets, limit);
    let mut stats = CollectStats {
        considered: markets.len(),
        ..CollectStats::default()
    };
    let mut snapshots = Vec::with_capacity(markets.len());

    for (i, market) in markets.iter().enumerate() {
        info!("[{}/{}] {}", i + 1, markets.len(), market.question_or_unknown());
        let Some((yes_token, no_token)) = market.token_pair() else {
            warn!(market_id = %market.market_id, "skipping: missing token ids");
            stats.skipped_missing_tokens += 1;
            continue;
        };

        let yes = fetch_summary(api, yes_token, &mut stats).await;
        let no = fetch_summary(api, no_token, &mut stats).await;
        log_side(Side::Yes, &yes);
        log_side(Side::No, &no);

        snapshots.push(LivePriceSnapshot {
            market_id: market.market_id.clone(),
            question: market.question.clone(),
            yes_token_id: yes_token.to_string(),
            no_token_id: no_token.to_string(),
            timestamp: captured_at,
            yes,
            no,
        });
    }

    stats.collected = snapshots.len();
    (snapshots, stats)
}

async fn fetch_summary<A: MarketDataApi>(
    api: &mut A,
    token_id: &str,
    stats: &mut CollectStats,
) -> BookSummary {
    match api.fetch_order_book(token_id).await {
        Ok(book) => summarize(Some(&book)),
        Err(e) => {
            warn!(token_id, "order book fetch failed: {e}");
            stats.failed_fetches += 1;
            summarize(None)
        }
    }
}

fn log_side(side: Side, summary: &BookSummary) {
    match (summary.mid_price, summary.spread) {
        (Some(mid), Some(spread)) => info!("  {side}: ${mid:.4} (spread: ${spread:.4})"),
        _ => info!("  {side}: no two-sided order book"),
    }
}

/// Fetch YES and NO price series for every market, keyed by market id.
/// A side whose fetch fails is stored as `None`; the market is still recorded.
pub async fn collect_historical_prices<A: MarketDataApi>(
    api: &mut A,
    markets: &[Market],
    limit: Option<usize>,
    interval: &str,
    fidelity: u32,
    collected_at: DateTime<Utc>,
) -> (BTreeMap<String, MarketHistory>, CollectStats) {
    let markets = limited(markets, limit);
    let mut stats = CollectStats {
        considered: markets.len(),
        ..CollectStats::default()
    };
    let mut histories = BTreeMap::new();

    for (i, market) in markets.iter().enumerate() {
        info!("[{}/{}] {}", i + 1, markets.len(), market.question_or_unknown());
        let Some((yes_token, no_token)) = market.token_pair() else {
            warn!(market_id = %market.market_id, "skipping: missing token ids");
            stats.skipped_missing_tokens += 1;
            continue;
        };

        let mut series = [None, None];
        for (slot, (side, token_id)) in series
            .iter_mut()
            .zip([(Side::Yes, yes_token), (Side::No, no_token)])
        {
            *slot = match api.fetch_price_history(token_id, interval, fidelity).await {
                Ok(body) => decode_series(body, token_id),
                Err(e) => {
                    warn!(token_id, "price history fetch failed: {e}");
                    stats.failed_fetches += 1;
                    None
                }
            };
            match slot {
                Some(s) => info!("  {side}: {} historical data points", s.history.len()),
                None => info!("  {side}: no historical data available"),
            }
        }
        let [yes_history, no_history] = series;

        histories.insert(
            market.market_id.clone(),
            MarketHistory {
                market_id: market.market_id.clone(),
                question: market.question.clone(),
                yes_token_id: yes_token.to_string(),
                no_token_id: no_token.to_string(),
                data_collected_at: collected_at,
                yes_history,
                no_history,
            },
        );
    }

    stats.collected = histories.len();
    (histories, stats)
}

/// Decode a `/prices-history` body one point at a time. A point whose `t` or
/// `p` does not read as a number keeps `None` there and is dropped at ingest;
/// its neighbours survive.
fn decode_series(body: Value, token_id: &str) -> Option<PriceSeries> {
    let points = match body.get("history") {
        Some(Value::Array(points)) => points,
        None if body.is_object() => return Some(PriceSeries::default()),
        _ => {
            debug!(token_id, "unrecognized price history body");
            return None;
        }
    };
    let history = points
        .iter()
        .map(|point| RawPricePoint {
            t: point.get("t").and_then(lenient_f64),
            p: point.get("p").and_then(lenient_f64),
        })
        .collect();
    Some(PriceSeries { history })
}
