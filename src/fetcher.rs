use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::client::MarketDataApi;
use crate::config::PAGE_SIZE;
use crate::extract::normalize_market;
use crate::filter::{admit_markets, FilterStats};
use crate::types::Market;

#[derive(Debug, Default)]
pub struct DiscoveryStats {
    pub pages: usize,
    /// Raw records returned across all pages.
    pub api_total: usize,
    /// Records with neither `id` nor `conditionId`.
    pub missing_id: usize,
    /// Records seen again on a later page; the later copy wins.
    pub duplicates: usize,
    pub filter: FilterStats,
}

/// Page through Gamma `/markets` (open markets only), normalize every record
/// and run the admission filter over the de-duplicated result.
///
/// Pagination stops on an empty page, a short page, or a page that failed
/// after retries; a failed page is logged, not fatal.
pub async fn discover_markets<A: MarketDataApi>(
    api: &mut A,
    now: DateTime<Utc>,
) -> (Vec<Market>, DiscoveryStats) {
    let mut stats = DiscoveryStats::default();
    let mut markets: Vec<Market> = Vec::new();
    let mut index_by_id: HashMap<String, usize> = HashMap::new();
    let mut offset = 0usize;

    loop {
        let page = match api.fetch_markets_page(PAGE_SIZE, offset, Some(false)).await {
            Ok(page) => page,
            Err(e) => {
                warn!(offset, "market page fetch failed, ending pagination: {e}");
                break;
            }
        };
        if page.is_empty() {
            info!(offset, "empty page, pagination complete");
            break;
        }

        stats.pages += 1;
        stats.api_total += page.len();
        info!(page = stats.pages, offset, count = page.len(), "retrieved markets page");

        for raw in &page {
            let Some(market) = normalize_market(raw, now) else {
                stats.missing_id += 1;
                continue;
            };
            match index_by_id.get(&market.market_id) {
                Some(&idx) => {
                    stats.duplicates += 1;
                    markets[idx] = market;
                }
                None => {
                    index_by_id.insert(market.market_id.clone(), markets.len());
                    markets.push(market);
                }
            }
        }

        if page.len() < PAGE_SIZE {
            info!("short page, reached end of results");
            break;
        }
        offset += PAGE_SIZE;
    }

    if stats.missing_id > 0 {
        warn!(count = stats.missing_id, "skipped markets without an identifier");
    }

    let (admitted, filter_stats) = admit_markets(markets, now);
    stats.filter = filter_stats;
    (admitted, stats)
}
