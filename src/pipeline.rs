//! The five stages behind the CLI. Each stage reads its inputs from the data
//! directory or the store and writes its complete output back, so stages can
//! run alone or chained by [`run_all`].

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{info, warn};

use crate::artifacts::{read_optional, read_required, write_json};
use crate::client::MarketDataApi;
use crate::collector::{collect_historical_prices, collect_live_prices, CollectStats};
use crate::config::{Config, DISCOVERY_SAMPLE_SIZE};
use crate::db::{self, Reconciler};
use crate::error::{AppError, Result};
use crate::fetcher::discover_markets;
use crate::types::{AppendCounts, LivePriceSnapshot, Market, MarketHistory, UpsertCounts};

const DISCOVER_HINT: &str = "run `edge-finder discover` first";

/// What one `ingest` pass did per artifact; `None` when the artifact was absent.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub markets: Option<UpsertCounts>,
    pub live_prices: Option<AppendCounts>,
    pub price_history: Option<AppendCounts>,
}

pub async fn discover<A: MarketDataApi>(cfg: &Config, api: &mut A) -> Result<Vec<Market>> {
    info!("discovering active markets");
    let (markets, stats) = discover_markets(api, Utc::now()).await;
    let f = &stats.filter;

    info!(
        pages = stats.pages,
        api_total = stats.api_total,
        duplicates = stats.duplicates,
        "Discovery complete: {} admitted of {} unique markets",
        f.admitted,
        f.total,
    );
    info!(
        "[FILTER] rejected: closed={} (expired_while_active={}) no_token_ids={} no_liquidity={}",
        f.rejected_closed, f.expired_while_active, f.rejected_no_token_ids, f.rejected_no_liquidity,
    );

    if markets.is_empty() {
        return Err(AppError::NoMarkets);
    }

    write_json(&cfg.markets_path(), &markets)?;

    info!("sample of {} admitted markets:", DISCOVERY_SAMPLE_SIZE.min(markets.len()));
    for (i, m) in markets.iter().take(DISCOVERY_SAMPLE_SIZE).enumerate() {
        info!(
            "  {}. {} | ends: {} | liquidity: {} | {}",
            i + 1,
            m.question_or_unknown(),
            m.ending_time.as_deref().unwrap_or("n/a"),
            m.liquidity.map_or_else(|| "n/a".to_string(), |l| format!("${l:.2}")),
            m.url,
        );
    }
    Ok(markets)
}

pub async fn live<A: MarketDataApi>(
    cfg: &Config,
    api: &mut A,
    limit: Option<usize>,
) -> Result<Vec<LivePriceSnapshot>> {
    let markets: Vec<Market> = read_required(&cfg.markets_path(), DISCOVER_HINT)?;
    info!(markets = markets.len(), ?limit, "collecting live order books");

    let (snapshots, stats) = collect_live_prices(api, &markets, limit, Utc::now()).await;
    log_collect("Live prices", &stats);
    write_json(&cfg.live_prices_path(), &snapshots)?;
    Ok(snapshots)
}

pub async fn history<A: MarketDataApi>(
    cfg: &Config,
    api: &mut A,
    limit: Option<usize>,
) -> Result<BTreeMap<String, MarketHistory>> {
    let markets: Vec<Market> = read_required(&cfg.markets_path(), DISCOVER_HINT)?;
    info!(
        markets = markets.len(),
        ?limit,
        interval = %cfg.history_interval,
        fidelity = cfg.history_fidelity,
        "collecting price history"
    );

    let (histories, stats) = collect_historical_prices(
        api,
        &markets,
        limit,
        &cfg.history_interval,
        cfg.history_fidelity,
        Utc::now(),
    )
    .await;
    log_collect("Price history", &stats);
    write_json(&cfg.historical_prices_path(), &histories)?;
    Ok(histories)
}

fn log_collect(stage: &str, stats: &CollectStats) {
    info!(
        considered = stats.considered,
        skipped = stats.skipped_missing_tokens,
        failed_fetches = stats.failed_fetches,
        "{stage}: collected {} of {} markets",
        stats.collected,
        stats.considered,
    );
}

/// Create the store and bring its schema up to date. Safe to rerun.
pub async fn setup_db(cfg: &Config) -> Result<()> {
    let pool = db::open(cfg.db_path(), true).await?;
    db::migrate(&pool).await?;
    info!(path = %cfg.db_path().display(), "database schema ready");
    pool.close().await;
    Ok(())
}

pub async fn ingest(cfg: &Config) -> Result<IngestSummary> {
    let pool = db::open(cfg.db_path(), false).await?;
    let reconciler = Reconciler::new(pool.clone());
    let mut summary = IngestSummary::default();

    if let Some(markets) = read_optional::<Vec<Market>>(&cfg.markets_path())? {
        summary.markets = Some(reconciler.ingest_markets(&markets).await?);
    }
    if let Some(snapshots) = read_optional::<Vec<LivePriceSnapshot>>(&cfg.live_prices_path())? {
        summary.live_prices = Some(reconciler.ingest_live_prices(&snapshots).await?);
    }
    if let Some(histories) =
        read_optional::<BTreeMap<String, MarketHistory>>(&cfg.historical_prices_path())?
    {
        summary.price_history = Some(reconciler.ingest_historical_prices(&histories).await?);
    }
    pool.close().await;

    if summary == IngestSummary::default() {
        warn!("no artifacts found, nothing ingested");
    }
    log_ingest(&summary);
    Ok(summary)
}

fn log_ingest(summary: &IngestSummary) {
    info!("Ingestion summary:");
    match summary.markets {
        Some(c) => info!("  markets:       {} inserted, {} updated", c.inserted, c.updated),
        None => info!("  markets:       skipped"),
    }
    for (label, counts) in [
        ("live prices:  ", summary.live_prices),
        ("price history:", summary.price_history),
    ] {
        match counts {
            Some(c) => info!("  {label} {} inserted, {} duplicates", c.inserted, c.skipped),
            None => info!("  {label} skipped"),
        }
    }
}

/// Every stage in order: discover, live, history, setup-db, ingest.
pub async fn run_all<A: MarketDataApi>(
    cfg: &Config,
    api: &mut A,
    limit: Option<usize>,
) -> Result<IngestSummary> {
    info!("[1/5] discover");
    discover(cfg, api).await?;
    info!("[2/5] live");
    live(cfg, api, limit).await?;
    info!("[3/5] history");
    history(cfg, api, limit).await?;
    info!("[4/5] setup-db");
    setup_db(cfg).await?;
    info!("[5/5] ingest");
    ingest(cfg).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakeApi;
    use serde_json::json;

    fn config(dir: &std::path::Path) -> Config {
        Config {
            data_dir: dir.join("data"),
            db_path: dir.join("data/test.db"),
            ..Config::default()
        }
    }

    fn seeded_api() -> FakeApi {
        let mut api = FakeApi::default();
        api.markets = vec![
            json!({
                "id": "1", "question": "Will it rain?", "slug": "will-it-rain",
                "clobTokenIds": "[\"111111111111\",\"222222222222\"]",
                "outcomes": "[\"Yes\",\"No\"]",
                "liquidity": "1200.5", "active": true, "closed": false,
                "endDate": "2099-06-01T00:00:00Z"
            }),
            json!({
                "id": "2", "question": "Thin market",
                "clobTokenIds": "[\"333333333333\",\"444444444444\"]",
                "liquidity": "0", "closed": false
            }),
        ];
        api.books.insert(
            "111111111111".to_string(),
            json!({ "bids": [{ "price": "0.61" }], "asks": [{ "price": "0.63" }] }),
        );
        api.books.insert(
            "222222222222".to_string(),
            json!({ "bids": [{ "price": "0.37" }], "asks": [{ "price": "0.39" }] }),
        );
        api.histories.insert(
            "111111111111".to_string(),
            json!({ "history": [{ "t": 1700000000, "p": 0.55 }, { "t": 1700003600, "p": 0.6 }] }),
        );
        api.histories.insert(
            "222222222222".to_string(),
            json!({ "history": [{ "t": 1700000000, "p": 0.45 }] }),
        );
        api
    }

    #[tokio::test]
    async fn full_run_then_rerun_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut api = seeded_api();

        let first = run_all(&cfg, &mut api, None).await.unwrap();
        assert_eq!(first.markets, Some(UpsertCounts { inserted: 1, updated: 0 }));
        assert_eq!(first.live_prices, Some(AppendCounts { inserted: 1, skipped: 0 }));
        assert_eq!(first.price_history, Some(AppendCounts { inserted: 3, skipped: 0 }));

        let again = ingest(&cfg).await.unwrap();
        assert_eq!(again.markets, Some(UpsertCounts { inserted: 0, updated: 1 }));
        assert_eq!(again.live_prices, Some(AppendCounts { inserted: 0, skipped: 1 }));
        assert_eq!(again.price_history, Some(AppendCounts { inserted: 0, skipped: 3 }));
    }

    #[tokio::test]
    async fn stages_report_missing_preconditions() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut api = seeded_api();

        let err = live(&cfg, &mut api, None).await.unwrap_err();
        assert!(err.to_string().contains("edge-finder discover"));

        let err = ingest(&cfg).await.unwrap_err();
        assert!(err.to_string().contains("edge-finder setup-db"));
        assert!(!cfg.db_path().exists());
    }

    #[tokio::test]
    async fn ingest_skips_absent_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        setup_db(&cfg).await.unwrap();
        setup_db(&cfg).await.unwrap();

        let summary = ingest(&cfg).await.unwrap();
        assert_eq!(summary, IngestSummary::default());
    }

    #[tokio::test]
    async fn discover_with_nothing_admitted_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut api = FakeApi::default();
        api.markets = vec![json!({ "id": "9", "closed": true, "liquidity": "10" })];

        let err = discover(&cfg, &mut api).await.unwrap_err();
        assert!(matches!(err, AppError::NoMarkets));
        assert!(!cfg.markets_path().exists());
    }

    #[tokio::test]
    async fn history_limit_applies() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut api = seeded_api();
        discover(&cfg, &mut api).await.unwrap();

        let histories = history(&cfg, &mut api, Some(0)).await.unwrap();
        assert!(histories.is_empty());
        assert!(cfg.historical_prices_path().exists());
    }
}
