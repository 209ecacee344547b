use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{info, warn};

use crate::error::Result;
use crate::filter::parse_end_time;
use crate::types::{
    AppendCounts, HistoricalPricePoint, LivePriceSnapshot, Market, MarketHistory, Side,
    UpsertCounts,
};

/// Merges pipeline artifacts into the store.
///
/// Each batch runs inside one transaction: either every row of the batch is
/// applied or none is. Uniqueness is enforced by checking before writing, so
/// a rerun over the same input never trips a constraint.
pub struct Reconciler {
    pool: SqlitePool,
}

impl Reconciler {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert new markets; overwrite every mutable field of known ones.
    pub async fn ingest_markets(&self, markets: &[Market]) -> Result<UpsertCounts> {
        info!(count = markets.len(), "ingesting markets");
        let mut counts = UpsertCounts::default();
        let mut tx = self.pool.begin().await?;

        for market in markets {
            if market.market_id.is_empty() {
                warn!("skipping market without market_id");
                continue;
            }
            if market_exists(&mut tx, &market.market_id).await? {
                update_market(&mut tx, market).await?;
                counts.updated += 1;
            } else {
                insert_market(&mut tx, market).await?;
                counts.inserted += 1;
            }
        }

        tx.commit().await?;
        info!(
            inserted = counts.inserted,
            updated = counts.updated,
            "Markets: {} inserted, {} updated",
            counts.inserted,
            counts.updated
        );
        Ok(counts)
    }

    /// Append snapshots whose `(market_id, timestamp)` is not stored yet.
    pub async fn ingest_live_prices(&self, snapshots: &[LivePriceSnapshot]) -> Result<AppendCounts> {
        info!(count = snapshots.len(), "ingesting live price snapshots");
        let mut counts = AppendCounts::default();
        let mut tx = self.pool.begin().await?;

        for snap in snapshots {
            if snap.market_id.is_empty() {
                warn!("skipping price snapshot without market_id");
                continue;
            }
            let existing = sqlx::query_scalar::<_, i64>(
                "SELECT id FROM live_prices WHERE market_id = ? AND timestamp = ?",
            )
            .bind(&snap.market_id)
            .bind(snap.timestamp)
            .fetch_optional(&mut *tx)
            .await?;
            if existing.is_some() {
                counts.skipped += 1;
                continue;
            }

            sqlx::query(
                r#"
                INSERT INTO live_prices (
                    market_id, question, yes_token_id, no_token_id,
                    yes_best_bid, yes_best_ask, yes_mid_price, yes_spread,
                    no_best_bid, no_best_ask, no_mid_price, no_spread,
                    timestamp
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&snap.market_id)
            .bind(&snap.question)
            .bind(&snap.yes_token_id)
            .bind(&snap.no_token_id)
            .bind(snap.yes.best_bid)
            .bind(snap.yes.best_ask)
            .bind(snap.yes.mid_price)
            .bind(snap.yes.spread)
            .bind(snap.no.best_bid)
            .bind(snap.no.best_ask)
            .bind(snap.no.mid_price)
            .bind(snap.no.spread)
            .bind(snap.timestamp)
            .execute(&mut *tx)
            .await?;
            counts.inserted += 1;
        }

        tx.commit().await?;
        info!(
            inserted = counts.inserted,
            skipped = counts.skipped,
            "Live prices: {} inserted, {} skipped (duplicates)",
            counts.inserted,
            counts.skipped
        );
        Ok(counts)
    }

    /// Flatten every market's YES/NO series and append points whose
    /// `(market_id, side, timestamp)` is not stored yet.
    pub async fn ingest_historical_prices(
        &self,
        histories: &BTreeMap<String, MarketHistory>,
    ) -> Result<AppendCounts> {
        info!(markets = histories.len(), "ingesting historical prices");
        let mut counts = AppendCounts::default();
        let mut tx = self.pool.begin().await?;

        for (market_id, entry) in histories {
            for point in flatten_history(market_id, entry) {
                let existing = sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM price_history WHERE market_id = ? AND side = ? AND timestamp = ?",
                )
                .bind(&point.market_id)
                .bind(point.side.as_str())
                .bind(point.timestamp)
                .fetch_optional(&mut *tx)
                .await?;
                if existing.is_some() {
                    counts.skipped += 1;
                    continue;
                }

                sqlx::query(
                    r#"
                    INSERT INTO price_history (
                        market_id, question, yes_token_id, no_token_id,
                        side, price, timestamp
                    ) VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&point.market_id)
                .bind(&entry.question)
                .bind(&entry.yes_token_id)
                .bind(&entry.no_token_id)
                .bind(point.side.as_str())
                .bind(point.price)
                .bind(point.timestamp)
                .execute(&mut *tx)
                .await?;
                counts.inserted += 1;
            }
        }

        tx.commit().await?;
        info!(
            inserted = counts.inserted,
            skipped = counts.skipped,
            "Price history: {} inserted, {} skipped (duplicates)",
            counts.inserted,
            counts.skipped
        );
        Ok(counts)
    }
}

/// Storable points of one market's history. Points missing either the epoch
/// or the price are dropped.
pub fn flatten_history(market_id: &str, entry: &MarketHistory) -> Vec<HistoricalPricePoint> {
    Side::BOTH
        .iter()
        .filter_map(|&side| entry.series(side).map(|s| (side, s)))
        .flat_map(|(side, series)| {
            series.history.iter().filter_map(move |point| {
                let timestamp = epoch_to_utc(point.t?)?;
                let price = point.p.filter(|p| p.is_finite())?;
                Some(HistoricalPricePoint {
                    market_id: market_id.to_string(),
                    side,
                    price,
                    timestamp,
                })
            })
        })
        .collect()
}

pub fn epoch_to_utc(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

async fn market_exists(tx: &mut Transaction<'_, Sqlite>, market_id: &str) -> Result<bool> {
    let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM markets WHERE market_id = ?")
        .bind(market_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(existing.is_some())
}

async fn insert_market(tx: &mut Transaction<'_, Sqlite>, m: &Market) -> Result<()> {
    let outcomes = serde_json::to_string(&m.outcomes)?;
    let tags = serde_json::to_string(&m.tags)?;
    let ending_time = m.ending_time.as_deref().and_then(parse_end_time);

    sqlx::query(
        r#"
        INSERT INTO markets (
            market_id, question, outcomes, yes_token_id, no_token_id,
            ending_time, category, tags, state, volume, liquidity,
            url, data_updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&m.market_id)
    .bind(&m.question)
    .bind(outcomes)
    .bind(&m.yes_token_id)
    .bind(&m.no_token_id)
    .bind(ending_time)
    .bind(&m.category)
    .bind(tags)
    .bind(m.state.as_str())
    .bind(m.volume)
    .bind(m.liquidity)
    .bind(&m.url)
    .bind(m.data_updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn update_market(tx: &mut Transaction<'_, Sqlite>, m: &Market) -> Result<()> {
    let outcomes = serde_json::to_string(&m.outcomes)?;
    let tags = serde_json::to_string(&m.tags)?;
    let ending_time = m.ending_time.as_deref().and_then(parse_end_time);

    sqlx::query(
        r#"
        UPDATE markets
        SET question = ?,
            outcomes = ?,
            yes_token_id = ?,
            no_token_id = ?,
            ending_time = ?,
            category = ?,
            tags = ?,
            state = ?,
            volume = ?,
            liquidity = ?,
            url = ?,
            data_updated_at = ?
        WHERE market_id = ?
        "#,
    )
    .bind(&m.question)
    .bind(outcomes)
    .bind(&m.yes_token_id)
    .bind(&m.no_token_id)
    .bind(ending_time)
    .bind(&m.category)
    .bind(tags)
    .bind(m.state.as_str())
    .bind(m.volume)
    .bind(m.liquidity)
    .bind(&m.url)
    .bind(m.data_updated_at)
    .bind(&m.market_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{LivePriceRow, MarketRow, PriceHistoryRow};
    use crate::orderbook::BookSummary;
    use crate::testkit::memory_pool;
    use crate::types::{LifecycleState, PriceSeries, RawPricePoint};
    use chrono::TimeZone;

    fn market(id: &str, question: &str) -> Market {
        Market {
            market_id: id.to_string(),
            question: Some(question.to_string()),
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            yes_token_id: Some("111111111111".to_string()),
            no_token_id: Some("222222222222".to_string()),
            ending_time: Some("2099-01-01T00:00:00Z".to_string()),
            end_date_iso: None,
            category: "unknown".to_string(),
            tags: vec!["politics".to_string()],
            state: LifecycleState::Active,
            closed: false,
            volume: Some(10.0),
            liquidity: Some(150.5),
            url: format!("https://polymarket.com/event/{id}"),
            data_updated_at: Utc::now(),
        }
    }

    fn snapshot(id: &str, at: DateTime<Utc>) -> LivePriceSnapshot {
        LivePriceSnapshot {
            market_id: id.to_string(),
            question: Some("Q?".to_string()),
            yes_token_id: "111111111111".to_string(),
            no_token_id: "222222222222".to_string(),
            timestamp: at,
            yes: BookSummary::from_best(Some(0.40), Some(0.44)),
            no: BookSummary::from_best(Some(0.55), None),
        }
    }

    type Points<'a> = &'a [(Option<f64>, Option<f64>)];

    /// An empty `no` slice stands for a failed NO fetch.
    fn history(id: &str, yes: Points<'_>, no: Points<'_>) -> MarketHistory {
        let series = |pts: Points<'_>| PriceSeries {
            history: pts.iter().map(|&(t, p)| RawPricePoint { t, p }).collect(),
        };
        MarketHistory {
            market_id: id.to_string(),
            question: Some("Q?".to_string()),
            yes_token_id: "111111111111".to_string(),
            no_token_id: "222222222222".to_string(),
            data_collected_at: Utc::now(),
            yes_history: Some(series(yes)),
            no_history: (!no.is_empty()).then(|| series(no)),
        }
    }

    #[tokio::test]
    async fn markets_insert_then_overwrite() {
        let pool = memory_pool().await;
        let rec = Reconciler::new(pool.clone());

        let counts = rec.ingest_markets(&[market("m1", "first"), market("m2", "other")]).await.unwrap();
        assert_eq!(counts, UpsertCounts { inserted: 2, updated: 0 });

        let mut changed = market("m1", "second");
        changed.state = LifecycleState::Closed;
        changed.liquidity = None;
        let counts = rec.ingest_markets(&[changed]).await.unwrap();
        assert_eq!(counts, UpsertCounts { inserted: 0, updated: 1 });

        let rows: Vec<MarketRow> = sqlx::query_as("SELECT * FROM markets ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].question.as_deref(), Some("second"));
        assert_eq!(rows[0].state.as_deref(), Some("closed"));
        assert_eq!(rows[0].liquidity, None);
        assert_eq!(rows[0].outcomes.as_deref(), Some(r#"["Yes","No"]"#));
        assert_eq!(
            rows[0].ending_time,
            Some(Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap())
        );
        assert!(rows[0].id < rows[1].id);
    }

    #[tokio::test]
    async fn live_snapshots_are_idempotent_per_timestamp() {
        let pool = memory_pool().await;
        let rec = Reconciler::new(pool.clone());
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let batch = vec![snapshot("m1", t0), snapshot("m2", t0)];

        let first = rec.ingest_live_prices(&batch).await.unwrap();
        assert_eq!(first, AppendCounts { inserted: 2, skipped: 0 });
        let second = rec.ingest_live_prices(&batch).await.unwrap();
        assert_eq!(second, AppendCounts { inserted: 0, skipped: 2 });

        let later = rec
            .ingest_live_prices(&[snapshot("m1", t0 + chrono::Duration::minutes(5))])
            .await
            .unwrap();
        assert_eq!(later.inserted, 1);

        let rows: Vec<LivePriceRow> =
            sqlx::query_as("SELECT * FROM live_prices WHERE market_id = 'm1' ORDER BY timestamp")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, t0);
        assert_eq!(rows[0].yes_best_bid, Some(0.40));
        assert_eq!(rows[0].no_best_ask, None);
        assert_eq!(rows[0].no_mid_price, None);
    }

    #[tokio::test]
    async fn history_point_inserted_once() {
        let pool = memory_pool().await;
        let rec = Reconciler::new(pool.clone());
        let mut batch = BTreeMap::new();
        batch.insert("M".to_string(), history("M", &[(Some(1_700_000_000.0), Some(0.55))], &[]));

        let first = rec.ingest_historical_prices(&batch).await.unwrap();
        assert_eq!(first, AppendCounts { inserted: 1, skipped: 0 });
        let second = rec.ingest_historical_prices(&batch).await.unwrap();
        assert_eq!(second, AppendCounts { inserted: 0, skipped: 1 });

        let rows: Vec<PriceHistoryRow> =
            sqlx::query_as("SELECT id, market_id, side, price, timestamp FROM price_history")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].side, "YES");
        assert_eq!(rows[0].price, 0.55);
        assert_eq!(rows[0].timestamp, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    }

    #[tokio::test]
    async fn overlapping_windows_insert_only_new_points() {
        let pool = memory_pool().await;
        let rec = Reconciler::new(pool.clone());

        let mut early = BTreeMap::new();
        early.insert(
            "M".to_string(),
            history("M", &[(Some(100.0), Some(0.5)), (Some(160.0), Some(0.51))], &[(Some(100.0), Some(0.5))]),
        );
        rec.ingest_historical_prices(&early).await.unwrap();

        let mut late = BTreeMap::new();
        late.insert(
            "M".to_string(),
            history(
                "M",
                &[(Some(160.0), Some(0.51)), (Some(220.0), Some(0.52)), (None, Some(0.9)), (Some(280.0), None)],
                &[(Some(100.0), Some(0.5)), (Some(160.0), Some(0.49))],
            ),
        );
        let counts = rec.ingest_historical_prices(&late).await.unwrap();
        assert_eq!(counts, AppendCounts { inserted: 2, skipped: 2 });

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_history")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(total, 5);
    }

    #[test]
    fn flatten_drops_incomplete_points() {
        let entry = history(
            "M",
            &[(Some(1.0), Some(0.1)), (None, Some(0.2)), (Some(3.0), None)],
            &[(Some(1.0), Some(0.9))],
        );
        let points = flatten_history("M", &entry);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].side, Side::Yes);
        assert_eq!(points[1].side, Side::No);
        assert_eq!(points[1].price, 0.9);
    }

    #[test]
    fn epoch_conversion() {
        assert_eq!(
            epoch_to_utc(1_700_000_000.0),
            Some(Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap())
        );
        assert_eq!(epoch_to_utc(f64::NAN), None);
        assert_eq!(
            epoch_to_utc(1.5).map(|t| t.timestamp_subsec_millis()),
            Some(500)
        );
    }

    async fn abort_inserts_for(pool: &SqlitePool, table: &str) {
        let sql = format!(
            "CREATE TRIGGER abort_{table} BEFORE INSERT ON {table} \
             WHEN NEW.market_id = 'bad' \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END"
        );
        sqlx::query(&sql).execute(pool).await.unwrap();
    }

    async fn row_count(pool: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn failed_market_batch_leaves_nothing_behind() {
        let pool = memory_pool().await;
        abort_inserts_for(&pool, "markets").await;
        let rec = Reconciler::new(pool.clone());

        let result = rec.ingest_markets(&[market("ok", "fine"), market("bad", "boom")]).await;
        assert!(result.is_err());
        assert_eq!(row_count(&pool, "markets").await, 0);
    }

    #[tokio::test]
    async fn failed_live_batch_leaves_nothing_behind() {
        let pool = memory_pool().await;
        abort_inserts_for(&pool, "live_prices").await;
        let rec = Reconciler::new(pool.clone());
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();

        let result = rec.ingest_live_prices(&[snapshot("ok", t0), snapshot("bad", t0)]).await;
        assert!(result.is_err());
        assert_eq!(row_count(&pool, "live_prices").await, 0);
    }
}
