use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::debug;

use crate::extract::is_valid_token_id;
use crate::types::{LifecycleState, Market};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Closed by flag or state, or past its end timestamp.
    Closed,
    NoTokenIds,
    NoLiquidity,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Rejection::Closed => "closed",
            Rejection::NoTokenIds => "no_token_ids",
            Rejection::NoLiquidity => "no_liquidity",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FilterStats {
    pub total: usize,
    pub admitted: usize,
    pub rejected_closed: usize,
    pub rejected_no_token_ids: usize,
    pub rejected_no_liquidity: usize,
    /// Subset of `rejected_closed` whose flags said active but whose end time had passed.
    pub expired_while_active: usize,
}

impl FilterStats {
    fn record(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::Closed => self.rejected_closed += 1,
            Rejection::NoTokenIds => self.rejected_no_token_ids += 1,
            Rejection::NoLiquidity => self.rejected_no_liquidity += 1,
        }
    }
}

/// Split `markets` into the admitted subset and a per-reason rejection tally.
/// Admitted markets are returned unmodified and in input order.
pub fn admit_markets(markets: Vec<Market>, now: DateTime<Utc>) -> (Vec<Market>, FilterStats) {
    let mut stats = FilterStats {
        total: markets.len(),
        ..FilterStats::default()
    };
    let mut admitted = Vec::with_capacity(markets.len());

    for market in markets {
        match check_market(&market, now) {
            Ok(()) => admitted.push(market),
            Err(rejection) => {
                if rejection == Rejection::Closed && !flagged_closed(&market) {
                    stats.expired_while_active += 1;
                    debug!(
                        market_id = %market.market_id,
                        ending_time = ?market.ending_time,
                        "rejected as closed: end time passed while state still active"
                    );
                }
                stats.record(rejection);
            }
        }
    }

    stats.admitted = admitted.len();
    (admitted, stats)
}

/// Ordered predicate chain; the first failing check decides the bucket.
pub fn check_market(market: &Market, now: DateTime<Utc>) -> Result<(), Rejection> {
    if flagged_closed(market) || has_ended(market, now) {
        return Err(Rejection::Closed);
    }

    let tokens_ok = [&market.yes_token_id, &market.no_token_id]
        .iter()
        .all(|id| id.as_deref().is_some_and(is_valid_token_id));
    if !tokens_ok {
        return Err(Rejection::NoTokenIds);
    }

    match market.liquidity {
        Some(liquidity) if liquidity.is_finite() && liquidity != 0.0 => Ok(()),
        _ => Err(Rejection::NoLiquidity),
    }
}

fn flagged_closed(market: &Market) -> bool {
    market.closed || market.state == LifecycleState::Closed
}

/// An end time in the past overrides a stale `active` state.
/// Missing or unparsable end times never reject.
fn has_ended(market: &Market, now: DateTime<Utc>) -> bool {
    market
        .ending_time
        .as_deref()
        .and_then(parse_end_time)
        .is_some_and(|end| end < now)
}

/// Parse an ISO-8601 end time. A trailing `Z` is rewritten as `+00:00`;
/// offset-less date-times and bare dates are taken as UTC.
pub fn parse_end_time(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let normalized = match s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        Some(stem) => format!("{stem}+00:00"),
        None => s.to_string(),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
