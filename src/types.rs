use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::orderbook::BookSummary;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// A market in canonical shape: every field that arrives in more than one
/// encoding upstream has already been collapsed by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub market_id: String,
    pub question: Option<String>,
    #[serde(default)]
    pub outcomes: Vec<String>,
    pub yes_token_id: Option<String>,
    pub no_token_id: Option<String>,
    /// Best available end-of-trading timestamp, exactly as the API sent it.
    pub ending_time: Option<String>,
    pub end_date_iso: Option<String>,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub state: LifecycleState,
    #[serde(default)]
    pub closed: bool,
    pub volume: Option<f64>,
    pub liquidity: Option<f64>,
    pub url: String,
    pub data_updated_at: DateTime<Utc>,
}

impl Market {
    pub fn question_or_unknown(&self) -> &str {
        self.question.as_deref().unwrap_or("Unknown")
    }

    /// Both token ids, only when both are present.
    pub fn token_pair(&self) -> Option<(&str, &str)> {
        match (self.yes_token_id.as_deref(), self.no_token_id.as_deref()) {
            (Some(yes), Some(no)) if !yes.is_empty() && !no.is_empty() => Some((yes, no)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum LifecycleState {
    Active,
    Closed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Active => "active",
            LifecycleState::Closed => "closed",
        }
    }
}

impl TryFrom<String> for LifecycleState {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl std::str::FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("closed") {
            Ok(LifecycleState::Closed)
        } else if s.trim().eq_ignore_ascii_case("active") {
            Ok(LifecycleState::Active)
        } else {
            Err(format!("unknown lifecycle state: {s}"))
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Outcome side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Yes, Side::No];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "YES",
            Side::No => "NO",
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "YES" => Ok(Side::Yes),
            "NO" => Ok(Side::No),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Live prices
// ---------------------------------------------------------------------------

/// One order-book capture for both outcome tokens of a market.
/// Identity is `(market_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePriceSnapshot {
    pub market_id: String,
    pub question: Option<String>,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub timestamp: DateTime<Utc>,
    pub yes: BookSummary,
    pub no: BookSummary,
}

// ---------------------------------------------------------------------------
// Historical prices
// ---------------------------------------------------------------------------

/// Per-market entry of the historical artifact. A side is `None` when its
/// fetch failed outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketHistory {
    pub market_id: String,
    pub question: Option<String>,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub data_collected_at: DateTime<Utc>,
    pub yes_history: Option<PriceSeries>,
    pub no_history: Option<PriceSeries>,
}

impl MarketHistory {
    pub fn series(&self, side: Side) -> Option<&PriceSeries> {
        match side {
            Side::Yes => self.yes_history.as_ref(),
            Side::No => self.no_history.as_ref(),
        }
    }
}

/// Body of `/prices-history`: `{"history": [{"t": 1700000000, "p": 0.55}, ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    #[serde(default)]
    pub history: Vec<RawPricePoint>,
}

/// A point as the API sends it. Either half may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPricePoint {
    #[serde(default)]
    pub t: Option<f64>,
    #[serde(default)]
    pub p: Option<f64>,
}

/// A flattened, storable history row. Identity is `(market_id, side, timestamp)`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalPricePoint {
    pub market_id: String,
    pub side: Side,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Reconciliation tallies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendCounts {
    pub inserted: usize,
    pub skipped: usize,
}
