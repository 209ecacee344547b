use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extract::lenient_f64;

/// Top-of-book reduction of one token's order book.
///
/// `mid_price` and `spread` are present iff both sides are. A crossed book
/// (`best_bid > best_ask`) is reported as-is, giving a negative spread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BookSummary {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub mid_price: Option<f64>,
    pub spread: Option<f64>,
}

impl BookSummary {
    pub fn from_best(best_bid: Option<f64>, best_ask: Option<f64>) -> Self {
        let (mid_price, spread) = match (best_bid, best_ask) {
            (Some(bid), Some(ask)) => (Some((bid + ask) / 2.0), Some(ask - bid)),
            _ => (None, None),
        };
        Self {
            best_bid,
            best_ask,
            mid_price,
            spread,
        }
    }
}

/// Summarize a CLOB `/book` body (`{"bids": [{"price": "0.40", ...}], "asks": [...]}`).
/// A missing book, missing sides and levels without a finite numeric price are
/// all tolerated; they simply do not contribute.
pub fn summarize(book: Option<&Value>) -> BookSummary {
    let Some(book) = book else {
        return BookSummary::default();
    };
    let best_bid = level_prices(book.get("bids")).reduce(f64::max);
    let best_ask = level_prices(book.get("asks")).reduce(f64::min);
    BookSummary::from_best(best_bid, best_ask)
}

fn level_prices(side: Option<&Value>) -> impl Iterator<Item = f64> + '_ {
    side.and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|level| level.get("price").and_then(lenient_f64))
}
