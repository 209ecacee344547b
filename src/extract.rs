//! Pulls typed values out of raw Gamma market objects.
//!
//! Several schema generations of the same payload coexist upstream: list
//! fields arrive either as native arrays or as JSON text (`"[\"Yes\",\"No\"]"`),
//! token ids arrive either as a positional pair (`clobTokenIds`) or as tagged
//! objects (`tokens`). Everything here degrades to `None` / empty on malformed
//! input and never returns an error.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::config::{MARKET_URL_PREFIX, MIN_TOKEN_ID_LEN};
use crate::types::{LifecycleState, Market};

/// Build a canonical [`Market`] from one raw Gamma object.
///
/// Returns `None` only when the record carries no usable identifier
/// (`id`, falling back to `conditionId`).
pub fn normalize_market(raw: &Value, now: DateTime<Utc>) -> Option<Market> {
    let market_id = ["id", "conditionId"]
        .iter()
        .find_map(|key| raw.get(*key).and_then(scalar_string))
        .filter(|id| !id.is_empty())?;

    let (yes_token_id, no_token_id) = extract_token_ids(raw);

    let end_date_iso = raw.get("end_date_iso").and_then(scalar_string);
    let ending_time = ["end_date_iso", "endDate", "ending_time"]
        .iter()
        .find_map(|key| raw.get(*key).and_then(scalar_string));

    let closed = raw.get("closed").map(lenient_bool).unwrap_or(false);
    let state_says_closed = raw
        .get("state")
        .and_then(Value::as_str)
        .is_some_and(|s| s.trim().eq_ignore_ascii_case("closed"));
    let state = if closed || state_says_closed {
        LifecycleState::Closed
    } else {
        LifecycleState::Active
    };

    let slug = raw
        .get("slug")
        .and_then(scalar_string)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| market_id.clone());

    Some(Market {
        question: raw.get("question").and_then(scalar_string),
        outcomes: string_list(raw, "outcomes"),
        yes_token_id,
        no_token_id,
        ending_time,
        end_date_iso,
        category: raw
            .get("category")
            .and_then(scalar_string)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
        tags: string_list(raw, "tags"),
        state,
        closed,
        volume: raw.get("volume").and_then(lenient_f64),
        liquidity: raw.get("liquidity").and_then(lenient_f64),
        url: format!("{MARKET_URL_PREFIX}{slug}"),
        data_updated_at: now,
        market_id,
    })
}

/// Resolve `(yes_token_id, no_token_id)`.
///
/// The positional `clobTokenIds` pair wins when both entries are plausible.
/// Otherwise the pair is discarded whole and the tagged `tokens` list is
/// scanned, with later entries overriding earlier ones for the same outcome.
pub fn extract_token_ids(raw: &Value) -> (Option<String>, Option<String>) {
    let pair = decode_json_list(raw.get("clobTokenIds"), "clobTokenIds");
    if pair.len() >= 2 {
        let yes = scalar_string(&pair[0]);
        let no = scalar_string(&pair[1]);
        if let (Some(yes), Some(no)) = (yes, no) {
            if is_valid_token_id(&yes) && is_valid_token_id(&no) {
                return (Some(yes), Some(no));
            }
        }
    }

    let mut yes_token_id = None;
    let mut no_token_id = None;
    for token in decode_json_list(raw.get("tokens"), "tokens") {
        let outcome = token
            .get("outcome")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();
        let token_id = ["token_id", "tokenId"]
            .iter()
            .find_map(|key| token.get(*key).and_then(scalar_string).filter(|s| !s.is_empty()));
        let Some(token_id) = token_id.filter(|id| is_valid_token_id(id)) else {
            continue;
        };
        match outcome.as_str() {
            "yes" => yes_token_id = Some(token_id),
            "no" => no_token_id = Some(token_id),
            _ => {}
        }
    }

    (yes_token_id, no_token_id)
}

pub fn is_valid_token_id(id: &str) -> bool {
    id.chars().count() > MIN_TOKEN_ID_LEN
}

/// A list field that may be a native array or JSON text holding one.
/// Anything else, including undecodable text, becomes an empty list.
pub fn decode_json_list(value: Option<&Value>, field: &str) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => items,
            Ok(other) => {
                debug!(field, "decoded {field} is not a list: {}", truncate(&other.to_string()));
                Vec::new()
            }
            Err(e) => {
                debug!(field, "failed to parse {field} as JSON ({e}): {}", truncate(text));
                Vec::new()
            }
        },
        _ => Vec::new(),
    }
}

/// Ordered string labels for `outcomes` / `tags`. Tag objects contribute their
/// `label` (or `slug`); other non-scalar entries are dropped.
pub fn string_list(raw: &Value, field: &str) -> Vec<String> {
    decode_json_list(raw.get(field), field)
        .iter()
        .filter_map(|item| match item {
            Value::Object(obj) => obj
                .get("label")
                .or_else(|| obj.get("slug"))
                .and_then(scalar_string),
            other => scalar_string(other),
        })
        .collect()
}

/// A number that may be sent as a JSON number or a numeric string.
/// Empty, unparsable and non-finite values are `None`.
pub fn lenient_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<f64>().ok()?
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn lenient_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }
}

/// Strings pass through; numbers are rendered. Null, bools and containers are `None`.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(100) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
