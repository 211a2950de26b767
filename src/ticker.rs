//! Price channel messages and the latest-price board built from them.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    #[serde(alias = "symbol")]
    pub ticker: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl PriceTick {
    fn parsed_time(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(self.timestamp.as_deref()?).ok()
    }
}

/// Parse one price-channel frame. Anything other than a well-formed
/// `price_update` is `None`.
pub fn normalize_tick(text: &str) -> Option<PriceTick> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("type").and_then(Value::as_str) != Some("price_update") {
        return None;
    }
    let body = match value.get("data") {
        Some(data @ Value::Object(_)) => data,
        _ => &value,
    };
    let tick = PriceTick::deserialize(body).ok()?;
    if tick.ticker.is_empty() || !tick.price.is_finite() {
        return None;
    }
    Some(tick)
}

/// Latest tick per ticker.
#[derive(Debug, Default, Clone)]
pub struct TickerBoard {
    latest: BTreeMap<String, PriceTick>,
}

impl TickerBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the tick unless it is older than the one already held.
    pub fn apply(&mut self, tick: PriceTick) -> bool {
        if let Some(current) = self.latest.get(&tick.ticker) {
            if let (Some(held), Some(incoming)) = (current.parsed_time(), tick.parsed_time()) {
                if incoming < held {
                    return false;
                }
            }
        }
        self.latest.insert(tick.ticker.clone(), tick);
        true
    }

    pub fn get(&self, ticker: &str) -> Option<&PriceTick> {
        self.latest.get(ticker)
    }

    /// Ticks ordered by ticker.
    pub fn snapshot(&self) -> Vec<PriceTick> {
        self.latest.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.latest.clear();
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}
