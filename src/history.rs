// =============================================================================
// History seeding — optional startup load from the external candle store
// =============================================================================
//
// At startup the engine may pull up to one window of recent closed candles
// per key from the external historical store so indicators are warm before
// the first live bar closes.  Absence of the store, or a failed fetch for a
// key, is informational: aggregation simply begins empty for that key.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::market_data::{Candle, CandleKey};

/// HTTP client for the historical candle store.
pub struct HistoryClient {
    http: reqwest::Client,
    base_url: String,
}

impl HistoryClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    /// Fetch up to `limit` most-recent candles for one key, oldest-first.
    pub async fn fetch_recent(&self, key: &CandleKey, limit: usize) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v1/candles/{}/{}?limit={}",
            self.base_url, key.symbol, key.interval, limit
        );

        let records: Vec<serde_json::Value> = self
            .http
            .get(&url)
            .send()
            .await
            .context("history request failed")?
            .error_for_status()
            .context("history request rejected")?
            .json()
            .await
            .context("history response malformed")?;

        let mut candles = Vec::with_capacity(records.len());
        for record in &records {
            candles.push(parse_history_record(record)?);
        }
        Ok(candles)
    }
}

/// One stored candle in the wire shape the feed uses ({t, o, h, l, c, v});
/// numerics may be strings or numbers.
fn parse_history_record(record: &serde_json::Value) -> Result<Candle> {
    Ok(Candle {
        open_time: record["t"].as_i64().context("missing field t")?,
        open: crate::market_data::feed::parse_wire_f64(&record["o"], "o")?,
        high: crate::market_data::feed::parse_wire_f64(&record["h"], "h")?,
        low: crate::market_data::feed::parse_wire_f64(&record["l"], "l")?,
        close: crate::market_data::feed::parse_wire_f64(&record["c"], "c")?,
        volume: crate::market_data::feed::parse_wire_f64(&record["v"], "v")?,
        is_closed: true,
    })
}

/// Seed the candle store for every configured key.
///
/// Keys that fail to load are skipped with a warning; a missing store
/// entirely (no base URL configured) skips seeding silently.
pub async fn seed_store(state: &Arc<AppState>) {
    let (base_url, symbols, intervals, capacity) = {
        let config = state.runtime_config.read();
        (
            config.history_base_url.clone(),
            config.symbols.clone(),
            config.intervals.clone(),
            config.window_capacity,
        )
    };

    let Some(base_url) = base_url else {
        info!("no historical store configured; starting with empty windows");
        return;
    };

    let client = HistoryClient::new(base_url);
    for symbol in &symbols {
        for interval in &intervals {
            let key = CandleKey::new(symbol.clone(), interval.clone());
            match client.fetch_recent(&key, capacity).await {
                Ok(candles) => {
                    let count = candles.len();
                    for candle in candles {
                        state.candle_store.append_or_replace(&key, candle);
                    }
                    info!(key = %key, count, "historical candles loaded");
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "history load failed; starting empty");
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_record_parses_wire_shape() {
        let record = serde_json::json!({
            "t": 1700000000000i64,
            "o": "100.5", "h": 101.0, "l": "99.5", "c": 100.75, "v": "12.5"
        });
        let candle = parse_history_record(&record).unwrap();
        assert_eq!(candle.open_time, 1_700_000_000_000);
        assert!((candle.open - 100.5).abs() < 1e-12);
        assert!((candle.close - 100.75).abs() < 1e-12);
        assert!(candle.is_closed);
    }

    #[test]
    fn history_record_rejects_missing_fields() {
        let record = serde_json::json!({ "o": "100.5" });
        assert!(parse_history_record(&record).is_err());
    }
}
