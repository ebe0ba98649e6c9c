// =============================================================================
// Market data feed — candle WebSocket client with explicit reconnect policy
// =============================================================================
//
// Connects to the upstream feed, subscribes to one candle channel per
// (symbol, interval) pair, and forwards parsed updates into the engine
// router.  The transport is the only part of the pipeline allowed to fail:
// per-key candle history and indicator state live elsewhere and survive
// reconnects untouched.
//
// Messages that are not candle or price events (subscription acks, pongs,
// notices) are dropped silently.  Unparseable candle payloads are dropped
// with a warning.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::engine::EngineRouter;

use super::candle_store::{Candle, CandleKey};

// ---------------------------------------------------------------------------
// Connection status
// ---------------------------------------------------------------------------

/// Feed transport state, surfaced via the /health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FeedStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reconnect policy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff for the reconnect loop.
///
/// The schedule is deterministic: base, base*2, base*4, ... capped at `max`.
/// A successful connection resets the schedule.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Delay to wait before the next connection attempt, advancing the
    /// schedule.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u64 << self.attempt.min(16);
        let delay = self
            .base
            .checked_mul(factor as u32)
            .unwrap_or(self.max)
            .min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

// ---------------------------------------------------------------------------
// Wire parsing
// ---------------------------------------------------------------------------

/// A parsed inbound feed update.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    /// Pre-bucketed candle for one (symbol, interval) series.
    Candle { key: CandleKey, candle: Candle },
    /// Raw price tick; the engine routes it to every configured interval of
    /// the symbol.
    Tick {
        symbol: String,
        price: f64,
        timestamp: i64,
    },
}

/// Subscribe frame for one (symbol, interval) candle channel.
pub fn subscribe_frame(symbol: &str, interval: &str) -> String {
    serde_json::json!({
        "method": "subscribe",
        "subscription": {
            "type": "candle",
            "coin": symbol,
            "interval": interval,
        }
    })
    .to_string()
}

/// Parse one inbound feed message.
///
/// Returns `None` for anything that is not a candle or price event — those
/// are control traffic and are ignored by design, not errors.
pub fn parse_feed_message(text: &str) -> Option<FeedUpdate> {
    let root: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "unparseable feed message dropped");
            return None;
        }
    };

    if root.get("channel").and_then(|v| v.as_str()) == Some("candle") {
        return match parse_candle_data(&root["data"]) {
            Ok(update) => Some(update),
            Err(e) => {
                warn!(error = %e, "malformed candle payload dropped");
                None
            }
        };
    }

    if root.get("event").and_then(|v| v.as_str()) == Some("price") {
        return match parse_price_event(&root) {
            Ok(update) => Some(update),
            Err(e) => {
                warn!(error = %e, "malformed price event dropped");
                None
            }
        };
    }

    debug!("non-candle feed message ignored");
    None
}

fn parse_candle_data(data: &serde_json::Value) -> Result<FeedUpdate> {
    let symbol = data["s"]
        .as_str()
        .context("missing field data.s")?
        .to_string();
    let interval = data["i"]
        .as_str()
        .context("missing field data.i")?
        .to_string();
    let open_time = data["t"].as_i64().context("missing field data.t")?;

    let open = parse_wire_f64(&data["o"], "data.o")?;
    let high = parse_wire_f64(&data["h"], "data.h")?;
    let low = parse_wire_f64(&data["l"], "data.l")?;
    let close = parse_wire_f64(&data["c"], "data.c")?;
    let volume = parse_wire_f64(&data["v"], "data.v")?;

    Ok(FeedUpdate::Candle {
        key: CandleKey { symbol, interval },
        candle: Candle {
            open_time,
            open,
            high,
            low,
            close,
            volume,
            is_closed: false,
        },
    })
}

fn parse_price_event(root: &serde_json::Value) -> Result<FeedUpdate> {
    let symbol = root["symbol"]
        .as_str()
        .context("missing field symbol")?
        .to_string();
    let price = parse_wire_f64(&root["price"], "price")?;
    let timestamp = root["timestamp"].as_i64().context("missing field timestamp")?;

    Ok(FeedUpdate::Tick {
        symbol,
        price,
        timestamp,
    })
}

/// The feed (and the historical store) send numeric values as either JSON
/// strings or numbers.
pub(crate) fn parse_wire_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

// ---------------------------------------------------------------------------
// Feed loop
// ---------------------------------------------------------------------------

/// Run the feed forever: connect, subscribe, pump messages into the router,
/// and reconnect with bounded backoff whenever the transport drops.
pub async fn run_feed(state: Arc<AppState>, router: EngineRouter) {
    let (url, base_ms, max_ms) = {
        let config = state.runtime_config.read();
        (
            config.feed_url.clone(),
            config.reconnect_base_delay_ms,
            config.reconnect_max_delay_ms,
        )
    };

    let mut policy = ReconnectPolicy::new(
        Duration::from_millis(base_ms),
        Duration::from_millis(max_ms),
    );

    loop {
        state.set_feed_status(FeedStatus::Connecting);

        match run_session(&state, &router, &url).await {
            Ok(()) => {
                warn!("feed stream ended");
            }
            Err(e) => {
                error!(error = %e, "feed session error");
            }
        }

        state.set_feed_status(FeedStatus::Disconnected);
        let delay = policy.next_delay();
        warn!(attempt = policy.attempt(), delay_ms = delay.as_millis() as u64, "feed reconnecting");
        tokio::time::sleep(delay).await;
    }
}

/// One connect-subscribe-read cycle. Returns when the stream ends or errors.
async fn run_session(state: &Arc<AppState>, router: &EngineRouter, url: &str) -> Result<()> {
    info!(url = %url, "connecting to candle feed");

    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to candle feed")?;

    let (mut write, mut read) = ws_stream.split();

    let (symbols, intervals) = {
        let config = state.runtime_config.read();
        (config.symbols.clone(), config.intervals.clone())
    };

    for symbol in &symbols {
        for interval in &intervals {
            write
                .send(Message::Text(subscribe_frame(symbol, interval)))
                .await
                .with_context(|| format!("failed to subscribe {symbol}@{interval}"))?;
        }
    }

    state.set_feed_status(FeedStatus::Connected);
    info!(
        symbols = ?symbols,
        intervals = ?intervals,
        "candle feed connected and subscribed"
    );

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(update) = parse_feed_message(&text) {
                    router.dispatch(update);
                }
            }
            Ok(_) => {
                // Ping/pong/binary frames handled by tungstenite; nothing to do.
            }
            Err(e) => {
                return Err(e).context("feed read error");
            }
        }
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_shape() {
        let frame = subscribe_frame("BTC", "5m");
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["method"], "subscribe");
        assert_eq!(v["subscription"]["type"], "candle");
        assert_eq!(v["subscription"]["coin"], "BTC");
        assert_eq!(v["subscription"]["interval"], "5m");
    }

    #[test]
    fn parse_candle_message_string_numerics() {
        let text = r#"{
            "channel": "candle",
            "data": {
                "s": "BTC", "i": "1m", "t": 1700000000000,
                "o": "37000.0", "h": "37050.5", "l": "36990.0",
                "c": "37020.25", "v": "123.456"
            }
        }"#;
        match parse_feed_message(text) {
            Some(FeedUpdate::Candle { key, candle }) => {
                assert_eq!(key.symbol, "BTC");
                assert_eq!(key.interval, "1m");
                assert_eq!(candle.open_time, 1_700_000_000_000);
                assert!((candle.close - 37_020.25).abs() < 1e-9);
                assert!(!candle.is_closed);
            }
            other => panic!("expected candle update, got {other:?}"),
        }
    }

    #[test]
    fn parse_candle_message_numeric_values() {
        let text = r#"{
            "channel": "candle",
            "data": { "s": "ETH", "i": "1h", "t": 3600000,
                      "o": 1.0, "h": 2.0, "l": 0.5, "c": 1.5, "v": 42 }
        }"#;
        assert!(matches!(
            parse_feed_message(text),
            Some(FeedUpdate::Candle { .. })
        ));
    }

    #[test]
    fn parse_price_tick() {
        let text = r#"{ "event": "price", "symbol": "BTC", "price": 42000.5, "timestamp": 1700000001000 }"#;
        match parse_feed_message(text) {
            Some(FeedUpdate::Tick {
                symbol,
                price,
                timestamp,
            }) => {
                assert_eq!(symbol, "BTC");
                assert!((price - 42_000.5).abs() < 1e-9);
                assert_eq!(timestamp, 1_700_000_001_000);
            }
            other => panic!("expected tick, got {other:?}"),
        }
    }

    #[test]
    fn non_candle_messages_are_ignored() {
        assert_eq!(
            parse_feed_message(r#"{"channel":"subscriptionResponse","data":{}}"#),
            None
        );
        assert_eq!(parse_feed_message("not json at all"), None);
        assert_eq!(
            parse_feed_message(r#"{"channel":"candle","data":{"s":"BTC"}}"#),
            None
        );
    }

    #[test]
    fn reconnect_backoff_doubles_and_caps() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_millis(500), Duration::from_secs(30));

        let delays: Vec<u64> = (0..8).map(|_| policy.next_delay().as_millis() as u64).collect();
        assert_eq!(
            delays,
            vec![500, 1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]
        );

        policy.reset();
        assert_eq!(policy.next_delay(), Duration::from_millis(500));
    }
}
