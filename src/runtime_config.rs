// =============================================================================
// Runtime Configuration — engine settings with atomic save
// =============================================================================
//
// Central configuration for the Helix engine: watched symbols and intervals,
// window sizing, collaborator endpoints, retry tuning, and the strategy
// table.  Persistence uses an atomic tmp + rename pattern so a crash mid-save
// cannot corrupt the file.  Every field carries a serde default so older
// config files keep loading as fields are added.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::strategy::{StrategyEntry, StrategySpec};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec!["BTC".to_string()]
}

fn default_intervals() -> Vec<String> {
    vec![
        "1m".to_string(),
        "5m".to_string(),
        "15m".to_string(),
        "1h".to_string(),
        "4h".to_string(),
    ]
}

/// One week of 5-minute bars.
fn default_window_capacity() -> usize {
    2016
}

fn default_feed_url() -> String {
    "wss://api.hyperliquid.xyz/ws".to_string()
}

fn default_directory_base_url() -> String {
    "http://127.0.0.1:4000".to_string()
}

fn default_queue_base_url() -> String {
    "http://127.0.0.1:4100".to_string()
}

fn default_engine_workers() -> usize {
    4
}

fn default_reconnect_base_delay_ms() -> u64 {
    500
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_dispatch_max_attempts() -> u32 {
    5
}

fn default_dispatch_base_delay_ms() -> u64 {
    250
}

fn default_dispatch_max_delay_ms() -> u64 {
    5_000
}

fn default_strategies() -> Vec<StrategyEntry> {
    vec![
        StrategyEntry {
            id: "690a5940d863d469e89f962f".to_string(),
            spec: StrategySpec::EmaCross {
                fast_period: 9,
                slow_period: 50,
            },
        },
        StrategyEntry {
            id: "690a5940d863d469e89f9630".to_string(),
            spec: StrategySpec::RsiThreshold {
                period: 14,
                overbought: 70.0,
                oversold: 30.0,
                mode: Default::default(),
            },
        },
    ]
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the Helix engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Market data ---------------------------------------------------------

    /// Symbols (feed "coin" identifiers) the engine subscribes to.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Candle intervals subscribed per symbol.
    #[serde(default = "default_intervals")]
    pub intervals: Vec<String>,

    /// Rolling window capacity per (symbol, interval) key, in candles.
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,

    /// Candle feed WebSocket endpoint.
    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    // --- Collaborators -------------------------------------------------------

    /// Base URL of the user/strategy directory service.
    #[serde(default = "default_directory_base_url")]
    pub directory_base_url: String,

    /// Base URL of the execution work-queue service.
    #[serde(default = "default_queue_base_url")]
    pub queue_base_url: String,

    /// Base URL of the historical candle store; `None` disables seeding.
    #[serde(default)]
    pub history_base_url: Option<String>,

    // --- Concurrency ---------------------------------------------------------

    /// Number of engine workers; each key is pinned to exactly one worker.
    #[serde(default = "default_engine_workers")]
    pub engine_workers: usize,

    // --- Retry tuning --------------------------------------------------------

    /// First reconnect delay after a feed drop (doubles up to the max).
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Reconnect delay ceiling.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    /// Publish attempts per execution request before the trigger is dropped.
    #[serde(default = "default_dispatch_max_attempts")]
    pub dispatch_max_attempts: u32,

    /// First retry delay for a failed publish (doubles up to the max).
    #[serde(default = "default_dispatch_base_delay_ms")]
    pub dispatch_base_delay_ms: u64,

    /// Publish retry delay ceiling.
    #[serde(default = "default_dispatch_max_delay_ms")]
    pub dispatch_max_delay_ms: u64,

    // --- Strategies ----------------------------------------------------------

    /// Strategy instances keyed by the stable indicator id the directory
    /// stores in subscription documents.
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyEntry>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            intervals: default_intervals(),
            window_capacity: default_window_capacity(),
            feed_url: default_feed_url(),
            directory_base_url: default_directory_base_url(),
            queue_base_url: default_queue_base_url(),
            history_base_url: None,
            engine_workers: default_engine_workers(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            dispatch_max_attempts: default_dispatch_max_attempts(),
            dispatch_base_delay_ms: default_dispatch_base_delay_ms(),
            dispatch_max_delay_ms: default_dispatch_max_delay_ms(),
            strategies: default_strategies(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// Returns an error when the file is missing or malformed so the caller
    /// can fall back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            intervals = ?config.intervals,
            strategies = config.strategies.len(),
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.symbols, vec!["BTC"]);
        assert_eq!(cfg.intervals.len(), 5);
        assert_eq!(cfg.window_capacity, 2016);
        assert_eq!(cfg.engine_workers, 4);
        assert_eq!(cfg.dispatch_max_attempts, 5);
        assert!(cfg.history_base_url.is_none());
        assert_eq!(cfg.strategies.len(), 2);
        assert_eq!(cfg.strategies[0].id, "690a5940d863d469e89f962f");
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.window_capacity, 2016);
        assert_eq!(cfg.feed_url, "wss://api.hyperliquid.xyz/ws");
        assert_eq!(cfg.reconnect_base_delay_ms, 500);
        assert_eq!(cfg.strategies.len(), 2);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "symbols": ["ETH", "SOL"],
            "intervals": ["5m"],
            "strategies": [
                { "id": "abc", "kind": "sma_cross", "fast_period": 5, "slow_period": 20 }
            ]
        }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["ETH", "SOL"]);
        assert_eq!(cfg.intervals, vec!["5m"]);
        assert_eq!(cfg.window_capacity, 2016);
        assert_eq!(cfg.strategies.len(), 1);
        assert_eq!(
            cfg.strategies[0].spec,
            StrategySpec::SmaCross {
                fast_period: 5,
                slow_period: 20
            }
        );
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.intervals, cfg2.intervals);
        assert_eq!(cfg.strategies, cfg2.strategies);
        assert_eq!(cfg.window_capacity, cfg2.window_capacity);
    }
}
