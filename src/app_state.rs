// =============================================================================
// Central Application State — Helix Algorithm Engine
// =============================================================================
//
// The single state container for one engine instance: configuration, the
// shared candle store, the strategy registry, feed status, and operational
// counters.  There is no module-level mutable state anywhere in the crate —
// several independent engines can coexist in one process, which is exactly
// what the pipeline tests do.
//
// Thread safety:
//   - Atomic counters for lock-free accounting.
//   - parking_lot::RwLock for mutable shared collections.
//   - Per-key pipeline state lives inside the engine workers, not here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::market_data::{CandleStore, FeedStatus};
use crate::runtime_config::RuntimeConfig;
use crate::strategy::StrategyRegistry;
use crate::types::{FiredSignal, SignalEvent};

/// Maximum number of recent signal fires retained for the /info surface.
const MAX_RECENT_SIGNALS: usize = 100;

/// Shared state for one engine instance, wrapped in `Arc` at startup.
pub struct AppState {
    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: RwLock<RuntimeConfig>,

    /// Strategy table, immutable after startup.
    pub registry: StrategyRegistry,

    // ── Market data ─────────────────────────────────────────────────────
    pub candle_store: Arc<CandleStore>,

    // ── Feed status ─────────────────────────────────────────────────────
    feed_status: RwLock<FeedStatus>,

    // ── Signal audit trail ──────────────────────────────────────────────
    pub recent_signals: RwLock<Vec<SignalEvent>>,

    // ── Counters ────────────────────────────────────────────────────────
    pub events_processed: AtomicU64,
    pub signals_fired: AtomicU64,
    pub triggers_dispatched: AtomicU64,
    pub triggers_dropped: AtomicU64,

    // ── Timing ──────────────────────────────────────────────────────────
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct state from the given runtime configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        let registry = StrategyRegistry::from_entries(&config.strategies);
        let candle_store = Arc::new(CandleStore::new(config.window_capacity));

        Self {
            runtime_config: RwLock::new(config),
            registry,
            candle_store,
            feed_status: RwLock::new(FeedStatus::Disconnected),
            recent_signals: RwLock::new(Vec::new()),
            events_processed: AtomicU64::new(0),
            signals_fired: AtomicU64::new(0),
            triggers_dispatched: AtomicU64::new(0),
            triggers_dropped: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Feed status ─────────────────────────────────────────────────────

    pub fn set_feed_status(&self, status: FeedStatus) {
        *self.feed_status.write() = status;
    }

    pub fn feed_status(&self) -> FeedStatus {
        *self.feed_status.read()
    }

    // ── Signal audit ────────────────────────────────────────────────────

    /// Record a fired signal in the capped audit ring and bump the counter.
    pub fn record_signal(&self, fired: &FiredSignal) {
        let event = SignalEvent {
            symbol: fired.key.symbol.clone(),
            interval: fired.key.interval.clone(),
            indicator_id: fired.indicator_id.clone(),
            indicator_name: fired.indicator_name.clone(),
            direction: fired.direction.to_string(),
            bucket: fired.bucket,
            at: Utc::now().to_rfc3339(),
        };

        let mut signals = self.recent_signals.write();
        signals.push(event);
        while signals.len() > MAX_RECENT_SIGNALS {
            signals.remove(0);
        }

        self.signals_fired.fetch_add(1, Ordering::Relaxed);
    }

    // ── Timing ──────────────────────────────────────────────────────────

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::CandleKey;
    use crate::types::Signal;

    #[test]
    fn signal_ring_is_capped() {
        let state = AppState::new(RuntimeConfig::default());
        for i in 0..(MAX_RECENT_SIGNALS + 20) {
            state.record_signal(&FiredSignal {
                key: CandleKey::new("BTC", "1m"),
                indicator_id: "x".into(),
                indicator_name: "EMA_CROSS_9_50".into(),
                direction: Signal::Buy,
                bucket: i as i64,
            });
        }
        assert_eq!(state.recent_signals.read().len(), MAX_RECENT_SIGNALS);
        assert_eq!(
            state.signals_fired.load(Ordering::Relaxed),
            (MAX_RECENT_SIGNALS + 20) as u64
        );
        // Oldest entries were evicted.
        assert_eq!(state.recent_signals.read()[0].bucket, 20);
    }

    #[test]
    fn feed_status_roundtrip() {
        let state = AppState::new(RuntimeConfig::default());
        assert_eq!(state.feed_status(), FeedStatus::Disconnected);
        state.set_feed_status(FeedStatus::Connected);
        assert_eq!(state.feed_status(), FeedStatus::Connected);
    }

    #[test]
    fn registry_is_built_from_config() {
        let state = AppState::new(RuntimeConfig::default());
        assert_eq!(state.registry.len(), 2);
        assert_eq!(state.candle_store.capacity(), 2016);
    }
}
