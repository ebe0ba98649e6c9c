// =============================================================================
// CandleStore — rolling per-key OHLCV history
// =============================================================================
//
// One bounded, ordered window of candles per (symbol, interval) key.  The
// window holds closed candles plus at most one in-progress candle at the tail.
// Updates to the tail are allowed only for the same bucket (open_time); older
// buckets are rejected so closed history is never rewritten.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV candle. The owning key (symbol, interval) is tracked
/// externally; `open_time` is the bucket start timestamp in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_closed: bool,
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: String,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

/// Bucket width in milliseconds for a feed interval label.
///
/// Returns `None` for labels the engine does not understand; callers drop the
/// series rather than guessing a width.
pub fn interval_to_ms(interval: &str) -> Option<i64> {
    let ms = match interval {
        "1m" => 60_000,
        "3m" => 180_000,
        "5m" => 300_000,
        "15m" => 900_000,
        "30m" => 1_800_000,
        "1h" => 3_600_000,
        "4h" => 14_400_000,
        "1d" => 86_400_000,
        _ => return None,
    };
    Some(ms)
}

// ---------------------------------------------------------------------------
// CandleStore
// ---------------------------------------------------------------------------

/// Thread-safe rolling store of the most recent candles per key.
///
/// The window is bounded at `capacity`; when an append would exceed it the
/// oldest entries are evicted from the front.  Replaying the same ordered
/// candle sequence into an empty store always yields the same final window.
pub struct CandleStore {
    windows: RwLock<HashMap<CandleKey, VecDeque<Candle>>>,
    capacity: usize,
}

impl CandleStore {
    /// Create a store retaining at most `capacity` candles per key
    /// (the in-progress candle counts toward the bound).
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert or replace the latest candle for the given key.
    ///
    /// * Same bucket as the tail entry — the tail is replaced in place
    ///   (in-progress merge / finalisation).
    /// * Newer bucket — appended; the window is trimmed to capacity.
    /// * Older bucket — rejected: the update is dropped, the window is left
    ///   untouched, and the rejection is logged.
    ///
    /// Returns `true` when the window was modified.
    pub fn append_or_replace(&self, key: &CandleKey, candle: Candle) -> bool {
        let mut map = self.windows.write();
        let window = map
            .entry(key.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity + 1));

        if let Some(last) = window.back_mut() {
            if last.open_time == candle.open_time {
                *last = candle;
                return true;
            }
            if last.open_time > candle.open_time {
                warn!(
                    key = %key,
                    incoming = candle.open_time,
                    tail = last.open_time,
                    "out-of-order bucket rejected"
                );
                return false;
            }
        }

        window.push_back(candle);
        while window.len() > self.capacity {
            window.pop_front();
        }
        true
    }

    /// Return the most recent `n` candles (oldest-first). Returns fewer than
    /// `n` when the history is shorter; never blocks on missing data.
    pub fn recent(&self, key: &CandleKey, n: usize) -> Vec<Candle> {
        let map = self.windows.read();
        match map.get(key) {
            Some(window) => {
                let start = window.len().saturating_sub(n);
                window.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Return the most recent closed candles (oldest-first), skipping any
    /// in-progress tail entry.
    pub fn recent_closed(&self, key: &CandleKey, n: usize) -> Vec<Candle> {
        let map = self.windows.read();
        match map.get(key) {
            Some(window) => {
                let closed: Vec<&Candle> = window.iter().filter(|c| c.is_closed).collect();
                let start = closed.len().saturating_sub(n);
                closed[start..].iter().map(|c| (*c).clone()).collect()
            }
            None => Vec::new(),
        }
    }

    /// Close prices of the most recent closed candles (oldest-first).
    pub fn recent_closes(&self, key: &CandleKey, n: usize) -> Vec<f64> {
        self.recent_closed(key, n).iter().map(|c| c.close).collect()
    }

    /// Total number of candles stored for a key, including the in-progress one.
    pub fn len(&self, key: &CandleKey) -> usize {
        let map = self.windows.read();
        map.get(key).map_or(0, VecDeque::len)
    }

    /// Keys with at least one stored candle.
    pub fn keys(&self) -> Vec<CandleKey> {
        self.windows.read().keys().cloned().collect()
    }
}
