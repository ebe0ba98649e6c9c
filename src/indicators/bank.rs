// =============================================================================
// IndicatorBank — incremental indicator state for one candle series
// =============================================================================
//
// One bank exists per (symbol, interval) key and owns every EMA/RSI tracker
// the registered strategies need for that key.  Trackers advance strictly by
// bucket: `catch_up` applies only closed bars newer than the last applied
// bucket, so replayed windows, history seeding, and live closes each update
// the state exactly once per bar.

use std::collections::BTreeMap;

use crate::market_data::Candle;

use super::ema::EmaTracker;
use super::rsi::RsiTracker;

pub struct IndicatorBank {
    last_applied: Option<i64>,
    emas: BTreeMap<usize, EmaTracker>,
    rsis: BTreeMap<usize, RsiTracker>,
}

impl IndicatorBank {
    /// Build a bank with trackers for the given EMA and RSI periods.
    pub fn new(
        ema_periods: impl IntoIterator<Item = usize>,
        rsi_periods: impl IntoIterator<Item = usize>,
    ) -> Self {
        Self {
            last_applied: None,
            emas: ema_periods
                .into_iter()
                .map(|p| (p, EmaTracker::new(p)))
                .collect(),
            rsis: rsi_periods
                .into_iter()
                .map(|p| (p, RsiTracker::new(p)))
                .collect(),
        }
    }

    /// Apply every closed bar in `closed` (oldest-first) whose bucket is newer
    /// than the last applied one.
    pub fn catch_up(&mut self, closed: &[Candle]) {
        for candle in closed {
            if !candle.is_closed {
                continue;
            }
            if self.last_applied.is_some_and(|b| candle.open_time <= b) {
                continue;
            }
            for tracker in self.emas.values_mut() {
                tracker.on_close(candle.close);
            }
            for tracker in self.rsis.values_mut() {
                tracker.on_close(candle.close);
            }
            self.last_applied = Some(candle.open_time);
        }
    }

    /// Bucket (bar open time) of the newest bar the trackers have absorbed.
    pub fn last_applied_bucket(&self) -> Option<i64> {
        self.last_applied
    }

    /// (previous, current) EMA values for `period`, once warm.
    pub fn ema_pair(&self, period: usize) -> (Option<f64>, Option<f64>) {
        match self.emas.get(&period) {
            Some(t) => (t.previous(), t.current()),
            None => (None, None),
        }
    }

    /// (previous, current) RSI values for `period`, once warm.
    pub fn rsi_pair(&self, period: usize) -> (Option<f64>, Option<f64>) {
        match self.rsis.get(&period) {
            Some(t) => (t.previous(), t.current()),
            None => (None, None),
        }
    }
}
