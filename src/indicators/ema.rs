// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// Formula:
//   multiplier k = 2 / (period + 1)
//   EMA_t        = (close_t - EMA_{t-1}) * k + EMA_{t-1}
//
// The first EMA value is seeded with the SMA of the first `period` closes.
// The incremental `EmaState` resumes the identical recurrence from a stored
// value, so folding a full series and resuming from state agree as long as
// they share the seed — the engine seeds each tracker exactly once and
// carries the state forward from then on.

use super::sma::sma;

/// Compute the EMA series for `closes` and look-back `period`.
///
/// The first output element is the SMA seed and corresponds to the close at
/// index `period - 1`; one element follows per subsequent close.
///
/// # Edge cases
/// - `period == 0` or `closes.len() < period` => empty vec
/// - A non-finite intermediate value truncates the series.
pub fn ema_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    let seed = match sma(&closes[..period], period) {
        Some(v) => v,
        None => return Vec::new(),
    };

    let mut state = EmaState::new(seed, period);
    let mut result = Vec::with_capacity(closes.len() - period + 1);
    result.push(seed);

    for &close in &closes[period..] {
        let value = state.update(close);
        if !value.is_finite() {
            break;
        }
        result.push(value);
    }

    result
}

/// Most recent EMA value for `closes`.
///
/// With fewer than `period` closes this degrades to the SMA of everything
/// available, matching the warm-up behaviour of [`sma`].
pub fn ema(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period {
        return sma(closes, closes.len());
    }
    ema_series(closes, period).last().copied()
}

// ---------------------------------------------------------------------------
// Incremental state
// ---------------------------------------------------------------------------

/// Minimum sufficient statistics for incremental EMA updates: the last value
/// and the smoothing multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmaState {
    pub value: f64,
    pub k: f64,
}

impl EmaState {
    pub fn new(seed: f64, period: usize) -> Self {
        Self {
            value: seed,
            k: 2.0 / (period as f64 + 1.0),
        }
    }

    /// Advance the state with one close and return the new EMA value.
    pub fn update(&mut self, close: f64) -> f64 {
        self.value = (close - self.value) * self.k + self.value;
        self.value
    }
}

/// Warm-up wrapper around [`EmaState`] that seeds itself from the first
/// `period` closes it observes and keeps the previous value alongside the
/// current one for two-bar comparisons.
#[derive(Debug, Clone)]
pub struct EmaTracker {
    period: usize,
    warmup: Vec<f64>,
    state: Option<EmaState>,
    prev: Option<f64>,
}

impl EmaTracker {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            warmup: Vec::new(),
            state: None,
            prev: None,
        }
    }

    /// Advance the tracker with one closed-bar close price.
    pub fn on_close(&mut self, close: f64) {
        self.prev = self.current();

        match self.state.as_mut() {
            Some(state) => {
                state.update(close);
            }
            None => {
                self.warmup.push(close);
                if self.warmup.len() == self.period {
                    if let Some(seed) = sma(&self.warmup, self.period) {
                        self.state = Some(EmaState::new(seed, self.period));
                        self.warmup.clear();
                    }
                }
            }
        }
    }

    /// EMA value after the most recent close, once warm.
    pub fn current(&self) -> Option<f64> {
        self.state.as_ref().map(|s| s.value)
    }

    /// EMA value before the most recent close.
    pub fn previous(&self) -> Option<f64> {
        self.prev
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_matches_textbook_recurrence() {
        // Period-3 EMA over [2,4,...,20]: seed = (2+4+6)/3 = 4, k = 0.5.
        let closes: Vec<f64> = (1..=10).map(|i| (2 * i) as f64).collect();
        let series = ema_series(&closes, 3);
        assert_eq!(series.len(), 8);

        let mut expected = vec![4.0];
        let mut prev: f64 = 4.0;
        for &c in &closes[3..] {
            prev = (c - prev) * 0.5 + prev;
            expected.push(prev);
        }
        for (got, want) in series.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-9, "got {got}, expected {want}");
        }
    }

    #[test]
    fn series_requires_period_closes() {
        assert!(ema_series(&[1.0, 2.0], 5).is_empty());
        assert!(ema_series(&[], 3).is_empty());
        assert!(ema_series(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn scalar_degrades_to_short_mean() {
        // Fewer closes than the period: mean of what exists.
        let value = ema(&[2.0, 4.0], 10).unwrap();
        assert!((value - 3.0).abs() < 1e-10);
    }

    #[test]
    fn scalar_is_last_series_value() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let series = ema_series(&closes, 5);
        let last = ema(&closes, 5).unwrap();
        assert!((last - series.last().unwrap()).abs() < 1e-12);
    }

    #[test]
    fn incremental_resume_matches_batch_fold() {
        let closes: Vec<f64> = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
            44.18, 44.22, 44.57,
        ];
        let series = ema_series(&closes, 5);

        // Resume from the seed and replay the suffix incrementally.
        let mut state = EmaState::new(series[0], 5);
        for (i, &close) in closes[5..].iter().enumerate() {
            let value = state.update(close);
            assert!(
                (value - series[i + 1]).abs() < 1e-12,
                "divergence at step {i}"
            );
        }
    }

    #[test]
    fn tracker_warms_up_then_tracks() {
        let closes: Vec<f64> = (1..=10).map(|i| (2 * i) as f64).collect();
        let series = ema_series(&closes, 3);

        let mut tracker = EmaTracker::new(3);
        assert!(tracker.current().is_none());

        tracker.on_close(closes[0]);
        tracker.on_close(closes[1]);
        assert!(tracker.current().is_none());

        tracker.on_close(closes[2]);
        assert!((tracker.current().unwrap() - series[0]).abs() < 1e-12);
        assert!(tracker.previous().is_none());

        tracker.on_close(closes[3]);
        assert!((tracker.previous().unwrap() - series[0]).abs() < 1e-12);
        assert!((tracker.current().unwrap() - series[1]).abs() < 1e-12);
    }
}
