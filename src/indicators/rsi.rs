// =============================================================================
// Relative Strength Index (RSI) — Wilder's smoothing
// =============================================================================
//
// Step 1 — per-step gains/losses from consecutive closes.
// Step 2 — seed average gain / loss with the plain mean of the first `period`
//          deltas.
// Step 3 — Wilder smoothing afterwards:
//            avg = (avg * (period - 1) + new) / period
// Step 4 — RS = avg_gain / avg_loss, RSI = 100 - 100 / (1 + RS).
//
// When the average loss is zero, RS is pinned at 100 (RSI ≈ 99.01) to avoid
// the division by zero.  At least `period + 1` closes are required; anything
// shorter is "unavailable", not an error.

/// Compute the RSI series for `closes` and `period`.
///
/// One value is produced per close starting at index `period` (the first
/// `period + 1` closes are consumed by the seed).
///
/// # Edge cases
/// - `period == 0` or `closes.len() < period + 1` => empty vec
/// - A non-finite intermediate value truncates the series.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (sum_gain, sum_loss) =
        deltas[..period]
            .iter()
            .fold((0.0_f64, 0.0_f64), |(g, l), &d| {
                if d > 0.0 {
                    (g + d, l)
                } else {
                    (g, l + d.abs())
                }
            });

    let period_f = period as f64;
    let mut state = RsiState {
        avg_gain: sum_gain / period_f,
        avg_loss: sum_loss / period_f,
        period,
    };

    let mut result = Vec::with_capacity(deltas.len() - period + 1);
    match rsi_from_averages(state.avg_gain, state.avg_loss) {
        Some(first) => result.push(first),
        None => return result,
    }

    for &delta in &deltas[period..] {
        match state.update_delta(delta) {
            Some(value) => result.push(value),
            None => break,
        }
    }

    result
}

/// Most recent RSI value, or `None` when fewer than `period + 1` closes exist.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    rsi_series(closes, period).last().copied()
}

/// Convert average gain / loss into an RSI value.
///
/// RS is pinned at 100 when the average loss is zero.
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rs = if avg_loss == 0.0 {
        100.0
    } else {
        avg_gain / avg_loss
    };
    let rsi = 100.0 - 100.0 / (1.0 + rs);
    rsi.is_finite().then_some(rsi)
}

// ---------------------------------------------------------------------------
// Incremental state
// ---------------------------------------------------------------------------

/// Minimum sufficient statistics for incremental Wilder RSI updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RsiState {
    pub avg_gain: f64,
    pub avg_loss: f64,
    pub period: usize,
}

impl RsiState {
    /// Advance the averages with one price delta and return the new RSI.
    pub fn update_delta(&mut self, delta: f64) -> Option<f64> {
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { delta.abs() } else { 0.0 };
        let period_f = self.period as f64;

        self.avg_gain = (self.avg_gain * (period_f - 1.0) + gain) / period_f;
        self.avg_loss = (self.avg_loss * (period_f - 1.0) + loss) / period_f;

        rsi_from_averages(self.avg_gain, self.avg_loss)
    }
}

/// Warm-up wrapper around [`RsiState`] that collects the first `period + 1`
/// closes, seeds the Wilder averages once, and keeps the previous RSI value
/// alongside the current one for threshold-transition checks.
#[derive(Debug, Clone)]
pub struct RsiTracker {
    period: usize,
    warmup: Vec<f64>,
    state: Option<RsiState>,
    last_close: f64,
    current: Option<f64>,
    prev: Option<f64>,
}

impl RsiTracker {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            warmup: Vec::new(),
            state: None,
            last_close: 0.0,
            current: None,
            prev: None,
        }
    }

    /// Advance the tracker with one closed-bar close price.
    pub fn on_close(&mut self, close: f64) {
        self.prev = self.current;

        match self.state.as_mut() {
            Some(state) => {
                let delta = close - self.last_close;
                self.current = state.update_delta(delta);
                self.last_close = close;
            }
            None => {
                self.warmup.push(close);
                if self.warmup.len() == self.period + 1 {
                    let (sum_gain, sum_loss) = self
                        .warmup
                        .windows(2)
                        .map(|w| w[1] - w[0])
                        .fold((0.0_f64, 0.0_f64), |(g, l), d| {
                            if d > 0.0 {
                                (g + d, l)
                            } else {
                                (g, l + d.abs())
                            }
                        });
                    let period_f = self.period as f64;
                    let state = RsiState {
                        avg_gain: sum_gain / period_f,
                        avg_loss: sum_loss / period_f,
                        period: self.period,
                    };
                    self.current = rsi_from_averages(state.avg_gain, state.avg_loss);
                    self.state = Some(state);
                    self.last_close = close;
                    self.warmup.clear();
                }
            }
        }
    }

    /// RSI after the most recent close, once warm.
    pub fn current(&self) -> Option<f64> {
        self.current
    }

    /// RSI before the most recent close.
    pub fn previous(&self) -> Option<f64> {
        self.prev
    }
}
