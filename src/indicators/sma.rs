// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================

/// Arithmetic mean of the last `period` values.
///
/// When fewer than `period` values exist the mean of everything available is
/// returned instead — a degraded but defined result, so warm-up never turns
/// into an error downstream.
///
/// # Edge cases
/// - empty input or `period == 0` => `None`
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if values.is_empty() || period == 0 {
        return None;
    }

    let window = if values.len() < period {
        values
    } else {
        &values[values.len() - period..]
    };

    let mean = window.iter().sum::<f64>() / window.len() as f64;
    mean.is_finite().then_some(mean)
}
