// =============================================================================
// MACD — Moving Average Convergence Divergence (12/26/9)
// =============================================================================
//
// MACD line = EMA(fast) - EMA(slow), aligned on the slow series.
// Signal    = EMA(signal_period) of the MACD line.
// Histogram = MACD - Signal.
//
// The noise gate (histogram suppressed below 0.5% of ATR) is applied by the
// analyzer, not here — this module reports raw values.
// =============================================================================

use crate::indicators::ema::ema_series;

/// Latest MACD reading plus a short-horizon slope of the histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    /// Histogram change over the last 3 readings. Positive = momentum
    /// building toward the bull side.
    pub slope: f64,
}

/// Full MACD histogram series — used for slope/acceleration features.
pub fn macd_histogram_series(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Vec<f64> {
    if fast == 0 || slow == 0 || signal_period == 0 || slow <= fast {
        return Vec::new();
    }

    let ema_fast = ema_series(closes, fast);
    let ema_slow = ema_series(closes, slow);
    if ema_slow.is_empty() {
        return Vec::new();
    }

    // Align: the slow series starts (slow - fast) entries later.
    let offset = slow - fast;
    let mut macd_line = Vec::with_capacity(ema_slow.len());
    for (i, slow_v) in ema_slow.iter().enumerate() {
        let Some(fast_v) = ema_fast.get(i + offset) else { break };
        macd_line.push(fast_v - slow_v);
    }

    let signal_line = ema_series(&macd_line, signal_period);
    if signal_line.is_empty() {
        return Vec::new();
    }

    let hist_offset = macd_line.len() - signal_line.len();
    signal_line
        .iter()
        .enumerate()
        .map(|(i, s)| macd_line[i + hist_offset] - s)
        .collect()
}

/// Latest MACD reading with the standard 12/26/9 parameters.
pub fn latest_macd(closes: &[f64]) -> Option<MacdResult> {
    macd_with(closes, 12, 26, 9)
}

/// Latest MACD reading with explicit parameters.
pub fn macd_with(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> Option<MacdResult> {
    if fast == 0 || slow == 0 || signal_period == 0 || slow <= fast {
        return None;
    }

    let ema_fast = ema_series(closes, fast);
    let ema_slow = ema_series(closes, slow);
    if ema_slow.is_empty() {
        return None;
    }

    let offset = slow - fast;
    let mut macd_line = Vec::with_capacity(ema_slow.len());
    for (i, slow_v) in ema_slow.iter().enumerate() {
        let Some(fast_v) = ema_fast.get(i + offset) else { break };
        macd_line.push(fast_v - slow_v);
    }

    let signal_line = ema_series(&macd_line, signal_period);
    let signal = *signal_line.last()?;
    let macd = *macd_line.last()?;
    let histogram = macd - signal;

    let hist_series = macd_histogram_series(closes, fast, slow, signal_period);
    let slope = if hist_series.len() >= 4 {
        hist_series[hist_series.len() - 1] - hist_series[hist_series.len() - 4]
    } else {
        0.0
    };

    if !macd.is_finite() || !signal.is_finite() {
        return None;
    }

    Some(MacdResult { macd, signal, histogram, slope })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_params() {
        let closes: Vec<f64> = (1..=100).map(|x| x as f64).collect();
        assert!(macd_with(&closes, 0, 26, 9).is_none());
        assert!(macd_with(&closes, 26, 12, 9).is_none());
        assert!(macd_with(&closes, 12, 12, 9).is_none());
    }

    #[test]
    fn insufficient_data() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!(latest_macd(&closes).is_none());
    }

    #[test]
    fn rising_series_positive_macd() {
        // Fast EMA above slow EMA in a persistent uptrend.
        let closes: Vec<f64> = (1..=120).map(|x| x as f64 * 2.0).collect();
        let result = latest_macd(&closes).unwrap();
        assert!(result.macd > 0.0, "expected positive MACD, got {}", result.macd);
    }

    #[test]
    fn falling_series_negative_macd() {
        let closes: Vec<f64> = (1..=120).rev().map(|x| x as f64 * 2.0).collect();
        let result = latest_macd(&closes).unwrap();
        assert!(result.macd < 0.0);
    }

    #[test]
    fn flat_series_zero_histogram() {
        let closes = vec![100.0; 120];
        let result = latest_macd(&closes).unwrap();
        assert!(result.macd.abs() < 1e-9);
        assert!(result.histogram.abs() < 1e-9);
    }

    #[test]
    fn histogram_matches_series_tail() {
        let closes: Vec<f64> = (1..=150)
            .map(|x| 100.0 + (x as f64 * 0.2).sin() * 8.0)
            .collect();
        let result = latest_macd(&closes).unwrap();
        let series = macd_histogram_series(&closes, 12, 26, 9);
        assert!((result.histogram - series.last().unwrap()).abs() < 1e-9);
    }

    #[test]
    fn slope_builds_in_accelerating_trend() {
        // Quadratic rise — histogram should be expanding.
        let closes: Vec<f64> = (1..=150).map(|x| (x as f64).powi(2) / 50.0).collect();
        let result = latest_macd(&closes).unwrap();
        assert!(result.slope > 0.0);
    }
}
