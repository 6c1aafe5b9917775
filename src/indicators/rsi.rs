// =============================================================================
// Relative Strength Index (RSI) — Wilder's smoothing
// =============================================================================
//
// Step 1 — price deltas from consecutive closes.
// Step 2 — seed average gain / loss with the SMA of the first `period` deltas.
// Step 3 — Wilder's smoothing:
//            avg_gain = (prev_avg_gain * (period - 1) + gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + loss) / period
// Step 4 — RS = avg_gain / avg_loss, RSI = 100 - 100 / (1 + RS)
//
// Interpretation (overbought/oversold vs continuation) is regime-dependent
// and belongs to the signal engine, not here.
// =============================================================================

/// Compute the full RSI series for `closes` with the given `period`.
///
/// One output value per close starting at index `period` (the first `period`
/// closes seed the averages).
///
/// # Edge cases
/// - `period == 0` or `closes.len() < period + 1` => empty vec
/// - zero average loss (no down moves) => RSI pinned at 100
/// - non-finite intermediate => series truncated at that point
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (sum_gain, sum_loss) = deltas[..period]
        .iter()
        .fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 { (g + d, l) } else { (g, l + d.abs()) }
        });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    let mut result = Vec::with_capacity(deltas.len() - period + 1);
    match rsi_from_averages(avg_gain, avg_loss) {
        Some(v) => result.push(v),
        None => return Vec::new(),
    }

    for &delta in &deltas[period..] {
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { delta.abs() } else { 0.0 };

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        match rsi_from_averages(avg_gain, avg_loss) {
            Some(v) => result.push(v),
            None => break,
        }
    }

    result
}

/// Most recent RSI value, or `None` on insufficient data.
pub fn latest_rsi(closes: &[f64], period: usize) -> Option<f64> {
    rsi_series(closes, period).last().copied()
}

/// Short-horizon slope of the RSI series: latest value minus the value
/// `span` readings back, or `None` when the series is too short.
pub fn rsi_slope(series: &[f64], span: usize) -> Option<f64> {
    if span == 0 || series.len() <= span {
        return None;
    }
    let last = *series.last()?;
    let prior = series[series.len() - 1 - span];
    Some(last - prior)
}

/// Convert average gain/loss into an RSI value in [0, 100].
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    rsi.is_finite().then_some(rsi)
}
