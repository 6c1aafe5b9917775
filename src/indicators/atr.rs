// =============================================================================
// Average True Range — Wilder's smoothing
// =============================================================================
//
// True Range per bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR_0 = SMA of the first `period` TR values,
// ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period.
// =============================================================================

use crate::state::Candle;

/// Full ATR series (one value per bar starting at index `period`).
///
/// Returns an empty vec when `period` is zero, there are fewer than
/// `period + 1` candles, or an intermediate value is non-finite.
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period + 1 {
        return Vec::new();
    }

    let mut tr_values = Vec::with_capacity(candles.len() - 1);
    for pair in candles.windows(2) {
        let prev_close = pair[0].close;
        let bar = &pair[1];
        let tr = (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs());
        tr_values.push(tr);
    }

    let seed: f64 = tr_values[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return Vec::new();
    }

    let period_f = period as f64;
    let mut series = Vec::with_capacity(tr_values.len() - period + 1);
    series.push(seed);

    let mut atr = seed;
    for &tr in &tr_values[period..] {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
        if !atr.is_finite() {
            break;
        }
        series.push(atr);
    }

    series
}

/// Most recent ATR value, standard 14-period.
pub fn latest_atr(candles: &[Candle]) -> Option<f64> {
    atr_series(candles, 14).last().copied()
}

/// ATR as a percentage of the last close — comparable across price scales.
pub fn latest_atr_pct(candles: &[Candle]) -> Option<f64> {
    let atr = latest_atr(candles)?;
    let close = candles.last()?.close;
    if close <= 0.0 {
        return None;
    }
    Some(atr / close * 100.0)
}

/// Relative change of ATR over the last `span` readings, in percent.
/// Positive means volatility is expanding.
pub fn atr_change_pct(series: &[f64], span: usize) -> Option<f64> {
    if span == 0 || series.len() <= span {
        return None;
    }
    let last = *series.last()?;
    let prior = series[series.len() - 1 - span];
    if prior <= 0.0 {
        return None;
    }
    Some((last - prior) / prior * 100.0)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new("2025-01-01", open, high, low, close, 100.0)
    }

    #[test]
    fn degenerate_input() {
        let candles = vec![candle(100.0, 105.0, 95.0, 102.0); 20];
        assert!(atr_series(&candles, 0).is_empty());
        assert!(atr_series(&candles[..10], 14).is_empty());
    }

    #[test]
    fn constant_range_converges() {
        // Every bar spans 10 points; ATR should sit near 10.
        let candles: Vec<Candle> = (0..40)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.1;
                candle(base, base + 5.0, base - 5.0, base)
            })
            .collect();
        let atr = latest_atr(&candles).unwrap();
        assert!((atr - 10.0).abs() < 1.0, "expected ATR near 10, got {atr}");
    }

    #[test]
    fn gap_inflates_true_range() {
        let candles = vec![
            candle(100.0, 105.0, 95.0, 95.0),
            // Gap up: |115 - 95| = 20 dominates the 7-point bar range.
            candle(110.0, 115.0, 108.0, 112.0),
            candle(112.0, 118.0, 110.0, 115.0),
            candle(115.0, 120.0, 113.0, 118.0),
        ];
        let series = atr_series(&candles, 3);
        assert_eq!(series.len(), 1);
        assert!(series[0] > 7.0, "gap should inflate ATR, got {}", series[0]);
    }

    #[test]
    fn series_length() {
        let candles: Vec<Candle> = (0..50)
            .map(|i| {
                let base = 100.0 + i as f64;
                candle(base, base + 2.0, base - 2.0, base + 1.0)
            })
            .collect();
        let series = atr_series(&candles, 14);
        // 49 TR values, first 14 consumed by the seed, seed itself counts.
        assert_eq!(series.len(), 49 - 14 + 1);
    }

    #[test]
    fn pct_and_change() {
        let candles: Vec<Candle> = (0..40)
            .map(|i| {
                let base = 200.0 + i as f64;
                candle(base, base + 4.0, base - 4.0, base + 1.0)
            })
            .collect();
        let pct = latest_atr_pct(&candles).unwrap();
        assert!(pct > 0.0 && pct < 10.0);

        let expanding = vec![1.0, 1.1, 1.2, 1.5, 2.0];
        assert!(atr_change_pct(&expanding, 3).unwrap() > 0.0);
        assert!(atr_change_pct(&expanding, 10).is_none());
    }

    #[test]
    fn nan_truncates() {
        let mut candles: Vec<Candle> = (0..10)
            .map(|i| {
                let base = 100.0 + i as f64;
                candle(base, base + 2.0, base - 2.0, base)
            })
            .collect();
        candles[8].high = f64::NAN;
        assert!(atr_series(&candles, 3).len() < 7);
    }
}
