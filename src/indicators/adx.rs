// =============================================================================
// Average Directional Index — trend strength with directional components
// =============================================================================
//
// Pipeline:
//   1. +DM / -DM and True Range per bar.
//   2. Wilder's smoothing over `period`.
//   3. +DI = smoothed(+DM) / smoothed(TR) * 100, -DI likewise.
//   4. DX = |+DI - -DI| / (+DI + -DI) * 100.
//   5. ADX = Wilder's smoothed average of DX.
//
// Interpretation: ADX > 25 trending, < 18 chop. The scoring engine uses the
// DI split to tell which side owns the trend.
// =============================================================================

use crate::state::Candle;

/// Trend-strength class derived from the ADX value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendStrength {
    Absent,
    Weak,
    Strong,
    VeryStrong,
}

impl TrendStrength {
    pub fn from_adx(adx: f64) -> Self {
        if adx >= 40.0 {
            Self::VeryStrong
        } else if adx >= 25.0 {
            Self::Strong
        } else if adx >= 18.0 {
            Self::Weak
        } else {
            Self::Absent
        }
    }
}

impl std::fmt::Display for TrendStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Weak => write!(f, "weak"),
            Self::Strong => write!(f, "strong"),
            Self::VeryStrong => write!(f, "very-strong"),
        }
    }
}

/// Full ADX reading: the smoothed index plus both directional components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdxResult {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

impl AdxResult {
    pub fn strength(&self) -> TrendStrength {
        TrendStrength::from_adx(self.adx)
    }
}

/// Compute the latest ADX with directional components.
///
/// Needs at least `2 * period + 1` candles: `period` bars to seed the
/// DM/TR smoothing and another `period` DX values to seed the ADX average.
pub fn latest_adx(candles: &[Candle], period: usize) -> Option<AdxResult> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }

    let period_f = period as f64;
    let transitions = candles.len() - 1;

    let mut plus_dm = Vec::with_capacity(transitions);
    let mut minus_dm = Vec::with_capacity(transitions);
    let mut tr_vals = Vec::with_capacity(transitions);

    for pair in candles.windows(2) {
        let prev = &pair[0];
        let bar = &pair[1];

        let tr = (bar.high - bar.low)
            .max((bar.high - prev.close).abs())
            .max((bar.low - prev.close).abs());

        let up_move = bar.high - prev.high;
        let down_move = prev.low - bar.low;

        plus_dm.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
        minus_dm.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });
        tr_vals.push(tr);
    }

    let mut smooth_plus: f64 = plus_dm[..period].iter().sum();
    let mut smooth_minus: f64 = minus_dm[..period].iter().sum();
    let mut smooth_tr: f64 = tr_vals[..period].iter().sum();

    let mut dx_values = Vec::with_capacity(transitions - period + 1);
    let (mut plus_di, mut minus_di);
    match dx_from(smooth_plus, smooth_minus, smooth_tr) {
        Some((dx, pdi, mdi)) => {
            dx_values.push(dx);
            plus_di = pdi;
            minus_di = mdi;
        }
        None => return None,
    }

    for i in period..transitions {
        smooth_plus = smooth_plus - smooth_plus / period_f + plus_dm[i];
        smooth_minus = smooth_minus - smooth_minus / period_f + minus_dm[i];
        smooth_tr = smooth_tr - smooth_tr / period_f + tr_vals[i];

        match dx_from(smooth_plus, smooth_minus, smooth_tr) {
            Some((dx, pdi, mdi)) => {
                dx_values.push(dx);
                plus_di = pdi;
                minus_di = mdi;
            }
            None => return None,
        }
    }

    if dx_values.len() < period {
        return None;
    }

    let seed: f64 = dx_values[..period].iter().sum::<f64>() / period_f;
    if !seed.is_finite() {
        return None;
    }

    let mut adx = seed;
    for &dx in &dx_values[period..] {
        adx = (adx * (period_f - 1.0) + dx) / period_f;
        if !adx.is_finite() {
            return None;
        }
    }

    Some(AdxResult { adx, plus_di, minus_di })
}

/// DX plus both DI components from smoothed inputs.
fn dx_from(smooth_plus: f64, smooth_minus: f64, smooth_tr: f64) -> Option<(f64, f64, f64)> {
    if smooth_tr == 0.0 {
        return None;
    }

    let plus_di = smooth_plus / smooth_tr * 100.0;
    let minus_di = smooth_minus / smooth_tr * 100.0;

    let di_sum = plus_di + minus_di;
    let dx = if di_sum == 0.0 {
        0.0
    } else {
        (plus_di - minus_di).abs() / di_sum * 100.0
    };

    dx.is_finite().then_some((dx, plus_di, minus_di))
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new("2025-01-01", open, high, low, close, 1.0)
    }

    #[test]
    fn degenerate_input() {
        let candles = vec![candle(1.0, 2.0, 0.5, 1.5); 50];
        assert!(latest_adx(&candles, 0).is_none());
        assert!(latest_adx(&candles[..10], 14).is_none());
    }

    #[test]
    fn strong_uptrend_high_adx_plus_di_dominant() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                candle(base, base + 1.5, base - 0.5, base + 1.0)
            })
            .collect();
        let result = latest_adx(&candles, 14).unwrap();
        assert!(result.adx > 25.0, "expected trending ADX, got {}", result.adx);
        assert!(result.plus_di > result.minus_di);
        assert!(matches!(result.strength(), TrendStrength::Strong | TrendStrength::VeryStrong));
    }

    #[test]
    fn strong_downtrend_minus_di_dominant() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 300.0 - i as f64 * 2.0;
                candle(base, base + 0.5, base - 1.5, base - 1.0)
            })
            .collect();
        let result = latest_adx(&candles, 14).unwrap();
        assert!(result.minus_di > result.plus_di);
    }

    #[test]
    fn flat_market_near_zero() {
        let candles = vec![candle(100.0, 101.0, 99.0, 100.0); 60];
        let result = latest_adx(&candles, 14).unwrap();
        assert!(result.adx < 1.0, "flat market ADX should be ~0, got {}", result.adx);
        assert_eq!(result.strength(), TrendStrength::Absent);
    }

    #[test]
    fn adx_in_range() {
        let candles: Vec<Candle> = (0..100)
            .map(|i| {
                let base = 50.0 + (i as f64 * 0.3).sin() * 10.0;
                candle(base - 0.5, base + 1.0, base - 1.0, base + 0.5)
            })
            .collect();
        if let Some(result) = latest_adx(&candles, 14) {
            assert!((0.0..=100.0).contains(&result.adx));
        }
    }

    #[test]
    fn strength_classes() {
        assert_eq!(TrendStrength::from_adx(10.0), TrendStrength::Absent);
        assert_eq!(TrendStrength::from_adx(18.0), TrendStrength::Weak);
        assert_eq!(TrendStrength::from_adx(30.0), TrendStrength::Strong);
        assert_eq!(TrendStrength::from_adx(45.0), TrendStrength::VeryStrong);
    }

    #[test]
    fn minimum_candles_exact() {
        let period = 5;
        let min = 2 * period + 1;
        let candles: Vec<Candle> = (0..min)
            .map(|i| {
                let base = 100.0 + i as f64;
                candle(base, base + 1.0, base - 0.5, base + 0.5)
            })
            .collect();
        assert!(latest_adx(&candles, period).is_some());
        assert!(latest_adx(&candles[..min - 1], period).is_none());
    }
}
