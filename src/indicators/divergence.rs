// =============================================================================
// RSI divergence — price/momentum disagreement at swing pivots
// =============================================================================
//
// Inspects the last 5 swing pivots (fractal highs and lows shared with the
// Fibonacci module):
//
//   regular bull  — price lower low,  RSI higher low   (downtrend exhausting)
//   regular bear  — price higher high, RSI lower high  (uptrend exhausting)
//   hidden bull   — price higher low,  RSI lower low   (uptrend continuation)
//   hidden bear   — price lower high,  RSI higher high (downtrend continuation)
//
// Hidden divergences are weaker evidence and carry a 0.6 weight factor.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::fib::{swing_high_indices, swing_low_indices};
use crate::indicators::rsi::rsi_series;
use crate::state::Candle;

/// How many recent swing pivots (per side) are examined.
const PIVOT_LOOKBACK: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DivergenceKind {
    RegularBull,
    RegularBear,
    HiddenBull,
    HiddenBear,
}

impl DivergenceKind {
    pub fn is_bullish(self) -> bool {
        matches!(self, Self::RegularBull | Self::HiddenBull)
    }

    /// Hidden divergences count at 60% of a regular one.
    pub fn weight_factor(self) -> f64 {
        match self {
            Self::RegularBull | Self::RegularBear => 1.0,
            Self::HiddenBull | Self::HiddenBear => 0.6,
        }
    }
}

impl std::fmt::Display for DivergenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RegularBull => write!(f, "regular-bull"),
            Self::RegularBear => write!(f, "regular-bear"),
            Self::HiddenBull => write!(f, "hidden-bull"),
            Self::HiddenBear => write!(f, "hidden-bear"),
        }
    }
}

/// One detected divergence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Divergence {
    pub kind: DivergenceKind,
    /// [0, 1] — scaled from the RSI disagreement magnitude.
    pub strength: f64,
    pub detail: String,
}

/// Detect RSI divergences over the recent swing pivots.
///
/// `rsi_period` is typically 14. Returns every divergence found between
/// consecutive recent pivots, strongest first.
pub fn detect_divergences(candles: &[Candle], rsi_period: usize) -> Vec<Divergence> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let rsi = rsi_series(&closes, rsi_period);
    if rsi.is_empty() {
        return Vec::new();
    }

    // rsi[i] corresponds to closes[i + rsi_period].
    let rsi_at = |candle_idx: usize| -> Option<f64> {
        candle_idx.checked_sub(rsi_period).and_then(|i| rsi.get(i)).copied()
    };

    let mut out = Vec::new();

    // ── Low pivots: regular bull / hidden bull ──────────────────────────
    let lows = swing_low_indices(candles);
    let recent_lows: Vec<usize> = lows.iter().rev().take(PIVOT_LOOKBACK).rev().copied().collect();
    for pair in recent_lows.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let (Some(rsi_a), Some(rsi_b)) = (rsi_at(a), rsi_at(b)) else { continue };
        let price_a = candles[a].low;
        let price_b = candles[b].low;

        if price_b < price_a && rsi_b > rsi_a {
            out.push(build(DivergenceKind::RegularBull, rsi_b - rsi_a, price_a, price_b, rsi_a, rsi_b));
        } else if price_b > price_a && rsi_b < rsi_a {
            out.push(build(DivergenceKind::HiddenBull, rsi_a - rsi_b, price_a, price_b, rsi_a, rsi_b));
        }
    }

    // ── High pivots: regular bear / hidden bear ─────────────────────────
    let highs = swing_high_indices(candles);
    let recent_highs: Vec<usize> = highs.iter().rev().take(PIVOT_LOOKBACK).rev().copied().collect();
    for pair in recent_highs.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let (Some(rsi_a), Some(rsi_b)) = (rsi_at(a), rsi_at(b)) else { continue };
        let price_a = candles[a].high;
        let price_b = candles[b].high;

        if price_b > price_a && rsi_b < rsi_a {
            out.push(build(DivergenceKind::RegularBear, rsi_a - rsi_b, price_a, price_b, rsi_a, rsi_b));
        } else if price_b < price_a && rsi_b > rsi_a {
            out.push(build(DivergenceKind::HiddenBear, rsi_b - rsi_a, price_a, price_b, rsi_a, rsi_b));
        }
    }

    out.sort_by(|x, y| y.strength.partial_cmp(&x.strength).unwrap_or(std::cmp::Ordering::Equal));
    out
}

fn build(kind: DivergenceKind, rsi_delta: f64, p_a: f64, p_b: f64, r_a: f64, r_b: f64) -> Divergence {
    // 15 RSI points of disagreement saturates the score.
    let strength = (rsi_delta.abs() / 15.0).clamp(0.0, 1.0);
    Divergence {
        kind,
        strength,
        detail: format!(
            "price {:.2} -> {:.2}, RSI {:.1} -> {:.1}",
            p_a, p_b, r_a, r_b
        ),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn bar(high: f64, low: f64, close: f64) -> Candle {
        Candle::new("2025-01-01", close, high, low, close, 1000.0)
    }

    /// Price makes two troughs, second lower; closes between them recover
    /// hard so the RSI at the second trough is higher. Classic regular bull.
    fn regular_bull_series() -> Vec<Candle> {
        let mut candles = Vec::new();
        // Long slow decline to depress RSI at the first trough.
        for i in 0..20 {
            let p = 120.0 - i as f64 * 1.5;
            candles.push(bar(p + 0.5, p - 0.5, p));
        }
        // First trough at 90, sharp snap back.
        candles.push(bar(90.5, 89.5, 90.0));
        for i in 0..6 {
            let p = 91.0 + i as f64 * 2.0;
            candles.push(bar(p + 0.5, p - 0.5, p));
        }
        // Gentle drift to a marginally lower trough — momentum much weaker.
        for i in 0..8 {
            let p = 101.0 - i as f64 * 1.5;
            candles.push(bar(p + 0.5, p - 0.5, p));
        }
        candles.push(bar(89.9, 88.9, 89.4));
        for i in 0..4 {
            let p = 90.5 + i as f64;
            candles.push(bar(p + 0.5, p - 0.5, p));
        }
        candles
    }

    #[test]
    fn too_short_series() {
        let candles = vec![bar(101.0, 99.0, 100.0); 5];
        assert!(detect_divergences(&candles, 14).is_empty());
    }

    #[test]
    fn regular_bull_detected() {
        let candles = regular_bull_series();
        let found = detect_divergences(&candles, 14);
        assert!(
            found.iter().any(|d| d.kind == DivergenceKind::RegularBull),
            "expected regular-bull, got {found:?}"
        );
    }

    #[test]
    fn no_divergence_in_clean_trend() {
        // Monotonic rise with no swing lows/highs disagreement.
        let candles: Vec<Candle> = (0..40)
            .map(|i| {
                let p = 100.0 + i as f64;
                bar(p + 0.5, p - 0.5, p)
            })
            .collect();
        assert!(detect_divergences(&candles, 14).is_empty());
    }

    #[test]
    fn strength_in_unit_range() {
        let candles = regular_bull_series();
        for d in detect_divergences(&candles, 14) {
            assert!((0.0..=1.0).contains(&d.strength));
            assert!(!d.detail.is_empty());
        }
    }

    #[test]
    fn hidden_weight_factor() {
        assert_eq!(DivergenceKind::RegularBull.weight_factor(), 1.0);
        assert_eq!(DivergenceKind::HiddenBear.weight_factor(), 0.6);
        assert!(DivergenceKind::HiddenBull.is_bullish());
        assert!(!DivergenceKind::RegularBear.is_bullish());
    }
}
