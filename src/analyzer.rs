// =============================================================================
// Technical Analyzer — one candle series in, one Technicals bundle out
// =============================================================================
//
// Pure function: no state, no clocks. The bundle is recomputed per ticker per
// cycle and stored alongside the ticker's facts. A series shorter than 30
// candles yields no bundle at all — partial indicator sets are worse than
// none because the scoring engine cannot tell which fields to trust.
//
// The MACD histogram is gated here: below 0.5% of ATR it is suppressed
// (None) so momentum signals never fire off noise.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::adx::latest_adx;
use crate::indicators::atr::{atr_change_pct, atr_series};
use crate::indicators::bollinger::{is_squeezed, latest_bollinger};
use crate::indicators::divergence::{detect_divergences, Divergence};
use crate::indicators::ema::ema_stack;
use crate::indicators::fib::{fib_levels, FibLevels};
use crate::indicators::macd::latest_macd;
use crate::indicators::patterns::{detect_patterns, PatternHit};
use crate::indicators::pivots::{pivot_points, PivotPoints};
use crate::indicators::rsi::{rsi_series, rsi_slope};
use crate::indicators::MIN_CANDLES;
use crate::state::Candle;
use crate::types::SignalDirection;

/// Volume-spike trigger: last bar above this multiple of the trailing mean.
const VOLUME_SPIKE_MULT: f64 = 2.0;
/// MACD noise floor as a fraction of ATR.
const MACD_NOISE_FLOOR: f64 = 0.005;
/// How many trailing ATR readings are retained in the bundle.
const ATR_TAIL: usize = 20;

/// Derived technical picture for one ticker on one timeframe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Technicals {
    pub rsi: f64,
    pub rsi_slope: f64,

    pub ema9: f64,
    pub ema20: f64,
    pub ema50: f64,
    pub ema_bias: SignalDirection,

    pub macd: f64,
    pub macd_signal: f64,
    /// None when |histogram| fails the 0.5% × ATR noise gate.
    pub macd_histogram: Option<f64>,
    pub macd_slope: f64,

    pub atr: f64,
    /// Trailing ATR readings, oldest first.
    pub atr_tail: Vec<f64>,
    pub atr_change_pct: f64,

    pub bb_upper: f64,
    pub bb_lower: f64,
    /// Price position inside the bands, clamped to [0, 1].
    pub bb_position: f64,
    pub bb_bandwidth: f64,
    pub bb_squeezed: bool,

    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub trend_strength: String,

    #[serde(default)]
    pub fib: Option<FibLevels>,
    #[serde(default)]
    pub pivots: Option<PivotPoints>,

    #[serde(default)]
    pub patterns: Vec<PatternHit>,
    #[serde(default)]
    pub divergences: Vec<Divergence>,

    pub swing_high: f64,
    pub swing_low: f64,

    pub volume_spike: bool,
    pub vwap: f64,
}

/// Build the bundle, or `None` when fewer than 30 candles are available.
pub fn analyze(candles: &[Candle]) -> Option<Technicals> {
    if candles.len() < MIN_CANDLES {
        return None;
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    // ── Momentum ────────────────────────────────────────────────────────
    let rsi_values = rsi_series(&closes, 14);
    let rsi = *rsi_values.last()?;
    let rsi_slope_v = rsi_slope(&rsi_values, 3).unwrap_or(0.0);

    // ── Trend ───────────────────────────────────────────────────────────
    let stack = ema_stack(&closes);
    let (ema9, ema20, ema50, ema_bias) = match stack {
        Some(s) => (s.ema9, s.ema20, s.ema50, s.bias),
        None => (0.0, 0.0, 0.0, SignalDirection::Neutral),
    };

    // ── Volatility ──────────────────────────────────────────────────────
    let atr_values = atr_series(candles, 14);
    let atr = *atr_values.last()?;
    let atr_change = atr_change_pct(&atr_values, 5).unwrap_or(0.0);
    let atr_tail: Vec<f64> = atr_values
        .iter()
        .rev()
        .take(ATR_TAIL)
        .rev()
        .copied()
        .collect();

    // ── MACD with noise gate ────────────────────────────────────────────
    let macd = latest_macd(&closes);
    let (macd_v, macd_signal, macd_histogram, macd_slope) = match macd {
        Some(m) => {
            let gated = (m.histogram.abs() > MACD_NOISE_FLOOR * atr).then_some(m.histogram);
            (m.macd, m.signal, gated, m.slope)
        }
        None => (0.0, 0.0, None, 0.0),
    };

    // ── Bollinger ───────────────────────────────────────────────────────
    let bb = latest_bollinger(&closes, 20, 2.0)?;
    let squeezed = is_squeezed(&closes, 20, 0.10);

    // ── Directional strength ────────────────────────────────────────────
    let adx = latest_adx(candles, 14);
    let (adx_v, plus_di, minus_di, trend_strength) = match adx {
        Some(a) => (a.adx, a.plus_di, a.minus_di, a.strength().to_string()),
        None => (0.0, 0.0, 0.0, "absent".to_string()),
    };

    // ── Structure ───────────────────────────────────────────────────────
    let fib = fib_levels(candles);
    let pivots = pivot_points(candles);
    let (swing_high, swing_low) = fib
        .as_ref()
        .map(|f| (f.swing_high, f.swing_low))
        .unwrap_or((0.0, 0.0));

    // ── Patterns & divergences ──────────────────────────────────────────
    let patterns = detect_patterns(candles);
    let divergences = detect_divergences(candles, 14);

    // ── Volume & VWAP ───────────────────────────────────────────────────
    let volume_spike = detect_volume_spike(candles);
    let vwap = compute_vwap(candles);

    Some(Technicals {
        rsi,
        rsi_slope: rsi_slope_v,
        ema9,
        ema20,
        ema50,
        ema_bias,
        macd: macd_v,
        macd_signal,
        macd_histogram,
        macd_slope,
        atr,
        atr_tail,
        atr_change_pct: atr_change,
        bb_upper: bb.upper,
        bb_lower: bb.lower,
        bb_position: bb.position,
        bb_bandwidth: bb.bandwidth,
        bb_squeezed: squeezed,
        adx: adx_v,
        plus_di,
        minus_di,
        trend_strength,
        fib,
        pivots,
        patterns,
        divergences,
        swing_high,
        swing_low,
        volume_spike,
        vwap,
    })
}

/// Last bar's volume against the mean of the prior 20 bars.
fn detect_volume_spike(candles: &[Candle]) -> bool {
    if candles.len() < 21 {
        return false;
    }
    let last = candles.last().unwrap().volume;
    let window = &candles[candles.len() - 21..candles.len() - 1];
    let mean: f64 = window.iter().map(|c| c.volume).sum::<f64>() / window.len() as f64;
    mean > 0.0 && last > mean * VOLUME_SPIKE_MULT
}

/// Volume-weighted average of the typical price over the whole series.
fn compute_vwap(candles: &[Candle]) -> f64 {
    let (pv, vol) = candles.iter().fold((0.0_f64, 0.0_f64), |(pv, vol), c| {
        (pv + c.typical_price() * c.volume, vol + c.volume)
    });
    if vol > 0.0 {
        pv / vol
    } else {
        0.0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn bar(i: usize, close: f64, volume: f64) -> Candle {
        Candle::new(
            format!("2025-01-{:02}", (i % 28) + 1),
            close - 0.5,
            close + 1.0,
            close - 1.0,
            close,
            volume,
        )
    }

    fn trending_series(n: usize) -> Vec<Candle> {
        (0..n).map(|i| bar(i, 100.0 + i as f64, 1_000.0)).collect()
    }

    #[test]
    fn twenty_nine_candles_insufficient() {
        let candles = trending_series(29);
        assert!(analyze(&candles).is_none());
    }

    #[test]
    fn thirty_candles_sufficient() {
        let candles = trending_series(30);
        assert!(analyze(&candles).is_some());
    }

    #[test]
    fn uptrend_reads_bullish() {
        let candles = trending_series(120);
        let ta = analyze(&candles).unwrap();
        assert_eq!(ta.ema_bias, SignalDirection::Bullish);
        assert!(ta.rsi > 50.0);
        assert!(ta.plus_di > ta.minus_di);
        assert!(ta.vwap > 0.0);
    }

    #[test]
    fn macd_noise_gate_suppresses_flat_histogram() {
        // Oscillating series with a wide ATR: tiny MACD histogram vs ATR.
        let candles: Vec<Candle> = (0..120)
            .map(|i| {
                let close = 100.0 + ((i % 2) as f64) * 0.01;
                Candle::new("2025-01-01", close, close + 5.0, close - 5.0, close, 1_000.0)
            })
            .collect();
        let ta = analyze(&candles).unwrap();
        // ATR ~10, noise floor ~0.05; the histogram of a ±0.005 wiggle dies.
        assert!(ta.macd_histogram.is_none());
    }

    #[test]
    fn macd_histogram_passes_gate_in_real_trend() {
        let candles: Vec<Candle> = (0..120)
            .map(|i| {
                let close = 100.0 + (i as f64).powi(2) / 40.0;
                Candle::new("2025-01-01", close - 0.2, close + 0.3, close - 0.3, close, 1_000.0)
            })
            .collect();
        let ta = analyze(&candles).unwrap();
        assert!(ta.macd_histogram.is_some());
    }

    #[test]
    fn volume_spike_detected() {
        let mut candles = trending_series(60);
        candles.last_mut().unwrap().volume = 10_000.0;
        let ta = analyze(&candles).unwrap();
        assert!(ta.volume_spike);
    }

    #[test]
    fn no_volume_spike_on_uniform_volume() {
        let candles = trending_series(60);
        let ta = analyze(&candles).unwrap();
        assert!(!ta.volume_spike);
    }

    #[test]
    fn bb_position_in_unit_range() {
        let candles = trending_series(80);
        let ta = analyze(&candles).unwrap();
        assert!((0.0..=1.0).contains(&ta.bb_position));
        assert!(ta.bb_bandwidth >= 0.0);
    }

    #[test]
    fn atr_tail_bounded() {
        let candles = trending_series(200);
        let ta = analyze(&candles).unwrap();
        assert!(ta.atr_tail.len() <= ATR_TAIL);
        assert!((ta.atr_tail.last().unwrap() - ta.atr).abs() < 1e-12);
    }

    #[test]
    fn serde_roundtrip() {
        let candles = trending_series(80);
        let ta = analyze(&candles).unwrap();
        let json = serde_json::to_string(&ta).unwrap();
        let back: Technicals = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ema_bias, ta.ema_bias);
        assert!((back.rsi - ta.rsi).abs() < 1e-12);
    }
}
