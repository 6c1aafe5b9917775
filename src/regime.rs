// =============================================================================
// Market Regime Detector
// =============================================================================
//
// Classifies the whole market into one of five regimes from four inputs:
// VIX (level + spike), index ADX with its DI split, market breadth, and the
// options market tide. The label feeds per-signal dampening in the scoring
// engine — trend-following bear signals are muted in chop, mean-reversion
// signals are boosted, and so on.
//
// Detection hierarchy (first match wins):
//
//   1. VOLATILE      — VIX spiking or VIX >= 28
//   2. TRENDING-UP   — ADX >= 25, +DI dominant, breadth/tide not hostile
//   3. TRENDING-DOWN — ADX >= 25, -DI dominant, breadth/tide not hostile
//   4. RANGING       — ADX < 20
//
// Anything ambiguous (or missing inputs) is UNKNOWN, which the engine treats
// as "no dampening, no boosting".
// =============================================================================

use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::state::MarketFacts;
use crate::types::Regime;

// =============================================================================
// Types
// =============================================================================

/// Snapshot of the detected regime plus all contributing metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeState {
    pub regime: Regime,
    pub vix: f64,
    pub vix_spiking: bool,
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub breadth: f64,
    pub tide_lean: f64,
    /// Confidence in the classification, [0, 1].
    pub confidence: f64,
    /// Seconds the current regime label has been active.
    pub regime_age_secs: f64,
}

/// Index-level directional inputs, usually computed from SPY daily candles.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexTrend {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

// =============================================================================
// RegimeDetector
// =============================================================================

/// Caches the latest regime state and the wall-clock of the last label
/// change. Wrapped in `Arc` and shared across the runtime.
pub struct RegimeDetector {
    state: RwLock<Option<RegimeState>>,
    last_change: RwLock<Instant>,
}

impl RegimeDetector {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
            last_change: RwLock::new(Instant::now()),
        }
    }

    /// Run a full detection pass from the market facts and index trend.
    pub fn update(&self, market: &MarketFacts, index: IndexTrend) -> RegimeState {
        let vix = market.vix.as_ref().map(|v| v.value).unwrap_or(0.0);
        let vix_spiking = market.vix.as_ref().map(|v| v.spiking).unwrap_or(false);
        let breadth = market.breadth.unwrap_or(0.5);
        let tide_lean = market.market_tide.as_ref().map(|t| t.lean()).unwrap_or(0.0);

        let have_inputs = market.vix.is_some() && index.adx > 0.0;
        let (regime, confidence) = if have_inputs {
            classify(vix, vix_spiking, index, breadth, tide_lean)
        } else {
            (Regime::Unknown, 0.0)
        };

        let now = Instant::now();
        let prev = self.state.read().as_ref().map(|s| s.regime);
        if prev != Some(regime) {
            *self.last_change.write() = now;
        }
        let regime_age_secs = now.duration_since(*self.last_change.read()).as_secs_f64();

        let new_state = RegimeState {
            regime,
            vix,
            vix_spiking,
            adx: index.adx,
            plus_di: index.plus_di,
            minus_di: index.minus_di,
            breadth,
            tide_lean,
            confidence,
            regime_age_secs,
        };

        debug!(
            regime = %regime,
            vix = format!("{:.1}", vix),
            adx = format!("{:.1}", index.adx),
            breadth = format!("{:.2}", breadth),
            tide = format!("{:.2}", tide_lean),
            confidence = format!("{:.2}", confidence),
            "regime detected"
        );

        *self.state.write() = Some(new_state.clone());
        new_state
    }

    /// Most recent state without recomputation.
    pub fn current(&self) -> Option<RegimeState> {
        self.state.read().clone()
    }

    /// Current label, defaulting to Unknown before the first pass.
    pub fn current_regime(&self) -> Regime {
        self.state.read().as_ref().map(|s| s.regime).unwrap_or(Regime::Unknown)
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Classification logic
// =============================================================================

fn classify(
    vix: f64,
    vix_spiking: bool,
    index: IndexTrend,
    breadth: f64,
    tide_lean: f64,
) -> (Regime, f64) {
    // 1. VOLATILE — fear dominates everything else.
    if vix_spiking || vix >= 28.0 {
        let confidence = if vix_spiking {
            0.9
        } else {
            remap(vix, 28.0, 45.0, 0.65, 1.0)
        };
        return (Regime::Volatile, confidence);
    }

    // 2/3. TRENDING — ADX strong and one DI side owns the tape.
    if index.adx >= 25.0 {
        let adx_conf = remap(index.adx, 25.0, 50.0, 0.60, 1.0);

        if index.plus_di > index.minus_di && breadth >= 0.45 && tide_lean >= -0.2 {
            let breadth_conf = remap(breadth, 0.45, 0.75, 0.50, 1.0);
            return (Regime::TrendingUp, (adx_conf + breadth_conf) / 2.0);
        }
        if index.minus_di > index.plus_di && breadth <= 0.55 && tide_lean <= 0.2 {
            let breadth_conf = remap(breadth, 0.55, 0.25, 0.50, 1.0);
            return (Regime::TrendingDown, (adx_conf + breadth_conf) / 2.0);
        }
    }

    // 4. RANGING — no directional conviction.
    if index.adx < 20.0 {
        let confidence = remap(index.adx, 20.0, 5.0, 0.50, 1.0);
        return (Regime::Ranging, confidence);
    }

    (Regime::Unknown, 0.30)
}

/// Linearly remap `value` from `[in_lo, in_hi]` to `[out_lo, out_hi]`,
/// clamped to the output range. Direction-agnostic.
fn remap(value: f64, in_lo: f64, in_hi: f64, out_lo: f64, out_hi: f64) -> f64 {
    let t = if (in_hi - in_lo).abs() < f64::EPSILON {
        0.5
    } else {
        (value - in_lo) / (in_hi - in_lo)
    };
    out_lo + t.clamp(0.0, 1.0) * (out_hi - out_lo)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Tide, VixState};

    fn facts(vix: f64, spiking: bool, breadth: f64, bull_prem: f64, bear_prem: f64) -> MarketFacts {
        let mut m = MarketFacts::default();
        m.vix = Some(VixState { value: vix, change_pct: 0.0, spiking });
        m.breadth = Some(breadth);
        m.market_tide = Some(Tide {
            bull_premium: bull_prem,
            bear_premium: bear_prem,
            ..Default::default()
        });
        m
    }

    #[test]
    fn vix_spike_is_volatile() {
        let (regime, conf) = classify(
            20.0,
            true,
            IndexTrend { adx: 40.0, plus_di: 30.0, minus_di: 10.0 },
            0.7,
            0.5,
        );
        assert_eq!(regime, Regime::Volatile);
        assert!(conf > 0.5);
    }

    #[test]
    fn high_vix_is_volatile_even_in_trend() {
        let (regime, _) = classify(
            32.0,
            false,
            IndexTrend { adx: 40.0, plus_di: 30.0, minus_di: 10.0 },
            0.7,
            0.5,
        );
        assert_eq!(regime, Regime::Volatile);
    }

    #[test]
    fn strong_tape_is_trending_up() {
        let (regime, conf) = classify(
            15.0,
            false,
            IndexTrend { adx: 32.0, plus_di: 28.0, minus_di: 12.0 },
            0.65,
            0.3,
        );
        assert_eq!(regime, Regime::TrendingUp);
        assert!(conf > 0.5);
    }

    #[test]
    fn weak_tape_is_trending_down() {
        let (regime, _) = classify(
            18.0,
            false,
            IndexTrend { adx: 30.0, plus_di: 10.0, minus_di: 26.0 },
            0.30,
            -0.3,
        );
        assert_eq!(regime, Regime::TrendingDown);
    }

    #[test]
    fn low_adx_is_ranging() {
        let (regime, _) = classify(
            14.0,
            false,
            IndexTrend { adx: 12.0, plus_di: 15.0, minus_di: 14.0 },
            0.5,
            0.0,
        );
        assert_eq!(regime, Regime::Ranging);
    }

    #[test]
    fn ambiguous_is_unknown() {
        // ADX between 20 and 25 with mixed breadth — no rule matches.
        let (regime, conf) = classify(
            16.0,
            false,
            IndexTrend { adx: 22.0, plus_di: 18.0, minus_di: 17.0 },
            0.5,
            0.0,
        );
        assert_eq!(regime, Regime::Unknown);
        assert!((conf - 0.30).abs() < 1e-10);
    }

    #[test]
    fn trend_with_hostile_breadth_is_unknown() {
        // +DI dominant but breadth collapsed — directional claim rejected.
        let (regime, _) = classify(
            16.0,
            false,
            IndexTrend { adx: 30.0, plus_di: 28.0, minus_di: 12.0 },
            0.30,
            -0.5,
        );
        assert_eq!(regime, Regime::Unknown);
    }

    #[test]
    fn detector_caches_and_ages() {
        let detector = RegimeDetector::new();
        assert_eq!(detector.current_regime(), Regime::Unknown);

        let market = facts(15.0, false, 0.65, 300.0, 100.0);
        let index = IndexTrend { adx: 32.0, plus_di: 28.0, minus_di: 12.0 };
        let state = detector.update(&market, index);
        assert_eq!(state.regime, Regime::TrendingUp);
        assert_eq!(detector.current_regime(), Regime::TrendingUp);

        // Re-detection of the same regime keeps the age clock running.
        let again = detector.update(&market, index);
        assert!(again.regime_age_secs >= state.regime_age_secs);
    }

    #[test]
    fn missing_inputs_stay_unknown() {
        let detector = RegimeDetector::new();
        let state = detector.update(&MarketFacts::default(), IndexTrend::default());
        assert_eq!(state.regime, Regime::Unknown);
        assert_eq!(state.confidence, 0.0);
    }

    #[test]
    fn remap_clamps() {
        assert!((remap(0.5, 0.0, 1.0, 0.0, 10.0) - 5.0).abs() < 1e-10);
        assert!((remap(2.0, 0.0, 1.0, 0.0, 10.0) - 10.0).abs() < 1e-10);
        assert!((remap(-1.0, 0.0, 1.0, 0.0, 10.0) - 0.0).abs() < 1e-10);
    }
}
