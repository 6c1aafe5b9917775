// =============================================================================
// Kelly sizing — confidence in, position fraction and share count out
// =============================================================================
//
//   f* = (b*p - q) / b
//
// where b is the payoff ratio, p the win probability, q = 1 - p. The raw
// fraction is multiplied by 0.5 (half-Kelly) and capped — full Kelly's
// volatility is unlivable on an estimated p. Share counts are sized so a
// stop-out loses at most the fixed notional risk budget.
// =============================================================================

use serde::{Deserialize, Serialize};

/// Assumed payoff ratio for the Kelly estimate (target1 vs stop distance).
const PAYOFF_RATIO: f64 = 1.5;
/// Half-Kelly multiplier.
const KELLY_MULTIPLIER: f64 = 0.5;
/// Ceiling on the final fraction.
const MAX_FRACTION: f64 = 0.25;

/// Sizing recommendation for one trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KellySize {
    /// Fraction of capital to deploy, after half-Kelly and the ceiling.
    pub pct: f64,
    /// Dollar size against the reference capital.
    pub size: f64,
}

/// Map a [0, 95] confidence onto a win-probability estimate. Confidence 50
/// reads as a coin flip; the top of the scale tops out at 75% — no signal
/// deserves more.
fn win_probability(confidence: u8) -> f64 {
    let c = confidence.min(95) as f64;
    (0.30 + c / 95.0 * 0.45).clamp(0.05, 0.75)
}

/// Kelly fraction for a confidence level. Deterministic; never exceeds the
/// half-Kelly ceiling, never below zero.
pub fn kelly_fraction(confidence: u8) -> f64 {
    let p = win_probability(confidence);
    let q = 1.0 - p;
    let raw = (PAYOFF_RATIO * p - q) / PAYOFF_RATIO;
    (raw * KELLY_MULTIPLIER).clamp(0.0, MAX_FRACTION)
}

/// Full sizing against a reference capital.
pub fn kelly_size(confidence: u8, capital: f64) -> KellySize {
    let pct = kelly_fraction(confidence);
    KellySize {
        pct,
        size: (capital * pct).max(0.0),
    }
}

/// Shares such that a stop-out loses at most `risk_budget` dollars.
pub fn shares_for(risk_budget: f64, entry: f64, stop: f64) -> u64 {
    let per_share_risk = (entry - stop).abs().max(0.01);
    (risk_budget / per_share_risk).floor().max(0.0) as u64
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_monotonic_in_confidence() {
        let mut prev = -1.0;
        for c in [0_u8, 30, 50, 70, 95] {
            let f = kelly_fraction(c);
            assert!(f >= prev, "fraction should not shrink with confidence");
            prev = f;
        }
    }

    #[test]
    fn fraction_never_exceeds_ceiling() {
        for c in 0..=95_u8 {
            let f = kelly_fraction(c);
            assert!((0.0..=MAX_FRACTION).contains(&f), "confidence {c} gave {f}");
        }
    }

    #[test]
    fn half_kelly_applied() {
        // At p = 0.75, b = 1.5: full Kelly = (1.125 - 0.25)/1.5 ≈ 0.583;
        // half-Kelly ≈ 0.292, then the 0.25 ceiling binds.
        let f = kelly_fraction(95);
        assert_eq!(f, MAX_FRACTION);
    }

    #[test]
    fn low_confidence_sizes_to_zero() {
        // p = 0.30 => bp - q = 0.45 - 0.70 < 0 => no position.
        assert_eq!(kelly_fraction(0), 0.0);
    }

    #[test]
    fn size_scales_with_capital() {
        let small = kelly_size(70, 10_000.0);
        let large = kelly_size(70, 100_000.0);
        assert_eq!(small.pct, large.pct);
        assert!((large.size - small.size * 10.0).abs() < 1e-6);
    }

    #[test]
    fn shares_floor_against_stop_distance() {
        // $2000 budget, $2.50 per-share risk => 800 shares.
        assert_eq!(shares_for(2_000.0, 100.0, 97.50), 800);
        // Short side uses the same distance.
        assert_eq!(shares_for(2_000.0, 97.50, 100.0), 800);
        // Fractional result floors.
        assert_eq!(shares_for(2_000.0, 100.0, 97.0), 666);
    }

    #[test]
    fn degenerate_stop_distance_guarded() {
        // Stop == entry clamps to a cent of risk instead of dividing by zero.
        let shares = shares_for(2_000.0, 100.0, 100.0);
        assert_eq!(shares, 200_000);
    }
}
