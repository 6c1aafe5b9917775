// =============================================================================
// Floor-trader pivot points from the prior session's bar
// =============================================================================
//
//   PP = (H + L + C) / 3
//   R1 = 2*PP - L        S1 = 2*PP - H
//   R2 = PP + (H - L)    S2 = PP - (H - L)
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::fib::PriceLevel;
use crate::state::Candle;

/// The five classic pivot levels for one session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PivotPoints {
    pub pp: f64,
    pub r1: f64,
    pub r2: f64,
    pub s1: f64,
    pub s2: f64,
}

impl PivotPoints {
    /// The levels as named entries, for structure-snapping.
    pub fn levels(&self) -> Vec<PriceLevel> {
        vec![
            PriceLevel { name: "pivot_pp".into(), price: self.pp },
            PriceLevel { name: "pivot_r1".into(), price: self.r1 },
            PriceLevel { name: "pivot_r2".into(), price: self.r2 },
            PriceLevel { name: "pivot_s1".into(), price: self.s1 },
            PriceLevel { name: "pivot_s2".into(), price: self.s2 },
        ]
    }
}

/// Compute pivots from the last completed bar of `candles` (normally the
/// prior daily session). Returns `None` on an empty series or a zero-range
/// bar with no usable structure.
pub fn pivot_points(candles: &[Candle]) -> Option<PivotPoints> {
    let bar = candles.last()?;
    if !(bar.high.is_finite() && bar.low.is_finite() && bar.close.is_finite()) {
        return None;
    }

    let pp = (bar.high + bar.low + bar.close) / 3.0;
    let range = bar.high - bar.low;

    Some(PivotPoints {
        pp,
        r1: 2.0 * pp - bar.low,
        r2: pp + range,
        s1: 2.0 * pp - bar.high,
        s2: pp - range,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_series() {
        assert!(pivot_points(&[]).is_none());
    }

    #[test]
    fn known_values() {
        let candles = vec![Candle::new("2025-01-02", 100.0, 110.0, 90.0, 105.0, 1000.0)];
        let p = pivot_points(&candles).unwrap();
        let pp = (110.0 + 90.0 + 105.0) / 3.0;
        assert!((p.pp - pp).abs() < 1e-10);
        assert!((p.r1 - (2.0 * pp - 90.0)).abs() < 1e-10);
        assert!((p.s1 - (2.0 * pp - 110.0)).abs() < 1e-10);
        assert!((p.r2 - (pp + 20.0)).abs() < 1e-10);
        assert!((p.s2 - (pp - 20.0)).abs() < 1e-10);
    }

    #[test]
    fn ordering() {
        let candles = vec![Candle::new("2025-01-02", 100.0, 110.0, 90.0, 105.0, 1000.0)];
        let p = pivot_points(&candles).unwrap();
        assert!(p.s2 < p.s1);
        assert!(p.s1 < p.pp);
        assert!(p.pp < p.r1);
        assert!(p.r1 < p.r2);
    }

    #[test]
    fn named_levels() {
        let candles = vec![Candle::new("2025-01-02", 100.0, 110.0, 90.0, 105.0, 1000.0)];
        let p = pivot_points(&candles).unwrap();
        let levels = p.levels();
        assert_eq!(levels.len(), 5);
        assert!(levels.iter().any(|l| l.name == "pivot_s1"));
        assert!(levels.iter().any(|l| l.name == "pivot_r2"));
    }

    #[test]
    fn nan_bar_rejected() {
        let candles = vec![Candle::new("2025-01-02", 100.0, f64::NAN, 90.0, 105.0, 1000.0)];
        assert!(pivot_points(&candles).is_none());
    }
}
