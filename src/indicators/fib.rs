// =============================================================================
// Fibonacci levels — retracements and extensions off the latest swing
// =============================================================================
//
// Anchoring: the most recent detectable swing high and swing low (fractal
// pivots, 2 bars each side). When the swing high is more recent than the
// swing low the leg is up — retracements sit below the high and extensions
// above it; reversed for a down leg. Extensions (1.272, 1.618) are the
// long-direction target levels.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::state::Candle;

/// One named price level, e.g. ("fib_0.618", 182.40).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub name: String,
    pub price: f64,
}

/// Full Fibonacci read for one candle series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibLevels {
    pub swing_high: f64,
    pub swing_low: f64,
    /// True when the anchoring leg runs low → high.
    pub leg_up: bool,
    pub retracements: Vec<PriceLevel>,
    pub extensions: Vec<PriceLevel>,
}

const RETRACE_RATIOS: [(f64, &str); 5] = [
    (0.236, "fib_0.236"),
    (0.382, "fib_0.382"),
    (0.500, "fib_0.500"),
    (0.618, "fib_0.618"),
    (0.786, "fib_0.786"),
];

const EXTENSION_RATIOS: [(f64, &str); 2] = [(1.272, "fib_1.272"), (1.618, "fib_1.618")];

/// Indices of fractal swing highs in `candles` (high above both 2-bar
/// neighbours on each side).
pub fn swing_high_indices(candles: &[Candle]) -> Vec<usize> {
    fractal_indices(candles, true)
}

/// Indices of fractal swing lows.
pub fn swing_low_indices(candles: &[Candle]) -> Vec<usize> {
    fractal_indices(candles, false)
}

fn fractal_indices(candles: &[Candle], highs: bool) -> Vec<usize> {
    if candles.len() < 5 {
        return Vec::new();
    }

    let mut out = Vec::new();
    for i in 2..candles.len() - 2 {
        let pivot = if highs { candles[i].high } else { candles[i].low };
        let neighbours = [
            &candles[i - 2],
            &candles[i - 1],
            &candles[i + 1],
            &candles[i + 2],
        ];
        let is_pivot = if highs {
            neighbours.iter().all(|c| c.high < pivot)
        } else {
            neighbours.iter().all(|c| c.low > pivot)
        };
        if is_pivot {
            out.push(i);
        }
    }
    out
}

/// Compute Fibonacci levels off the most recent swing pair.
///
/// Returns `None` when no swing high/low pair is detectable or the swing
/// range is degenerate.
pub fn fib_levels(candles: &[Candle]) -> Option<FibLevels> {
    let high_idx = *swing_high_indices(candles).last()?;
    let low_idx = *swing_low_indices(candles).last()?;

    let swing_high = candles[high_idx].high;
    let swing_low = candles[low_idx].low;
    let range = swing_high - swing_low;
    if range <= 0.0 {
        return None;
    }

    let leg_up = high_idx > low_idx;

    let retracements = RETRACE_RATIOS
        .iter()
        .map(|&(ratio, name)| {
            let price = if leg_up {
                swing_high - range * ratio
            } else {
                swing_low + range * ratio
            };
            PriceLevel { name: name.to_string(), price }
        })
        .collect();

    let extensions = EXTENSION_RATIOS
        .iter()
        .map(|&(ratio, name)| {
            let price = if leg_up {
                swing_low + range * ratio
            } else {
                swing_high - range * ratio
            };
            PriceLevel { name: name.to_string(), price }
        })
        .collect();

    Some(FibLevels { swing_high, swing_low, leg_up, retracements, extensions })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64) -> Candle {
        let mid = (high + low) / 2.0;
        Candle::new("2025-01-01", mid, high, low, mid, 100.0)
    }

    /// Rise to a peak at index 10, dip to a trough at index 20, then drift.
    fn hill_and_valley() -> Vec<Candle> {
        let mut candles = Vec::new();
        for i in 0..=10 {
            let base = 100.0 + i as f64 * 2.0;
            candles.push(candle(base + 1.0, base - 1.0));
        }
        for i in 1..=10 {
            let base = 120.0 - i as f64 * 2.0;
            candles.push(candle(base + 1.0, base - 1.0));
        }
        for _ in 0..5 {
            candles.push(candle(104.0, 102.0));
        }
        candles
    }

    #[test]
    fn too_short_series() {
        let candles = vec![candle(101.0, 99.0); 4];
        assert!(fib_levels(&candles).is_none());
        assert!(swing_high_indices(&candles).is_empty());
    }

    #[test]
    fn finds_the_peak_and_trough() {
        let candles = hill_and_valley();
        let highs = swing_high_indices(&candles);
        let lows = swing_low_indices(&candles);
        assert!(highs.contains(&10), "peak at index 10, got {highs:?}");
        assert!(lows.contains(&20), "trough at index 20, got {lows:?}");
    }

    #[test]
    fn down_leg_levels() {
        // Trough (20) is more recent than peak (10) => leg down.
        let candles = hill_and_valley();
        let fib = fib_levels(&candles).unwrap();
        assert!(!fib.leg_up);
        assert_eq!(fib.retracements.len(), 5);
        assert_eq!(fib.extensions.len(), 2);
        // Down-leg retracements sit above the swing low.
        for level in &fib.retracements {
            assert!(level.price > fib.swing_low);
            assert!(level.price < fib.swing_high);
        }
    }

    #[test]
    fn up_leg_extension_above_high() {
        // Valley first, then a rally into a fractal peak.
        let mut candles = Vec::new();
        for i in 0..=10 {
            let base = 120.0 - i as f64 * 2.0;
            candles.push(candle(base + 1.0, base - 1.0));
        }
        for i in 1..=10 {
            let base = 100.0 + i as f64 * 2.0;
            candles.push(candle(base + 1.0, base - 1.0));
        }
        for _ in 0..5 {
            candles.push(candle(116.0, 114.0));
        }

        let fib = fib_levels(&candles).unwrap();
        assert!(fib.leg_up);
        for ext in &fib.extensions {
            assert!(
                ext.price > fib.swing_high,
                "{} at {} should be above swing high {}",
                ext.name,
                ext.price,
                fib.swing_high
            );
        }
    }

    #[test]
    fn level_names_stable() {
        let candles = hill_and_valley();
        let fib = fib_levels(&candles).unwrap();
        let names: Vec<&str> = fib.retracements.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["fib_0.236", "fib_0.382", "fib_0.500", "fib_0.618", "fib_0.786"]);
        assert_eq!(fib.extensions[0].name, "fib_1.272");
    }

    #[test]
    fn flat_series_has_no_levels() {
        let candles = vec![candle(100.0, 100.0); 30];
        assert!(fib_levels(&candles).is_none());
    }
}
