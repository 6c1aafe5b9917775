// =============================================================================
// Structure Snap — pull ATR targets/stops onto real price structure
// =============================================================================
//
// Raw ATR-multiple targets land in no-man's-land; real fills happen at
// levels other participants watch. This pure function collects every
// structural level in view — Fibonacci retracements and extensions, floor
// pivots, and the top-10-by-volume strikes from daily and intraday options
// flow — and snaps:
//
//   target — nearest level in the trade direction within 30% of the ATR
//            target's distance from price
//   stop   — nearest level on the protective side within 50% of the ATR
//            stop's distance from price
//
// Closest to the ATR level wins a tie. No qualifying level: the ATR values
// pass through unchanged. Either way the target stays strictly on the
// profit side and the stop strictly on the loss side.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::analyzer::Technicals;
use crate::indicators::fib::PriceLevel;
use crate::state::StrikeFlow;
use crate::types::TradeDirection;

/// How far from the ATR target a level may sit, as a fraction of the ATR
/// target's distance from price.
const TARGET_RADIUS: f64 = 0.30;
/// Same for the stop.
const STOP_RADIUS: f64 = 0.50;
/// Strikes considered per flow table.
const TOP_STRIKES: usize = 10;

/// Result of a snap pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnappedLevels {
    pub target1: f64,
    pub stop: f64,
    /// True when either side snapped to structure.
    pub snapped: bool,
    /// e.g. "fib_1.272", "pivot_s1", "strike_450". "atr" when unsnapped.
    pub target_source: String,
    pub stop_source: String,
}

/// Snap `atr_target` / `atr_stop` onto the nearest qualifying structure.
pub fn snap(
    price: f64,
    atr_target: f64,
    atr_stop: f64,
    direction: TradeDirection,
    technicals: &Technicals,
    flow_per_strike: &[StrikeFlow],
    intraday_flow: &[StrikeFlow],
) -> SnappedLevels {
    let levels = collect_levels(technicals, flow_per_strike, intraday_flow);

    let target_dist = (atr_target - price).abs();
    let stop_dist = (atr_stop - price).abs();

    // ── Target: in the trade direction ──────────────────────────────────
    let target_candidate = levels
        .iter()
        .filter(|l| match direction {
            TradeDirection::Long => l.price > price,
            TradeDirection::Short => l.price < price,
        })
        .filter(|l| (l.price - atr_target).abs() <= TARGET_RADIUS * target_dist)
        .min_by(|a, b| {
            let da = (a.price - atr_target).abs();
            let db = (b.price - atr_target).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });

    // ── Stop: on the protective side ────────────────────────────────────
    let stop_candidate = levels
        .iter()
        .filter(|l| match direction {
            TradeDirection::Long => l.price < price,
            TradeDirection::Short => l.price > price,
        })
        .filter(|l| (l.price - atr_stop).abs() <= STOP_RADIUS * stop_dist)
        .min_by(|a, b| {
            let da = (a.price - atr_stop).abs();
            let db = (b.price - atr_stop).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });

    let (target1, target_source) = match target_candidate {
        Some(level) => (level.price, level.name.clone()),
        None => (atr_target, "atr".to_string()),
    };
    let (stop, stop_source) = match stop_candidate {
        Some(level) => (level.price, level.name.clone()),
        None => (atr_stop, "atr".to_string()),
    };

    SnappedLevels {
        target1,
        stop,
        snapped: target_source != "atr" || stop_source != "atr",
        target_source,
        stop_source,
    }
}

/// Every structural level in view: fibs, pivots, and the loudest strikes.
fn collect_levels(
    technicals: &Technicals,
    flow_per_strike: &[StrikeFlow],
    intraday_flow: &[StrikeFlow],
) -> Vec<PriceLevel> {
    let mut levels = Vec::new();

    if let Some(fib) = &technicals.fib {
        levels.extend(fib.retracements.iter().cloned());
        levels.extend(fib.extensions.iter().cloned());
    }
    if let Some(pivots) = &technicals.pivots {
        levels.extend(pivots.levels());
    }
    levels.extend(top_strikes(flow_per_strike));
    levels.extend(top_strikes(intraday_flow));

    levels.retain(|l| l.price.is_finite() && l.price > 0.0);
    levels
}

fn top_strikes(flow: &[StrikeFlow]) -> Vec<PriceLevel> {
    let mut sorted: Vec<&StrikeFlow> = flow.iter().collect();
    sorted.sort_by(|a, b| {
        b.total_volume()
            .partial_cmp(&a.total_volume())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted
        .into_iter()
        .take(TOP_STRIKES)
        .map(|s| PriceLevel {
            name: format!("strike_{:.0}", s.strike),
            price: s.strike,
        })
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::fib::FibLevels;
    use crate::indicators::pivots::PivotPoints;

    fn ta_with(fib: Option<FibLevels>, pivots: Option<PivotPoints>) -> Technicals {
        Technicals {
            fib,
            pivots,
            ..Default::default()
        }
    }

    fn fib_at(ext_1272: f64) -> FibLevels {
        FibLevels {
            swing_high: 101.0,
            swing_low: 95.0,
            leg_up: true,
            retracements: vec![],
            extensions: vec![PriceLevel { name: "fib_1.272".into(), price: ext_1272 }],
        }
    }

    fn pivots_with_s1(s1: f64) -> PivotPoints {
        PivotPoints { pp: 100.0, r1: 104.0, r2: 107.0, s1, s2: 94.0 }
    }

    #[test]
    fn snaps_target_and_stop_to_structure() {
        // Entry 100, ATR target 103, ATR stop 98.50; fib 1.272 at 102.60
        // (within 30% of 3.0) and pivot S1 at 98.20 (within 50% of 1.5).
        let ta = ta_with(Some(fib_at(102.60)), Some(pivots_with_s1(98.20)));
        let result = snap(100.0, 103.0, 98.50, TradeDirection::Long, &ta, &[], &[]);

        assert!(result.snapped);
        assert!((result.target1 - 102.60).abs() < 1e-10);
        assert_eq!(result.target_source, "fib_1.272");
        assert!((result.stop - 98.20).abs() < 1e-10);
        assert_eq!(result.stop_source, "pivot_s1");
    }

    #[test]
    fn passes_through_when_nothing_qualifies() {
        let ta = ta_with(None, None);
        let result = snap(100.0, 103.0, 98.50, TradeDirection::Long, &ta, &[], &[]);
        assert!(!result.snapped);
        assert_eq!(result.target1, 103.0);
        assert_eq!(result.stop, 98.50);
        assert_eq!(result.target_source, "atr");
        assert_eq!(result.stop_source, "atr");
    }

    #[test]
    fn level_outside_radius_ignored(){
        // Fib at 101.5: |101.5 - 103| = 1.5 > 0.9 => not a target candidate.
        let ta = ta_with(Some(fib_at(101.5)), None);
        let result = snap(100.0, 103.0, 98.50, TradeDirection::Long, &ta, &[], &[]);
        assert_eq!(result.target1, 103.0);
        assert_eq!(result.target_source, "atr");
    }

    #[test]
    fn target_always_profit_side_stop_always_loss_side() {
        let ta = ta_with(Some(fib_at(102.60)), Some(pivots_with_s1(98.20)));

        let long = snap(100.0, 103.0, 98.5, TradeDirection::Long, &ta, &[], &[]);
        assert!(long.target1 > 100.0);
        assert!(long.stop < 100.0);

        let short = snap(100.0, 97.0, 101.5, TradeDirection::Short, &ta, &[], &[]);
        assert!(short.target1 < 100.0);
        assert!(short.stop > 100.0);
    }

    #[test]
    fn short_side_snapping() {
        // Short from 100: target below, stop above. R1 at 101.4 should catch
        // the stop (ATR stop 101.5, dist 1.5, radius 0.75).
        let ta = ta_with(None, Some(PivotPoints {
            pp: 100.2,
            r1: 101.4,
            r2: 104.0,
            s1: 97.2,
            s2: 95.0,
        }));
        let result = snap(100.0, 97.0, 101.5, TradeDirection::Short, &ta, &[], &[]);
        assert_eq!(result.stop_source, "pivot_r1");
        assert!((result.stop - 101.4).abs() < 1e-10);
        // S1 at 97.2: |97.2 - 97| = 0.2 <= 0.9 => target snaps too.
        assert_eq!(result.target_source, "pivot_s1");
    }

    #[test]
    fn volume_strikes_participate() {
        let flow = vec![
            StrikeFlow { strike: 102.8, call_volume: 90_000.0, put_volume: 10_000.0, net_premium: 0.0 },
            StrikeFlow { strike: 150.0, call_volume: 100.0, put_volume: 100.0, net_premium: 0.0 },
        ];
        let ta = ta_with(None, None);
        let result = snap(100.0, 103.0, 98.5, TradeDirection::Long, &ta, &flow, &[]);
        assert_eq!(result.target_source, "strike_103");
        assert!((result.target1 - 102.8).abs() < 1e-10);
    }

    #[test]
    fn closest_to_atr_level_wins_tie() {
        // Two qualifying targets: 102.9 (closer to 103) and 102.2.
        let flow = vec![
            StrikeFlow { strike: 102.9, call_volume: 50_000.0, put_volume: 0.0, net_premium: 0.0 },
            StrikeFlow { strike: 102.2, call_volume: 50_000.0, put_volume: 0.0, net_premium: 0.0 },
        ];
        let ta = ta_with(None, None);
        let result = snap(100.0, 103.0, 98.5, TradeDirection::Long, &ta, &flow, &[]);
        assert!((result.target1 - 102.9).abs() < 1e-10);
    }

    #[test]
    fn only_top_ten_strikes_considered() {
        // Eleven strikes; the lowest-volume one sits closest to the target
        // but must be excluded.
        let mut flow: Vec<StrikeFlow> = (0..10)
            .map(|i| StrikeFlow {
                strike: 110.0 + i as f64,
                call_volume: 100_000.0 - i as f64,
                put_volume: 0.0,
                net_premium: 0.0,
            })
            .collect();
        flow.push(StrikeFlow { strike: 103.0, call_volume: 1.0, put_volume: 0.0, net_premium: 0.0 });

        let ta = ta_with(None, None);
        let result = snap(100.0, 103.0, 98.5, TradeDirection::Long, &ta, &flow, &[]);
        assert_eq!(result.target_source, "atr");
    }
}
