// =============================================================================
// Candlestick pattern scanner
// =============================================================================
//
// Single-, two-, and three-bar reversal patterns scored in [0, 1]. Matches
// below strength 0.3 are dropped — weak shapes are noise, not signal. Each
// hit carries a bull/bear direction; context-free shapes like the doji are
// not reported.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::state::Candle;
use crate::types::SignalDirection;

/// Minimum strength for a pattern to be reported.
const MIN_STRENGTH: f64 = 0.3;

/// One detected candlestick pattern on the latest bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternHit {
    pub name: String,
    pub direction: SignalDirection,
    /// [0, 1] — how cleanly the bars fit the textbook shape.
    pub strength: f64,
}

/// Scan the tail of `candles` for patterns. Strongest hits first.
pub fn detect_patterns(candles: &[Candle]) -> Vec<PatternHit> {
    let mut hits = Vec::new();

    if let Some(last) = candles.last() {
        hits.extend(single_bar(last));
    }
    if candles.len() >= 2 {
        hits.extend(two_bar(&candles[candles.len() - 2], &candles[candles.len() - 1]));
    }
    if candles.len() >= 3 {
        let tail = &candles[candles.len() - 3..];
        hits.extend(three_bar(&tail[0], &tail[1], &tail[2]));
    }

    hits.retain(|h| h.strength >= MIN_STRENGTH);
    hits.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal));
    hits
}

// ---------------------------------------------------------------------------
// Bar anatomy
// ---------------------------------------------------------------------------

struct Anatomy {
    body: f64,
    range: f64,
    upper_shadow: f64,
    lower_shadow: f64,
}

fn anatomy(bar: &Candle) -> Option<Anatomy> {
    let range = bar.high - bar.low;
    if range <= 0.0 || !range.is_finite() {
        return None;
    }
    Some(Anatomy {
        body: (bar.close - bar.open).abs(),
        range,
        upper_shadow: bar.high - bar.open.max(bar.close),
        lower_shadow: bar.open.min(bar.close) - bar.low,
    })
}

fn shadow_strength(shadow: f64, body: f64) -> f64 {
    if body <= 0.0 {
        return 1.0;
    }
    (shadow / body / 5.0).min(1.0)
}

// ---------------------------------------------------------------------------
// Single-bar patterns
// ---------------------------------------------------------------------------

fn single_bar(bar: &Candle) -> Vec<PatternHit> {
    let Some(a) = anatomy(bar) else { return Vec::new() };
    let mut hits = Vec::new();

    let small_body = a.body / a.range < 0.3;

    // Hammer: small body, long lower shadow, bare top.
    if small_body && a.lower_shadow > 2.0 * a.body && a.upper_shadow < a.body * 0.5 {
        hits.push(PatternHit {
            name: "hammer".into(),
            direction: SignalDirection::Bullish,
            strength: shadow_strength(a.lower_shadow, a.body),
        });
    }

    // Shooting star: small body, long upper shadow, bare bottom.
    if small_body && a.upper_shadow > 2.0 * a.body && a.lower_shadow < a.body * 0.5 {
        hits.push(PatternHit {
            name: "shooting_star".into(),
            direction: SignalDirection::Bearish,
            strength: shadow_strength(a.upper_shadow, a.body),
        });
    }

    hits
}

// ---------------------------------------------------------------------------
// Two-bar patterns
// ---------------------------------------------------------------------------

fn two_bar(prev: &Candle, curr: &Candle) -> Vec<PatternHit> {
    let (Some(pa), Some(ca)) = (anatomy(prev), anatomy(curr)) else {
        return Vec::new();
    };
    let mut hits = Vec::new();

    // Bullish engulfing: red then green, current body swallows the prior.
    if !prev.is_bullish()
        && curr.is_bullish()
        && curr.open <= prev.close
        && curr.close >= prev.open
        && pa.body > 0.0
    {
        hits.push(PatternHit {
            name: "bullish_engulfing".into(),
            direction: SignalDirection::Bullish,
            strength: (ca.body / pa.body / 2.0).min(1.0),
        });
    }

    // Bearish engulfing: green then red.
    if prev.is_bullish()
        && !curr.is_bullish()
        && curr.open >= prev.close
        && curr.close <= prev.open
        && pa.body > 0.0
    {
        hits.push(PatternHit {
            name: "bearish_engulfing".into(),
            direction: SignalDirection::Bearish,
            strength: (ca.body / pa.body / 2.0).min(1.0),
        });
    }

    // Piercing line: red bar, then a green open below the low that closes
    // above the prior midpoint.
    let prev_mid = (prev.open + prev.close) / 2.0;
    if !prev.is_bullish()
        && curr.is_bullish()
        && curr.open < prev.low
        && curr.close > prev_mid
        && curr.close < prev.open
    {
        hits.push(PatternHit {
            name: "piercing_line".into(),
            direction: SignalDirection::Bullish,
            strength: 0.6,
        });
    }

    // Dark cloud cover: mirror of the piercing line.
    if prev.is_bullish()
        && !curr.is_bullish()
        && curr.open > prev.high
        && curr.close < prev_mid
        && curr.close > prev.open
    {
        hits.push(PatternHit {
            name: "dark_cloud_cover".into(),
            direction: SignalDirection::Bearish,
            strength: 0.6,
        });
    }

    hits
}

// ---------------------------------------------------------------------------
// Three-bar patterns
// ---------------------------------------------------------------------------

fn three_bar(first: &Candle, middle: &Candle, last: &Candle) -> Vec<PatternHit> {
    let (Some(fa), Some(ma), Some(_la)) = (anatomy(first), anatomy(middle), anatomy(last)) else {
        return Vec::new();
    };
    let mut hits = Vec::new();

    let middle_small = ma.body < fa.body * 0.5;
    let first_mid = (first.open + first.close) / 2.0;

    // Morning star: big red, small middle, green close above first midpoint.
    if !first.is_bullish() && middle_small && last.is_bullish() && last.close > first_mid {
        hits.push(PatternHit {
            name: "morning_star".into(),
            direction: SignalDirection::Bullish,
            strength: 0.8,
        });
    }

    // Evening star: mirror.
    if first.is_bullish() && middle_small && !last.is_bullish() && last.close < first_mid {
        hits.push(PatternHit {
            name: "evening_star".into(),
            direction: SignalDirection::Bearish,
            strength: 0.8,
        });
    }

    // Three white soldiers: three green bars, each closing higher.
    if first.is_bullish()
        && middle.is_bullish()
        && last.is_bullish()
        && middle.close > first.close
        && last.close > middle.close
    {
        hits.push(PatternHit {
            name: "three_white_soldiers".into(),
            direction: SignalDirection::Bullish,
            strength: 0.7,
        });
    }

    // Three black crows: three red bars, each closing lower.
    if !first.is_bullish()
        && !middle.is_bullish()
        && !last.is_bullish()
        && middle.close < first.close
        && last.close < middle.close
    {
        hits.push(PatternHit {
            name: "three_black_crows".into(),
            direction: SignalDirection::Bearish,
            strength: 0.7,
        });
    }

    hits
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new("2025-01-01", open, high, low, close, 1000.0)
    }

    #[test]
    fn empty_input() {
        assert!(detect_patterns(&[]).is_empty());
    }

    #[test]
    fn hammer_detected() {
        // Long lower shadow, tiny body near the top.
        let candles = vec![bar(100.0, 100.6, 95.0, 100.4)];
        let hits = detect_patterns(&candles);
        assert!(hits.iter().any(|h| h.name == "hammer" && h.direction == SignalDirection::Bullish));
    }

    #[test]
    fn shooting_star_detected() {
        let candles = vec![bar(100.0, 105.0, 99.8, 100.2)];
        let hits = detect_patterns(&candles);
        assert!(hits
            .iter()
            .any(|h| h.name == "shooting_star" && h.direction == SignalDirection::Bearish));
    }

    #[test]
    fn bullish_engulfing_detected() {
        let candles = vec![bar(102.0, 102.5, 99.5, 100.0), bar(99.5, 103.5, 99.0, 103.0)];
        let hits = detect_patterns(&candles);
        assert!(hits.iter().any(|h| h.name == "bullish_engulfing"));
    }

    #[test]
    fn bearish_engulfing_detected() {
        let candles = vec![bar(100.0, 102.5, 99.5, 102.0), bar(102.5, 103.0, 98.5, 99.0)];
        let hits = detect_patterns(&candles);
        assert!(hits.iter().any(|h| h.name == "bearish_engulfing"));
    }

    #[test]
    fn morning_star_detected() {
        let candles = vec![
            bar(110.0, 110.5, 104.5, 105.0), // big red
            bar(104.5, 105.2, 103.8, 104.8), // small body
            bar(105.0, 110.0, 104.8, 109.5), // strong green close above midpoint
        ];
        let hits = detect_patterns(&candles);
        assert!(hits.iter().any(|h| h.name == "morning_star"));
    }

    #[test]
    fn three_white_soldiers_detected() {
        let candles = vec![
            bar(100.0, 102.5, 99.5, 102.0),
            bar(102.0, 104.5, 101.5, 104.0),
            bar(104.0, 106.5, 103.5, 106.0),
        ];
        let hits = detect_patterns(&candles);
        assert!(hits.iter().any(|h| h.name == "three_white_soldiers"));
    }

    #[test]
    fn weak_hits_dropped() {
        // Barely-engulfing bar: body ratio too small to clear 0.3.
        let candles = vec![bar(100.0, 110.0, 90.0, 99.0), bar(99.0, 110.5, 89.5, 100.05)];
        let hits = detect_patterns(&candles);
        for h in &hits {
            assert!(h.strength >= MIN_STRENGTH);
        }
    }

    #[test]
    fn ordinary_bar_no_patterns() {
        let candles = vec![bar(100.0, 101.0, 99.0, 100.5)];
        assert!(detect_patterns(&candles).is_empty());
    }

    #[test]
    fn strongest_first() {
        let candles = vec![
            bar(100.0, 102.5, 99.5, 102.0),
            bar(102.0, 104.5, 101.5, 104.0),
            bar(104.0, 106.5, 103.5, 106.0),
        ];
        let hits = detect_patterns(&candles);
        for pair in hits.windows(2) {
            assert!(pair[0].strength >= pair[1].strength);
        }
    }
}
