// =============================================================================
// Setup overlay — curated multi-condition patterns with real edge
// =============================================================================
//
// The weighted catalogue describes context; a setup is a conjunction of
// conditions that historically carries its own edge. When one matches, the
// engine overrides the weighted direction with the setup's and lifts the
// confidence floor to 60 + 30 × strength (capped at 95, +5 when the weighted
// score agrees). With no match, weighted confidence is capped at 55 —
// context only, no edge.
//
// Detectors run in order and all matches are reported; the engine acts on
// the strongest.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::signals::ScoringContext;
use crate::types::{Regime, SignalDirection};

/// One matched setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupMatch {
    pub name: String,
    pub direction: SignalDirection,
    /// [0, 1] — how deep into the pattern's sweet spot the inputs sit.
    pub strength: f64,
    pub detail: String,
}

type Detector = fn(&ScoringContext) -> Option<SetupMatch>;

const DETECTORS: &[Detector] = &[
    volume_climax_reversal_long,
    capitulation_flush_long,
    bb_squeeze_breakout_long,
    bb_squeeze_breakout_short,
    ema_trend_pullback_long,
    ema_trend_pullback_short,
    vwap_reclaim_momentum_long,
    exhaustion_gap_fade_short,
];

/// Evaluate every setup detector against the context. Strongest first.
pub fn detect_setups(ctx: &ScoringContext) -> Vec<SetupMatch> {
    let mut matches: Vec<SetupMatch> = DETECTORS.iter().filter_map(|d| d(ctx)).collect();
    matches.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal));
    matches
}

// ---------------------------------------------------------------------------
// Detectors
// ---------------------------------------------------------------------------

fn setup(name: &str, direction: SignalDirection, strength: f64, detail: String) -> Option<SetupMatch> {
    Some(SetupMatch {
        name: name.to_string(),
        direction,
        strength: strength.clamp(0.0, 1.0),
        detail,
    })
}

/// Washed-out RSI at the lower band on climactic volume — the classic
/// mean-reversion long.
fn volume_climax_reversal_long(ctx: &ScoringContext) -> Option<SetupMatch> {
    let t = ctx.facts.technicals.as_ref()?;
    if t.rsi < 25.0 && t.bb_position < 0.15 && t.volume_spike {
        // Deeper oversold reads stronger, saturating at RSI 10.
        let strength = ((25.0 - t.rsi) / 15.0).min(1.0) * 0.6;
        return setup(
            "volume-climax-reversal-long",
            SignalDirection::Bullish,
            strength,
            format!("RSI {:.1}, BB {:.2}, volume climax", t.rsi, t.bb_position),
        );
    }
    None
}

/// Multi-day capitulation: price far below the lower band with a bullish
/// reversal candle printing.
fn capitulation_flush_long(ctx: &ScoringContext) -> Option<SetupMatch> {
    let t = ctx.facts.technicals.as_ref()?;
    let price = ctx.facts.quote.last;
    if price <= 0.0 || price >= t.bb_lower || t.rsi >= 30.0 {
        return None;
    }
    let reversal = t
        .patterns
        .iter()
        .find(|p| p.direction == SignalDirection::Bullish)?;
    setup(
        "capitulation-flush-long",
        SignalDirection::Bullish,
        0.4 + reversal.strength * 0.4,
        format!("close below band with {}", reversal.name),
    )
}

/// Compression resolving upward: squeeze flag plus a close through the
/// upper band on volume.
fn bb_squeeze_breakout_long(ctx: &ScoringContext) -> Option<SetupMatch> {
    let t = ctx.facts.technicals.as_ref()?;
    if t.bb_squeezed && t.bb_position > 0.95 && t.volume_spike {
        return setup(
            "bb-squeeze-breakout-long",
            SignalDirection::Bullish,
            0.7,
            format!("squeeze resolved up, BB {:.2}", t.bb_position),
        );
    }
    None
}

/// Compression resolving downward.
fn bb_squeeze_breakout_short(ctx: &ScoringContext) -> Option<SetupMatch> {
    let t = ctx.facts.technicals.as_ref()?;
    if t.bb_squeezed && t.bb_position < 0.05 && t.volume_spike {
        return setup(
            "bb-squeeze-breakout-short",
            SignalDirection::Bearish,
            0.7,
            format!("squeeze resolved down, BB {:.2}", t.bb_position),
        );
    }
    None
}

/// Established uptrend, orderly pullback into the 20-EMA with RSI reset.
fn ema_trend_pullback_long(ctx: &ScoringContext) -> Option<SetupMatch> {
    let t = ctx.facts.technicals.as_ref()?;
    let price = ctx.facts.quote.last;
    if t.ema_bias != SignalDirection::Bullish || price <= 0.0 || t.ema20 <= 0.0 {
        return None;
    }
    let near_ema20 = (price - t.ema20).abs() / price < 0.005;
    if near_ema20 && (38.0..=55.0).contains(&t.rsi) {
        return setup(
            "ema-trend-pullback-long",
            SignalDirection::Bullish,
            0.6,
            format!("pullback to 20-EMA {:.2}, RSI {:.1}", t.ema20, t.rsi),
        );
    }
    None
}

/// Established downtrend, relief bounce into the 20-EMA.
fn ema_trend_pullback_short(ctx: &ScoringContext) -> Option<SetupMatch> {
    let t = ctx.facts.technicals.as_ref()?;
    let price = ctx.facts.quote.last;
    if t.ema_bias != SignalDirection::Bearish || price <= 0.0 || t.ema20 <= 0.0 {
        return None;
    }
    let near_ema20 = (price - t.ema20).abs() / price < 0.005;
    if near_ema20 && (45.0..=62.0).contains(&t.rsi) {
        return setup(
            "ema-trend-pullback-short",
            SignalDirection::Bearish,
            0.6,
            format!("bounce into 20-EMA {:.2}, RSI {:.1}", t.ema20, t.rsi),
        );
    }
    None
}

/// VWAP reclaim with the tape confirming: fresh buy imbalance on the
/// reclaim bar.
fn vwap_reclaim_momentum_long(ctx: &ScoringContext) -> Option<SetupMatch> {
    let t = ctx.facts.technicals.as_ref()?;
    let tick = ctx.tick?;
    let price = ctx.facts.quote.last;
    if t.vwap <= 0.0 || price <= t.vwap {
        return None;
    }
    let prev = ctx.facts.quote.prev_close;
    if prev <= 0.0 || prev >= t.vwap {
        return None;
    }
    if tick.is_fresh() && tick.flow_imbalance > 0.25 {
        return setup(
            "vwap-reclaim-momentum-long",
            SignalDirection::Bullish,
            0.4 + tick.flow_imbalance * 0.4,
            format!("VWAP reclaim with tape {:+.2}", tick.flow_imbalance),
        );
    }
    None
}

/// Stretched gap into overbought with fading momentum — fade it. Stood down
/// in a trending-up regime where gaps tend to run.
fn exhaustion_gap_fade_short(ctx: &ScoringContext) -> Option<SetupMatch> {
    if ctx.regime.regime == Regime::TrendingUp {
        return None;
    }
    let t = ctx.facts.technicals.as_ref()?;
    let q = &ctx.facts.quote;
    if q.prev_close <= 0.0 || q.open <= 0.0 {
        return None;
    }
    let gap_pct = (q.open - q.prev_close) / q.prev_close * 100.0;
    if gap_pct > 3.0 && t.rsi > 75.0 && t.rsi_slope < 0.0 {
        return setup(
            "exhaustion-gap-fade-short",
            SignalDirection::Bearish,
            ((gap_pct - 3.0) / 5.0 + 0.4).min(1.0),
            format!("gap +{gap_pct:.1}%, RSI {:.1} fading", t.rsi),
        );
    }
    None
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Technicals;
    use crate::regime::{RegimeDetector, RegimeState};
    use crate::state::{MarketFacts, TickerFacts};
    use crate::types::Session;

    fn regime_state() -> RegimeState {
        RegimeDetector::new().update(&MarketFacts::default(), Default::default())
    }

    fn run(facts: &TickerFacts) -> Vec<SetupMatch> {
        let market = MarketFacts::default();
        let regime = regime_state();
        let ctx = ScoringContext {
            ticker: "TEST",
            facts,
            market: &market,
            regime: &regime,
            session: Session::Midday,
            tick: None,
        };
        detect_setups(&ctx)
    }

    #[test]
    fn no_technicals_no_setups() {
        let facts = TickerFacts::default();
        assert!(run(&facts).is_empty());
    }

    #[test]
    fn volume_climax_reversal_matches() {
        let mut facts = TickerFacts::default();
        facts.quote.last = 100.0;
        facts.technicals = Some(Technicals {
            rsi: 22.0,
            bb_position: 0.08,
            volume_spike: true,
            bb_lower: 98.0,
            ..Default::default()
        });
        let matches = run(&facts);
        assert!(matches.iter().any(|m| m.name == "volume-climax-reversal-long"));
        let m = matches.iter().find(|m| m.name == "volume-climax-reversal-long").unwrap();
        assert_eq!(m.direction, SignalDirection::Bullish);
        // RSI 22 => strength 0.2*0.6 = 0.12; confidence floor lands low-60s.
        assert!(m.strength > 0.0 && m.strength < 0.5);
    }

    #[test]
    fn no_climax_without_volume() {
        let mut facts = TickerFacts::default();
        facts.quote.last = 100.0;
        facts.technicals = Some(Technicals {
            rsi: 22.0,
            bb_position: 0.08,
            volume_spike: false,
            ..Default::default()
        });
        assert!(!run(&facts).iter().any(|m| m.name == "volume-climax-reversal-long"));
    }

    #[test]
    fn squeeze_breakout_directions() {
        let mut facts = TickerFacts::default();
        facts.quote.last = 100.0;
        facts.technicals = Some(Technicals {
            rsi: 55.0,
            bb_squeezed: true,
            bb_position: 0.97,
            volume_spike: true,
            ..Default::default()
        });
        assert!(run(&facts).iter().any(|m| m.name == "bb-squeeze-breakout-long"));

        facts.technicals.as_mut().unwrap().bb_position = 0.02;
        assert!(run(&facts).iter().any(|m| m.name == "bb-squeeze-breakout-short"));
    }

    #[test]
    fn trend_pullback_long_matches() {
        let mut facts = TickerFacts::default();
        facts.quote.last = 100.0;
        facts.technicals = Some(Technicals {
            rsi: 45.0,
            ema_bias: SignalDirection::Bullish,
            ema9: 101.0,
            ema20: 100.2,
            ema50: 97.0,
            bb_position: 0.4,
            ..Default::default()
        });
        assert!(run(&facts).iter().any(|m| m.name == "ema-trend-pullback-long"));
    }

    #[test]
    fn gap_fade_respects_uptrend_regime() {
        let mut facts = TickerFacts::default();
        facts.quote.last = 108.0;
        facts.quote.open = 108.0;
        facts.quote.prev_close = 100.0;
        facts.technicals = Some(Technicals {
            rsi: 80.0,
            rsi_slope: -3.0,
            bb_position: 0.5,
            ..Default::default()
        });

        // Unknown regime: fade allowed.
        let matches = run(&facts);
        assert!(matches.iter().any(|m| m.name == "exhaustion-gap-fade-short"));
    }

    #[test]
    fn matches_sorted_strongest_first() {
        let mut facts = TickerFacts::default();
        facts.quote.last = 100.0;
        facts.technicals = Some(Technicals {
            rsi: 15.0,
            bb_position: 0.02,
            bb_lower: 101.0,
            volume_spike: true,
            patterns: vec![crate::indicators::patterns::PatternHit {
                name: "hammer".into(),
                direction: SignalDirection::Bullish,
                strength: 0.9,
            }],
            ..Default::default()
        });
        let matches = run(&facts);
        assert!(matches.len() >= 2);
        for pair in matches.windows(2) {
            assert!(pair[0].strength >= pair[1].strength);
        }
    }
}
