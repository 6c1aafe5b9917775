// =============================================================================
// Signal Engine — weighted accumulation under session, regime, and version
// =============================================================================
//
// Three layers compose into one SignalScore per ticker:
//
//   (a) weighted accumulation — every catalogue evaluator that fires pushes
//       weight onto the bull or bear side. Effective weight = version weight
//       (ticker override > horizon profile > base) × evaluator strength ×
//       session multiplier × regime dampening.
//   (b) setup overlay — a matched setup overrides the weighted direction and
//       lifts confidence to 60 + 30 × strength (+5 when the weighted side
//       agrees, capped at 95). No match caps weighted confidence at 55.
//   (c) feature vector — always emitted for the classifiers.
//
// Direction needs `bull > bear + 2` (or the mirror); the bearish threshold
// widens to 5 in a ranging tape. Shadow scores re-run the accumulation under
// every non-active weight set so version A/B comparison costs one pass per
// version, not a second engine.
// =============================================================================

use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use crate::signals::catalog::CATALOG;
use crate::signals::features;
use crate::signals::setups::detect_setups;
use crate::signals::versions::{SignalVersions, VersionDef};
use crate::signals::{
    ScoringContext, ShadowScore, SignalHit, SignalScore, MAX_CONFIDENCE, NO_SETUP_CONFIDENCE_CAP,
};
use crate::types::{Regime, Session, SignalDirection};

/// Trend-following bear signals that historically scored 0% in a ranging
/// tape. Attenuated hard when the regime says chop.
const RANGING_DAMPENED_BEARS: [&str; 3] = ["ema_alignment_bear", "macd_negative", "rsi_bearish"];

/// Mean-reversion signals that earn their keep in chop.
const MEAN_REVERSION_SIGNALS: [&str; 6] = [
    "bb_dip_buy",
    "bb_fade_sell",
    "rsi_oversold",
    "rsi_overbought",
    "nope_extreme",
    "max_pain_magnet",
];

pub struct SignalEngine {
    versions: RwLock<SignalVersions>,
}

/// Result of one accumulation pass under one weight set.
struct RawScore {
    hits: Vec<SignalHit>,
    bull: f64,
    bear: f64,
    direction: SignalDirection,
    weighted_confidence: u8,
}

impl SignalEngine {
    pub fn new(versions: SignalVersions) -> Self {
        Self {
            versions: RwLock::new(versions),
        }
    }

    /// Snapshot of the version registry (for the API and persistence).
    pub fn versions(&self) -> SignalVersions {
        self.versions.read().clone()
    }

    /// Mutate the version registry (weight absorption, version switch).
    pub fn with_versions_mut<F: FnOnce(&mut SignalVersions)>(&self, f: F) {
        f(&mut self.versions.write());
    }

    pub fn active_version_key(&self) -> String {
        self.versions.read().active_version.clone()
    }

    /// Score one ticker. Pure given the context — the wall clock only enters
    /// through `ctx.session` and the output timestamp.
    pub fn score(&self, ctx: &ScoringContext) -> SignalScore {
        let versions = self.versions.read();
        let active = versions.active();
        let profile = crate::session::horizon_for(ctx.session).profile_key();

        // ── (a) weighted accumulation under the active set ──────────────
        let raw = accumulate(ctx, active, profile);

        // ── (b) setup overlay ───────────────────────────────────────────
        let setups = detect_setups(ctx);
        let (direction, confidence) = match setups.first() {
            Some(best) => {
                let mut conf = (60.0 + 30.0 * best.strength).round() as i64;
                if raw.direction == best.direction {
                    conf += 5;
                }
                (best.direction, conf.clamp(0, MAX_CONFIDENCE as i64) as u8)
            }
            None => (
                raw.direction,
                raw.weighted_confidence.min(NO_SETUP_CONFIDENCE_CAP),
            ),
        };

        // ── (c) features ────────────────────────────────────────────────
        let feature_vec = features::extract(ctx);

        // ── shadow scores ───────────────────────────────────────────────
        let shadow_scores = versions
            .shadows()
            .map(|(key, def)| {
                let shadow = accumulate(ctx, def, profile);
                (
                    key.clone(),
                    ShadowScore {
                        direction: shadow.direction,
                        confidence: shadow.weighted_confidence.min(NO_SETUP_CONFIDENCE_CAP),
                        bull_weight: shadow.bull,
                        bear_weight: shadow.bear,
                    },
                )
            })
            .collect();

        debug!(
            ticker = ctx.ticker,
            direction = %direction,
            confidence,
            bull = format!("{:.2}", raw.bull),
            bear = format!("{:.2}", raw.bear),
            setups = setups.len(),
            "scored"
        );

        SignalScore {
            ticker: ctx.ticker.to_string(),
            direction,
            confidence,
            bull_weight: raw.bull,
            bear_weight: raw.bear,
            spread: (raw.bull - raw.bear).abs(),
            signals: raw.hits,
            features: feature_vec,
            shadow_scores,
            matched_setups: setups.iter().map(|s| s.name.clone()).collect(),
            session: ctx.session,
            signal_version: versions.active_version.clone(),
            at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Accumulation
// ---------------------------------------------------------------------------

fn accumulate(ctx: &ScoringContext, def: &VersionDef, profile: &str) -> RawScore {
    let mut hits = Vec::new();
    let mut bull = 0.0_f64;
    let mut bear = 0.0_f64;

    for signal in CATALOG {
        let Some(contribution) = (signal.eval)(ctx) else {
            continue;
        };

        if contribution.direction == SignalDirection::Neutral {
            hits.push(SignalHit {
                name: signal.name.to_string(),
                direction: SignalDirection::Neutral,
                weight: 0.0,
                detail: contribution.detail,
            });
            continue;
        }

        let base = def.weight_for(signal.name, ctx.ticker, profile);
        let effective = base
            * contribution.strength
            * session_multiplier(ctx.session, signal.name)
            * regime_multiplier(ctx, signal.name, contribution.direction);

        match contribution.direction {
            SignalDirection::Bullish => bull += effective,
            SignalDirection::Bearish => bear += effective,
            SignalDirection::Neutral => unreachable!(),
        }

        hits.push(SignalHit {
            name: signal.name.to_string(),
            direction: contribution.direction,
            weight: effective,
            detail: contribution.detail,
        });
    }

    let gating = def.gating();
    let bear_threshold = if ctx.regime.regime == Regime::Ranging {
        gating.ranging_bear_threshold
    } else {
        gating.bear_threshold
    };

    let direction = if bull > bear + gating.bull_threshold {
        SignalDirection::Bullish
    } else if bear > bull + bear_threshold {
        SignalDirection::Bearish
    } else {
        SignalDirection::Neutral
    };

    let spread = (bull - bear).abs();
    let weighted_confidence = (30.0 + spread * 4.0).round().clamp(0.0, MAX_CONFIDENCE as f64) as u8;

    RawScore {
        hits,
        bull,
        bear,
        direction,
        weighted_confidence,
    }
}

// ---------------------------------------------------------------------------
// Session multipliers
// ---------------------------------------------------------------------------

/// Per-session, per-signal constants. Tape and sweep signals matter most
/// when the tape is fast; mean reversion earns more in the midday drift;
/// earnings signals peak around the report windows; overnight everything
/// except catalysts is discounted.
fn session_multiplier(session: Session, name: &str) -> f64 {
    let is_tape = name.starts_with("tape_") || name.starts_with("sweep_") || name.starts_with("block_");
    let is_mean_reversion = MEAN_REVERSION_SIGNALS.contains(&name);
    let is_earnings = name.starts_with("earnings_");
    let is_dark_pool = name.starts_with("dark_pool_");

    match session {
        Session::OpenRush => {
            if is_tape {
                1.3
            } else if is_mean_reversion {
                0.8
            } else {
                1.0
            }
        }
        Session::PowerOpen => {
            if is_tape {
                1.2
            } else {
                1.0
            }
        }
        Session::Midday => {
            if is_mean_reversion {
                1.2
            } else if is_tape {
                0.9
            } else {
                1.0
            }
        }
        Session::PowerHour => {
            if is_tape || is_dark_pool {
                1.2
            } else {
                1.0
            }
        }
        Session::PreMarket | Session::AfterHours => {
            if is_earnings {
                1.3
            } else if is_tape {
                0.8
            } else {
                1.0
            }
        }
        Session::Overnight => {
            if is_earnings {
                1.0
            } else {
                0.7
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Regime dampening
// ---------------------------------------------------------------------------

fn regime_multiplier(ctx: &ScoringContext, name: &str, direction: SignalDirection) -> f64 {
    let mut mult = 1.0;

    if ctx.regime.regime == Regime::Ranging {
        if RANGING_DAMPENED_BEARS.contains(&name) {
            mult *= 0.3;
        }
        if MEAN_REVERSION_SIGNALS.contains(&name) {
            mult *= 1.3;
        }
        if direction == SignalDirection::Bearish && ctx.regime.adx < 18.0 {
            mult *= 0.75;
        }
    }

    mult
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Technicals;
    use crate::regime::{IndexTrend, RegimeDetector, RegimeState};
    use crate::state::{Candle, EarningsEnriched, MarketFacts, TickerFacts, Tide, VixState};

    fn ranging_regime() -> RegimeState {
        let mut market = MarketFacts::default();
        market.vix = Some(VixState { value: 14.0, change_pct: 0.0, spiking: false });
        market.breadth = Some(0.5);
        market.market_tide = Some(Tide::default());
        RegimeDetector::new().update(
            &market,
            IndexTrend { adx: 12.0, plus_di: 15.0, minus_di: 14.0 },
        )
    }

    fn unknown_regime() -> RegimeState {
        RegimeDetector::new().update(&MarketFacts::default(), IndexTrend::default())
    }

    fn engine() -> SignalEngine {
        SignalEngine::new(SignalVersions::default())
    }

    /// Oversold-reversal facts in a ranging tape — the canonical dip-buy.
    fn oversold_facts() -> TickerFacts {
        let mut facts = TickerFacts::default();
        facts.quote.last = 100.0;
        facts.quote.prev_close = 101.0;
        facts.technicals = Some(Technicals {
            rsi: 22.0,
            rsi_slope: -1.0,
            ema_bias: SignalDirection::Bearish,
            ema9: 99.0,
            ema20: 100.5,
            ema50: 103.0,
            // Histogram suppressed by the noise gate upstream.
            macd_histogram: None,
            macd: -0.3,
            macd_signal: -0.25,
            atr: 5.0,
            bb_position: 0.08,
            bb_upper: 108.0,
            bb_lower: 97.0,
            bb_bandwidth: 0.08,
            adx: 12.0,
            volume_spike: true,
            ..Default::default()
        });
        facts.candles.insert(
            "1d".to_string(),
            vec![Candle::new("2025-03-12", 99.0, 101.0, 97.5, 100.0, 5_000_000.0)],
        );
        facts
    }

    #[test]
    fn oversold_reversal_in_ranging_regime() {
        let eng = engine();
        let market = MarketFacts::default();
        let regime = ranging_regime();
        assert_eq!(regime.regime, Regime::Ranging);

        let facts = oversold_facts();
        let ctx = ScoringContext {
            ticker: "XYZ",
            facts: &facts,
            market: &market,
            regime: &regime,
            session: Session::Midday,
            tick: None,
        };
        let score = eng.score(&ctx);

        // Oversold + dip-buy fired on the bull side.
        assert!(score.signals.iter().any(|s| s.name == "rsi_oversold"));
        assert!(score.signals.iter().any(|s| s.name == "bb_dip_buy"));
        // MACD-negative never fired (noise-gated histogram).
        assert!(!score.signals.iter().any(|s| s.name == "macd_negative"));
        // EMA bear alignment fired but heavily dampened.
        let ema_bear = score.signals.iter().find(|s| s.name == "ema_alignment_bear").unwrap();
        let base = 2.5 * 0.9; // base weight x evaluator strength
        assert!(ema_bear.weight < base * 0.4, "expected dampened bear, got {}", ema_bear.weight);

        assert_eq!(score.direction, SignalDirection::Bullish);
        assert!(
            (55..=70).contains(&score.confidence),
            "confidence {} outside [55, 70]",
            score.confidence
        );
        assert!(score.matched_setups.contains(&"volume-climax-reversal-long".to_string()));
    }

    #[test]
    fn earnings_beat_gap_up_fires_full_weight() {
        let eng = engine();
        let market = MarketFacts::default();
        let regime = unknown_regime();

        let mut facts = TickerFacts::default();
        facts.quote.last = 105.0;
        facts.fundamentals.earnings = Some(EarningsEnriched {
            beat: Some("BEAT".to_string()),
            surprise_pct: Some(12.4),
            afterhours_change: Some(5.1),
        });

        let ctx = ScoringContext {
            ticker: "XYZ",
            facts: &facts,
            market: &market,
            regime: &regime,
            session: Session::AfterHours,
            tick: None,
        };
        let score = eng.score(&ctx);

        let hit = score.signals.iter().find(|s| s.name == "earnings_beat_gap_up").unwrap();
        assert_eq!(hit.direction, SignalDirection::Bullish);
        // Full evaluator strength, earnings session boost on top of base 3.0.
        assert!(hit.weight >= 3.0, "expected full weight, got {}", hit.weight);
    }

    #[test]
    fn neutral_when_spread_below_threshold() {
        let eng = engine();
        let market = MarketFacts::default();
        let regime = unknown_regime();
        let facts = TickerFacts::default();

        let ctx = ScoringContext {
            ticker: "XYZ",
            facts: &facts,
            market: &market,
            regime: &regime,
            session: Session::Midday,
            tick: None,
        };
        let score = eng.score(&ctx);
        assert_eq!(score.direction, SignalDirection::Neutral);
        assert!(score.spread < 2.0);
    }

    #[test]
    fn ranging_bearish_threshold_widens() {
        // A bear spread of ~3 clears the default threshold (2) but not the
        // ranging one (5).
        let eng = engine();
        let market = MarketFacts::default();

        let mut facts = TickerFacts::default();
        facts.quote.last = 100.0;
        facts.technicals = Some(Technicals {
            rsi: 55.0,
            ema_bias: SignalDirection::Bearish,
            bb_position: 0.5,
            atr: 2.0,
            adx: 22.0,
            ..Default::default()
        });

        let ranging = ranging_regime();
        let ctx = ScoringContext {
            ticker: "XYZ",
            facts: &facts,
            market: &market,
            regime: &ranging,
            session: Session::Midday,
            tick: None,
        };
        let score = eng.score(&ctx);
        assert_eq!(score.direction, SignalDirection::Neutral);

        let unknown = unknown_regime();
        let ctx = ScoringContext {
            ticker: "XYZ",
            facts: &facts,
            market: &market,
            regime: &unknown,
            session: Session::Midday,
            tick: None,
        };
        let score = eng.score(&ctx);
        // Outside ranging, nothing is dampened: 2.5 * 0.9 = 2.25 > 2.
        assert_eq!(score.direction, SignalDirection::Bearish);
    }

    #[test]
    fn confidence_capped_without_setup() {
        let eng = engine();
        let market = MarketFacts::default();
        let regime = unknown_regime();

        // Pile on bullish evidence without matching any setup.
        let mut facts = TickerFacts::default();
        facts.quote.last = 100.0;
        facts.quote.prev_close = 99.0;
        facts.technicals = Some(Technicals {
            rsi: 60.0,
            ema_bias: SignalDirection::Bullish,
            ema9: 101.0,
            ema20: 99.5,
            ema50: 97.0,
            macd_histogram: Some(0.5),
            macd_slope: 0.2,
            atr: 2.0,
            bb_position: 0.6,
            adx: 30.0,
            plus_di: 28.0,
            minus_di: 10.0,
            ..Default::default()
        });
        facts.dark_pool.aggressor_score = 0.8;
        facts.dark_pool.updated_at = Some(Utc::now());
        facts.options.net_premium = Some(crate::state::NetPremium {
            call_premium: 9_000_000.0,
            put_premium: 1_000_000.0,
            call_volume: 0.0,
            put_volume: 0.0,
        });

        let ctx = ScoringContext {
            ticker: "XYZ",
            facts: &facts,
            market: &market,
            regime: &regime,
            session: Session::Midday,
            tick: None,
        };
        let score = eng.score(&ctx);
        assert_eq!(score.direction, SignalDirection::Bullish);
        assert!(score.matched_setups.is_empty());
        assert!(score.confidence <= NO_SETUP_CONFIDENCE_CAP);
    }

    #[test]
    fn confidence_never_exceeds_95() {
        assert!(MAX_CONFIDENCE == 95);
        let eng = engine();
        let market = MarketFacts::default();
        let regime = unknown_regime();
        let facts = oversold_facts();
        let ctx = ScoringContext {
            ticker: "XYZ",
            facts: &facts,
            market: &market,
            regime: &regime,
            session: Session::Midday,
            tick: None,
        };
        assert!(eng.score(&ctx).confidence <= 95);
    }

    #[test]
    fn shadow_scores_published_per_version() {
        let eng = engine();
        let market = MarketFacts::default();
        let regime = unknown_regime();
        let facts = oversold_facts();
        let ctx = ScoringContext {
            ticker: "XYZ",
            facts: &facts,
            market: &market,
            regime: &regime,
            session: Session::Midday,
            tick: None,
        };
        let score = eng.score(&ctx);
        assert!(score.shadow_scores.contains_key("v2-legacy"));
        assert!(!score.shadow_scores.contains_key("v3"));
    }

    #[test]
    fn scoring_is_idempotent() {
        let eng = engine();
        let market = MarketFacts::default();
        let regime = ranging_regime();
        let facts = oversold_facts();
        let ctx = ScoringContext {
            ticker: "XYZ",
            facts: &facts,
            market: &market,
            regime: &regime,
            session: Session::Midday,
            tick: None,
        };
        let a = eng.score(&ctx);
        let b = eng.score(&ctx);
        assert_eq!(a.direction, b.direction);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.bull_weight, b.bull_weight);
        assert_eq!(a.features, b.features);
    }

    #[test]
    fn signals_in_catalogue_order() {
        let eng = engine();
        let market = MarketFacts::default();
        let regime = unknown_regime();
        let facts = oversold_facts();
        let ctx = ScoringContext {
            ticker: "XYZ",
            facts: &facts,
            market: &market,
            regime: &regime,
            session: Session::Midday,
            tick: None,
        };
        let score = eng.score(&ctx);

        let order: Vec<usize> = score
            .signals
            .iter()
            .map(|h| CATALOG.iter().position(|d| d.name == h.name).unwrap())
            .collect();
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(order, sorted, "hits must follow catalogue order");
    }

    #[test]
    fn features_always_25() {
        let eng = engine();
        let market = MarketFacts::default();
        let regime = unknown_regime();
        let facts = TickerFacts::default();
        let ctx = ScoringContext {
            ticker: "XYZ",
            facts: &facts,
            market: &market,
            regime: &regime,
            session: Session::Midday,
            tick: None,
        };
        assert_eq!(eng.score(&ctx).features.len(), 25);
    }
}
