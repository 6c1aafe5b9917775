// =============================================================================
// Feature vector — the 25 numbers every score hands to the classifiers
// =============================================================================
//
// The vector is a plain `Vec<f64>` with a fixed layout so the ML side needs
// no type dependency on the engine. Order is load-bearing: the classifiers'
// weight indices and the suggested-weight surface both key on FEATURE_NAMES.
//
// Values are pre-scaled into roughly [-1, 1] so no separate normalisation
// pass is needed at training time.
// =============================================================================

use crate::signals::ScoringContext;
use crate::types::{Regime, SignalDirection};

/// Names for each feature index, in vector order.
pub const FEATURE_NAMES: [&str; 25] = [
    "rsi",
    "macd_histogram",
    "ema_alignment",
    "bb_position",
    "atr_pct",
    "call_put_premium_ratio",
    "dark_pool_aggressor",
    "iv_rank",
    "short_interest_pct",
    "volume_spike",
    "bb_bandwidth",
    "vwap_deviation_pct",
    "regime_score",
    "gamma_wall_proximity",
    "iv_skew",
    "candle_pattern_score",
    "news_sentiment",
    "adx",
    "rsi_divergence_score",
    "fib_proximity",
    "rsi_slope",
    "macd_acceleration",
    "atr_change",
    "rsi_ema_interaction",
    "volume_macd_interaction",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// Extract the full vector. Missing inputs contribute 0.0 — the classifiers
/// learn around absent data instead of refusing to predict.
pub fn extract(ctx: &ScoringContext) -> Vec<f64> {
    let ta = ctx.facts.technicals.as_ref();
    let price = ctx.facts.quote.last;

    let rsi = ta.map(|t| t.rsi / 100.0).unwrap_or(0.5);

    let macd_hist = ta
        .and_then(|t| {
            t.macd_histogram
                .map(|h| (h / (0.05 * t.atr.max(1e-9))).clamp(-1.0, 1.0))
        })
        .unwrap_or(0.0);

    let ema_alignment = ta
        .map(|t| match t.ema_bias {
            SignalDirection::Bullish => 1.0,
            SignalDirection::Bearish => -1.0,
            SignalDirection::Neutral => 0.0,
        })
        .unwrap_or(0.0);

    let bb_position = ta.map(|t| t.bb_position).unwrap_or(0.5);

    let atr_pct = ta
        .map(|t| if price > 0.0 { (t.atr / price).min(0.2) * 5.0 } else { 0.0 })
        .unwrap_or(0.0);

    let premium_ratio = ctx
        .facts
        .options
        .net_premium
        .as_ref()
        .and_then(|np| np.premium_ratio())
        .map(|r| (r.ln()).clamp(-2.0, 2.0) / 2.0)
        .unwrap_or(0.0);

    let dark_pool = if ctx.facts.dark_pool.updated_at.is_some() {
        ctx.facts.dark_pool.aggressor_score.clamp(-1.0, 1.0)
    } else {
        0.0
    };

    let iv_rank = ctx.facts.options.iv_rank.map(|r| r / 100.0).unwrap_or(0.0);

    let si = ctx
        .facts
        .fundamentals
        .short_interest_pct
        .filter(|&s| (0.0..=100.0).contains(&s))
        .map(|s| s / 100.0)
        .unwrap_or(0.0);

    let volume_spike = ta.map(|t| if t.volume_spike { 1.0 } else { 0.0 }).unwrap_or(0.0);

    let bandwidth = ta.map(|t| t.bb_bandwidth.min(0.5) * 2.0).unwrap_or(0.0);

    let vwap_dev = ta
        .map(|t| {
            if t.vwap > 0.0 && price > 0.0 {
                ((price - t.vwap) / t.vwap * 100.0).clamp(-5.0, 5.0) / 5.0
            } else {
                0.0
            }
        })
        .unwrap_or(0.0);

    let regime_score = match ctx.regime.regime {
        Regime::TrendingUp => 1.0,
        Regime::TrendingDown => -1.0,
        Regime::Ranging => 0.0,
        Regime::Volatile => 0.5,
        Regime::Unknown => 0.0,
    };

    let gamma_wall = gamma_wall_proximity(ctx, price);

    let iv_skew = ctx
        .facts
        .options
        .iv_skew
        .map(|s| (s / 8.0).clamp(-1.0, 1.0))
        .unwrap_or(0.0);

    let pattern_score = ta
        .map(|t| {
            t.patterns
                .iter()
                .map(|p| match p.direction {
                    SignalDirection::Bullish => p.strength,
                    SignalDirection::Bearish => -p.strength,
                    SignalDirection::Neutral => 0.0,
                })
                .sum::<f64>()
                .clamp(-1.0, 1.0)
        })
        .unwrap_or(0.0);

    let news = {
        let scores: Vec<f64> = ctx
            .market
            .news
            .iter()
            .filter(|n| n.ticker.as_deref() == Some(ctx.ticker))
            .map(|n| n.sentiment)
            .collect();
        if scores.is_empty() {
            0.0
        } else {
            (scores.iter().sum::<f64>() / scores.len() as f64).clamp(-1.0, 1.0)
        }
    };

    let adx = ta.map(|t| (t.adx / 50.0).min(1.0)).unwrap_or(0.0);

    let divergence_score = ta
        .map(|t| {
            t.divergences
                .iter()
                .map(|d| {
                    let signed = d.strength * d.kind.weight_factor();
                    if d.kind.is_bullish() { signed } else { -signed }
                })
                .sum::<f64>()
                .clamp(-1.0, 1.0)
        })
        .unwrap_or(0.0);

    let fib_proximity = ta
        .and_then(|t| t.fib.as_ref())
        .map(|fib| {
            let nearest = fib
                .retracements
                .iter()
                .map(|l| {
                    if price > 0.0 {
                        (price - l.price).abs() / price
                    } else {
                        1.0
                    }
                })
                .fold(1.0_f64, f64::min);
            (1.0 - (nearest / 0.02).min(1.0)).clamp(0.0, 1.0)
        })
        .unwrap_or(0.0);

    let rsi_slope = ta.map(|t| (t.rsi_slope / 15.0).clamp(-1.0, 1.0)).unwrap_or(0.0);

    let macd_accel = ta
        .map(|t| (t.macd_slope / (0.05 * t.atr.max(1e-9))).clamp(-1.0, 1.0))
        .unwrap_or(0.0);

    let atr_change = ta.map(|t| (t.atr_change_pct / 50.0).clamp(-1.0, 1.0)).unwrap_or(0.0);

    // Interaction terms — let a linear model see momentum-in-trend and
    // conviction-volume compounds.
    let rsi_ema = (rsi - 0.5) * 2.0 * ema_alignment;
    let volume_macd = volume_spike * macd_hist;

    vec![
        rsi,
        macd_hist,
        ema_alignment,
        bb_position,
        atr_pct,
        premium_ratio,
        dark_pool,
        iv_rank,
        si,
        volume_spike,
        bandwidth,
        vwap_dev,
        regime_score,
        gamma_wall,
        iv_skew,
        pattern_score,
        news,
        adx,
        divergence_score,
        fib_proximity,
        rsi_slope,
        macd_accel,
        atr_change,
        rsi_ema,
        volume_macd,
    ]
}

/// Signed proximity to the largest gamma wall: +1 when a support wall sits
/// right under price, -1 when a ceiling sits right above, 0 when no wall is
/// within 3%.
fn gamma_wall_proximity(ctx: &ScoringContext, price: f64) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    let wall = ctx
        .facts
        .options
        .gex_per_strike
        .iter()
        .filter(|g| g.gamma_exposure > 0.0)
        .max_by(|a, b| {
            a.gamma_exposure
                .partial_cmp(&b.gamma_exposure)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

    let Some(wall) = wall else { return 0.0 };
    let dist = (price - wall.strike).abs() / price;
    if dist > 0.03 {
        return 0.0;
    }
    let closeness = 1.0 - dist / 0.03;
    if wall.strike <= price { closeness } else { -closeness }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::RegimeDetector;
    use crate::state::{MarketFacts, TickerFacts};
    use crate::types::Session;

    fn empty_ctx_score(facts: &TickerFacts, market: &MarketFacts) -> Vec<f64> {
        let detector = RegimeDetector::new();
        let regime = detector.update(market, Default::default());
        let ctx = ScoringContext {
            ticker: "TEST",
            facts,
            market,
            regime: &regime,
            session: Session::Midday,
            tick: None,
        };
        extract(&ctx)
    }

    #[test]
    fn vector_is_always_25_wide() {
        let facts = TickerFacts::default();
        let market = MarketFacts::default();
        let v = empty_ctx_score(&facts, &market);
        assert_eq!(v.len(), FEATURE_COUNT);
        assert_eq!(FEATURE_NAMES.len(), FEATURE_COUNT);
    }

    #[test]
    fn empty_facts_yield_finite_defaults() {
        let facts = TickerFacts::default();
        let market = MarketFacts::default();
        for (i, v) in empty_ctx_score(&facts, &market).iter().enumerate() {
            assert!(v.is_finite(), "feature {} not finite", FEATURE_NAMES[i]);
            assert!((-1.0..=1.0).contains(v), "feature {} = {v} out of range", FEATURE_NAMES[i]);
        }
    }

    #[test]
    fn implausible_short_interest_zeroed() {
        let mut facts = TickerFacts::default();
        facts.fundamentals.short_interest_pct = Some(140.0);
        let market = MarketFacts::default();
        let v = empty_ctx_score(&facts, &market);
        let idx = FEATURE_NAMES.iter().position(|&n| n == "short_interest_pct").unwrap();
        assert_eq!(v[idx], 0.0);
    }

    #[test]
    fn premium_ratio_log_scaled() {
        let mut facts = TickerFacts::default();
        facts.options.net_premium = Some(crate::state::NetPremium {
            call_premium: 4_000_000.0,
            put_premium: 1_000_000.0,
            call_volume: 0.0,
            put_volume: 0.0,
        });
        let market = MarketFacts::default();
        let v = empty_ctx_score(&facts, &market);
        let idx = FEATURE_NAMES.iter().position(|&n| n == "call_put_premium_ratio").unwrap();
        assert!(v[idx] > 0.0);
        assert!(v[idx] <= 1.0);
    }

    #[test]
    fn gamma_wall_sign() {
        let mut facts = TickerFacts::default();
        facts.quote.last = 100.0;
        facts.options.gex_per_strike = vec![crate::state::GexStrike {
            strike: 99.0,
            gamma_exposure: 1e9,
        }];
        let market = MarketFacts::default();
        let v = empty_ctx_score(&facts, &market);
        let idx = FEATURE_NAMES.iter().position(|&n| n == "gamma_wall_proximity").unwrap();
        assert!(v[idx] > 0.0, "wall below price should read positive");

        facts.options.gex_per_strike[0].strike = 101.0;
        let v = empty_ctx_score(&facts, &market);
        assert!(v[idx] < 0.0, "wall above price should read negative");
    }

    #[test]
    fn determinism() {
        let facts = TickerFacts::default();
        let market = MarketFacts::default();
        assert_eq!(empty_ctx_score(&facts, &market), empty_ctx_score(&facts, &market));
    }
}
