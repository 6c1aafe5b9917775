// =============================================================================
// Signal catalogue — every indicator the engine can fire
// =============================================================================
//
// Each entry is a pure evaluator `fn(&ScoringContext) -> Option<Contribution>`
// over the shared context. `None` means the signal has nothing to say (data
// missing or condition not met). A `Neutral` direction marks an informational
// entry: it appears in the published signal list but contributes no weight.
//
// The engine walks CATALOG in order, so the published `signals` list is
// stable across runs given identical inputs. Weights are NOT applied here —
// an evaluator returns a strength in [0, 1] and the engine multiplies in the
// version weight, session multiplier, and regime dampening.
// =============================================================================

use crate::analyzer::Technicals;
use crate::signals::{Contribution, ScoringContext};
use crate::types::{Regime, SignalDirection};

pub type EvalFn = fn(&ScoringContext) -> Option<Contribution>;

pub struct SignalDef {
    pub name: &'static str,
    pub eval: EvalFn,
}

/// The full catalogue, in evaluation order.
pub const CATALOG: &[SignalDef] = &[
    // ── Momentum / trend ────────────────────────────────────────────────
    SignalDef { name: "rsi_oversold", eval: rsi_oversold },
    SignalDef { name: "rsi_overbought", eval: rsi_overbought },
    SignalDef { name: "rsi_continuation", eval: rsi_continuation },
    SignalDef { name: "rsi_bearish", eval: rsi_bearish },
    SignalDef { name: "ema_alignment_bull", eval: ema_alignment_bull },
    SignalDef { name: "ema_alignment_bear", eval: ema_alignment_bear },
    SignalDef { name: "macd_positive", eval: macd_positive },
    SignalDef { name: "macd_negative", eval: macd_negative },
    SignalDef { name: "macd_momentum_bull", eval: macd_momentum_bull },
    SignalDef { name: "macd_momentum_bear", eval: macd_momentum_bear },
    SignalDef { name: "bb_dip_buy", eval: bb_dip_buy },
    SignalDef { name: "bb_fade_sell", eval: bb_fade_sell },
    SignalDef { name: "bb_squeeze", eval: bb_squeeze },
    SignalDef { name: "adx_trend_confirm", eval: adx_trend_confirm },
    SignalDef { name: "adx_chop", eval: adx_chop },
    SignalDef { name: "pattern_bull", eval: pattern_bull },
    SignalDef { name: "pattern_bear", eval: pattern_bear },
    SignalDef { name: "divergence_bull", eval: divergence_bull },
    SignalDef { name: "divergence_bear", eval: divergence_bear },
    SignalDef { name: "vwap_reclaim", eval: vwap_reclaim },
    SignalDef { name: "vwap_lost", eval: vwap_lost },
    SignalDef { name: "fib_golden_pocket", eval: fib_golden_pocket },
    SignalDef { name: "pivot_support", eval: pivot_support },
    SignalDef { name: "pivot_resistance", eval: pivot_resistance },
    SignalDef { name: "volume_climax_bull", eval: volume_climax_bull },
    SignalDef { name: "volume_climax_bear", eval: volume_climax_bear },
    SignalDef { name: "atr_expansion", eval: atr_expansion },
    // ── Options flow ────────────────────────────────────────────────────
    SignalDef { name: "call_premium_dominant", eval: call_premium_dominant },
    SignalDef { name: "put_premium_dominant", eval: put_premium_dominant },
    SignalDef { name: "sweep_aggression_bull", eval: sweep_aggression_bull },
    SignalDef { name: "sweep_aggression_bear", eval: sweep_aggression_bear },
    SignalDef { name: "nope_extreme", eval: nope_extreme },
    SignalDef { name: "gamma_pin", eval: gamma_pin },
    SignalDef { name: "max_pain_magnet", eval: max_pain_magnet },
    SignalDef { name: "gex_wall_support", eval: gex_wall_support },
    SignalDef { name: "gex_wall_ceiling", eval: gex_wall_ceiling },
    SignalDef { name: "oi_call_build", eval: oi_call_build },
    SignalDef { name: "oi_put_build", eval: oi_put_build },
    SignalDef { name: "iv_skew_lean", eval: iv_skew_lean },
    SignalDef { name: "iv_contango", eval: iv_contango },
    SignalDef { name: "iv_backwardation", eval: iv_backwardation },
    // ── Dark pool & tape ────────────────────────────────────────────────
    SignalDef { name: "dark_pool_accumulation", eval: dark_pool_accumulation },
    SignalDef { name: "dark_pool_distribution", eval: dark_pool_distribution },
    SignalDef { name: "tape_imbalance_bull", eval: tape_imbalance_bull },
    SignalDef { name: "tape_imbalance_bear", eval: tape_imbalance_bear },
    SignalDef { name: "block_trades_bull", eval: block_trades_bull },
    SignalDef { name: "block_trades_bear", eval: block_trades_bear },
    // ── Positioning / catalysts / context ───────────────────────────────
    SignalDef { name: "short_squeeze_setup", eval: short_squeeze_setup },
    SignalDef { name: "short_interest_implausible", eval: short_interest_implausible },
    SignalDef { name: "insider_buying", eval: insider_buying },
    SignalDef { name: "insider_selling", eval: insider_selling },
    SignalDef { name: "earnings_beat_gap_up", eval: earnings_beat_gap_up },
    SignalDef { name: "earnings_miss_gap_down", eval: earnings_miss_gap_down },
    SignalDef { name: "earnings_event_risk", eval: earnings_event_risk },
    SignalDef { name: "news_sentiment_bull", eval: news_sentiment_bull },
    SignalDef { name: "news_sentiment_bear", eval: news_sentiment_bear },
    SignalDef { name: "market_tide_bull", eval: market_tide_bull },
    SignalDef { name: "market_tide_bear", eval: market_tide_bear },
    SignalDef { name: "congress_buying", eval: congress_buying },
    SignalDef { name: "vix_fear_extreme", eval: vix_fear_extreme },
];

// ---------------------------------------------------------------------------
// Construction helpers
// ---------------------------------------------------------------------------

fn bull(strength: f64, detail: String) -> Option<Contribution> {
    Some(Contribution {
        direction: SignalDirection::Bullish,
        strength: strength.clamp(0.0, 1.0),
        detail,
    })
}

fn bear(strength: f64, detail: String) -> Option<Contribution> {
    Some(Contribution {
        direction: SignalDirection::Bearish,
        strength: strength.clamp(0.0, 1.0),
        detail,
    })
}

fn info(detail: String) -> Option<Contribution> {
    Some(Contribution {
        direction: SignalDirection::Neutral,
        strength: 0.0,
        detail,
    })
}

fn ta<'a>(ctx: &'a ScoringContext) -> Option<&'a Technicals> {
    ctx.facts.technicals.as_ref()
}

fn last_price(ctx: &ScoringContext) -> Option<f64> {
    let p = ctx.facts.quote.last;
    (p > 0.0).then_some(p)
}

/// Fractional distance of `price` from `level`.
fn dist_pct(price: f64, level: f64) -> f64 {
    if price <= 0.0 {
        return f64::MAX;
    }
    (price - level).abs() / price
}

// ---------------------------------------------------------------------------
// Momentum / trend
// ---------------------------------------------------------------------------

fn rsi_oversold(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    // In a downtrend a washed-out RSI is continuation, not a dip to buy.
    if t.rsi >= 30.0 || ctx.regime.regime == Regime::TrendingDown {
        return None;
    }
    bull((30.0 - t.rsi) / 30.0 + 0.5, format!("RSI {:.1} oversold", t.rsi))
}

fn rsi_overbought(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    if t.rsi <= 70.0 || ctx.regime.regime == Regime::TrendingUp {
        return None;
    }
    bear((t.rsi - 70.0) / 30.0 + 0.5, format!("RSI {:.1} overbought", t.rsi))
}

fn rsi_continuation(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    match ctx.regime.regime {
        Regime::TrendingUp if t.rsi > 70.0 => bull(
            0.7,
            format!("RSI {:.1} strong in uptrend — continuation", t.rsi),
        ),
        Regime::TrendingDown if t.rsi < 30.0 => bear(
            0.7,
            format!("RSI {:.1} weak in downtrend — continuation", t.rsi),
        ),
        _ => None,
    }
}

fn rsi_bearish(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    if (45.0..=70.0).contains(&t.rsi) && t.rsi_slope < -5.0 {
        return bear(
            (-t.rsi_slope / 15.0).min(1.0),
            format!("RSI {:.1} rolling over ({:+.1})", t.rsi, t.rsi_slope),
        );
    }
    None
}

fn ema_alignment_bull(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    if t.ema_bias != SignalDirection::Bullish {
        return None;
    }
    bull(0.9, format!("EMA stack 9>{:.2} 20>{:.2} 50>{:.2}", t.ema9, t.ema20, t.ema50))
}

fn ema_alignment_bear(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    if t.ema_bias != SignalDirection::Bearish {
        return None;
    }
    bear(0.9, "EMA stack fully inverted".to_string())
}

fn macd_positive(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    let h = t.macd_histogram?;
    if h <= 0.0 {
        return None;
    }
    bull((h / (0.05 * t.atr.max(1e-9))).min(1.0), format!("MACD hist {h:+.3}"))
}

fn macd_negative(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    let h = t.macd_histogram?;
    if h >= 0.0 {
        return None;
    }
    bear((-h / (0.05 * t.atr.max(1e-9))).min(1.0), format!("MACD hist {h:+.3}"))
}

fn macd_momentum_bull(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    if t.macd_histogram.is_none() || t.macd_slope <= 0.0 {
        return None;
    }
    bull(
        (t.macd_slope / (0.05 * t.atr.max(1e-9))).min(1.0),
        format!("MACD momentum building {:+.3}", t.macd_slope),
    )
}

fn macd_momentum_bear(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    if t.macd_histogram.is_none() || t.macd_slope >= 0.0 {
        return None;
    }
    bear(
        (-t.macd_slope / (0.05 * t.atr.max(1e-9))).min(1.0),
        format!("MACD momentum fading {:+.3}", t.macd_slope),
    )
}

fn bb_dip_buy(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    if t.bb_position >= 0.15 {
        return None;
    }
    let strength = (0.15 - t.bb_position) / 0.15 * if t.volume_spike { 1.0 } else { 0.7 };
    let tag = if t.volume_spike { " (vol)" } else { "" };
    bull(strength, format!("BB position {:.2} at lower band{tag}", t.bb_position))
}

fn bb_fade_sell(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    if t.bb_position <= 0.85 {
        return None;
    }
    let strength = (t.bb_position - 0.85) / 0.15 * if t.volume_spike { 1.0 } else { 0.7 };
    bear(strength, format!("BB position {:.2} at upper band", t.bb_position))
}

fn bb_squeeze(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    if !t.bb_squeezed {
        return None;
    }
    info(format!("BB bandwidth {:.4} compressed — breakout pending", t.bb_bandwidth))
}

fn adx_trend_confirm(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    if t.adx <= 25.0 {
        return None;
    }
    let strength = ((t.adx - 25.0) / 25.0).min(1.0);
    if t.plus_di > t.minus_di {
        bull(strength, format!("ADX {:.1} with +DI dominant", t.adx))
    } else {
        bear(strength, format!("ADX {:.1} with -DI dominant", t.adx))
    }
}

fn adx_chop(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    if t.adx >= 18.0 || t.adx <= 0.0 {
        return None;
    }
    info(format!("ADX {:.1} — no trend, fade extremes", t.adx))
}

fn pattern_bull(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    let hit = t
        .patterns
        .iter()
        .find(|p| p.direction == SignalDirection::Bullish)?;
    bull(hit.strength, format!("{} ({:.2})", hit.name, hit.strength))
}

fn pattern_bear(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    let hit = t
        .patterns
        .iter()
        .find(|p| p.direction == SignalDirection::Bearish)?;
    bear(hit.strength, format!("{} ({:.2})", hit.name, hit.strength))
}

fn divergence_bull(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    let d = t.divergences.iter().find(|d| d.kind.is_bullish())?;
    bull(d.strength * d.kind.weight_factor(), format!("{}: {}", d.kind, d.detail))
}

fn divergence_bear(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    let d = t.divergences.iter().find(|d| !d.kind.is_bullish())?;
    bear(d.strength * d.kind.weight_factor(), format!("{}: {}", d.kind, d.detail))
}

fn vwap_reclaim(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    let price = last_price(ctx)?;
    let prev = ctx.facts.quote.prev_close;
    if t.vwap <= 0.0 || prev <= 0.0 || price <= t.vwap || prev >= t.vwap {
        return None;
    }
    bull(0.8, format!("price {price:.2} reclaimed VWAP {:.2}", t.vwap))
}

fn vwap_lost(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    let price = last_price(ctx)?;
    let prev = ctx.facts.quote.prev_close;
    if t.vwap <= 0.0 || prev <= 0.0 || price >= t.vwap || prev <= t.vwap {
        return None;
    }
    bear(0.8, format!("price {price:.2} lost VWAP {:.2}", t.vwap))
}

fn fib_golden_pocket(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    let fib = t.fib.as_ref()?;
    if !fib.leg_up {
        return None;
    }
    let price = last_price(ctx)?;
    let golden = fib.retracements.iter().find(|l| l.name == "fib_0.618")?;
    if dist_pct(price, golden.price) > 0.005 {
        return None;
    }
    bull(0.8, format!("price {price:.2} in golden pocket {:.2}", golden.price))
}

fn pivot_support(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    let pivots = t.pivots.as_ref()?;
    let price = last_price(ctx)?;
    for (name, level) in [("S1", pivots.s1), ("S2", pivots.s2)] {
        if price >= level && dist_pct(price, level) < 0.003 {
            return bull(0.7, format!("holding pivot {name} {level:.2}"));
        }
    }
    None
}

fn pivot_resistance(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    let pivots = t.pivots.as_ref()?;
    let price = last_price(ctx)?;
    for (name, level) in [("R1", pivots.r1), ("R2", pivots.r2)] {
        if price <= level && dist_pct(price, level) < 0.003 {
            return bear(0.7, format!("stalling at pivot {name} {level:.2}"));
        }
    }
    None
}

fn volume_climax_bull(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    if !(t.volume_spike && t.bb_position < 0.3) {
        return None;
    }
    let last_bullish = ctx
        .facts
        .candles
        .get("1d")
        .and_then(|c| c.last())
        .map(|c| c.is_bullish())
        .unwrap_or(false);
    if !last_bullish {
        return None;
    }
    bull(0.9, "climactic volume at lows with bullish close".to_string())
}

fn volume_climax_bear(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    if !(t.volume_spike && t.bb_position > 0.7) {
        return None;
    }
    let last_bearish = ctx
        .facts
        .candles
        .get("1d")
        .and_then(|c| c.last())
        .map(|c| !c.is_bullish())
        .unwrap_or(false);
    if !last_bearish {
        return None;
    }
    bear(0.9, "climactic volume at highs with bearish close".to_string())
}

fn atr_expansion(ctx: &ScoringContext) -> Option<Contribution> {
    let t = ta(ctx)?;
    if t.atr_change_pct <= 25.0 {
        return None;
    }
    info(format!("ATR expanding {:+.0}% — widen stops", t.atr_change_pct))
}

// ---------------------------------------------------------------------------
// Options flow
// ---------------------------------------------------------------------------

fn call_premium_dominant(ctx: &ScoringContext) -> Option<Contribution> {
    let ratio = ctx.facts.options.net_premium.as_ref()?.premium_ratio()?;
    if ratio <= 1.5 {
        return None;
    }
    bull(((ratio - 1.5) / 2.0).min(1.0), format!("call/put premium {ratio:.2}"))
}

fn put_premium_dominant(ctx: &ScoringContext) -> Option<Contribution> {
    let ratio = ctx.facts.options.net_premium.as_ref()?.premium_ratio()?;
    if ratio >= 0.67 {
        return None;
    }
    bear(((0.67 - ratio) / 0.5).min(1.0), format!("call/put premium {ratio:.2}"))
}

fn sweep_aggression_bull(ctx: &ScoringContext) -> Option<Contribution> {
    let sweeps = ctx
        .facts
        .options
        .flow_alerts
        .iter()
        .filter(|a| a.is_sweep && a.side == "call")
        .count();
    if sweeps < 3 {
        return None;
    }
    bull((sweeps as f64 / 8.0).min(1.0), format!("{sweeps} call sweeps"))
}

fn sweep_aggression_bear(ctx: &ScoringContext) -> Option<Contribution> {
    let sweeps = ctx
        .facts
        .options
        .flow_alerts
        .iter()
        .filter(|a| a.is_sweep && a.side == "put")
        .count();
    if sweeps < 3 {
        return None;
    }
    bear((sweeps as f64 / 8.0).min(1.0), format!("{sweeps} put sweeps"))
}

fn nope_extreme(ctx: &ScoringContext) -> Option<Contribution> {
    let nope = ctx.facts.options.nope?;
    // Extreme option-driven pressure tends to mean-revert.
    if nope > 60.0 {
        bear(((nope - 60.0) / 60.0).min(1.0), format!("NOPE {nope:.0} extreme high"))
    } else if nope < -60.0 {
        bull(((-nope - 60.0) / 60.0).min(1.0), format!("NOPE {nope:.0} extreme low"))
    } else {
        None
    }
}

fn gamma_pin(ctx: &ScoringContext) -> Option<Contribution> {
    let mp = ctx.facts.options.max_pain?;
    let price = last_price(ctx)?;
    if dist_pct(price, mp) >= 0.005 {
        return None;
    }
    info(format!("gamma pin near spot (max pain {mp:.2})"))
}

fn max_pain_magnet(ctx: &ScoringContext) -> Option<Contribution> {
    let mp = ctx.facts.options.max_pain?;
    let price = last_price(ctx)?;
    let dist = dist_pct(price, mp);
    if dist <= 0.02 {
        return None;
    }
    let strength = (dist / 0.05).min(1.0) * 0.5;
    if price > mp {
        bear(strength, format!("price {price:.2} stretched above max pain {mp:.2}"))
    } else {
        bull(strength, format!("price {price:.2} stretched below max pain {mp:.2}"))
    }
}

fn gex_wall_support(ctx: &ScoringContext) -> Option<Contribution> {
    let price = last_price(ctx)?;
    let wall = ctx
        .facts
        .options
        .gex_per_strike
        .iter()
        .filter(|g| g.gamma_exposure > 0.0 && g.strike < price && dist_pct(price, g.strike) < 0.02)
        .max_by(|a, b| a.gamma_exposure.partial_cmp(&b.gamma_exposure).unwrap_or(std::cmp::Ordering::Equal))?;
    bull(0.7, format!("gamma wall support at {:.2}", wall.strike))
}

fn gex_wall_ceiling(ctx: &ScoringContext) -> Option<Contribution> {
    let price = last_price(ctx)?;
    let wall = ctx
        .facts
        .options
        .gex_per_strike
        .iter()
        .filter(|g| g.gamma_exposure > 0.0 && g.strike > price && dist_pct(price, g.strike) < 0.02)
        .max_by(|a, b| a.gamma_exposure.partial_cmp(&b.gamma_exposure).unwrap_or(std::cmp::Ordering::Equal))?;
    bear(0.7, format!("gamma wall ceiling at {:.2}", wall.strike))
}

fn oi_call_build(ctx: &ScoringContext) -> Option<Contribution> {
    let oi = ctx.facts.options.oi_change.as_ref()?;
    if oi.call_change <= 0.0 || oi.call_change < oi.put_change.abs() * 2.0 {
        return None;
    }
    bull(0.7, format!("call OI building {:+.0}", oi.call_change))
}

fn oi_put_build(ctx: &ScoringContext) -> Option<Contribution> {
    let oi = ctx.facts.options.oi_change.as_ref()?;
    if oi.put_change <= 0.0 || oi.put_change < oi.call_change.abs() * 2.0 {
        return None;
    }
    bear(0.7, format!("put OI building {:+.0}", oi.put_change))
}

fn iv_skew_lean(ctx: &ScoringContext) -> Option<Contribution> {
    let skew = ctx.facts.options.iv_skew?;
    if skew > 2.0 {
        bull((skew / 8.0).min(1.0), format!("risk reversal {skew:+.1} — calls bid"))
    } else if skew < -2.0 {
        bear((-skew / 8.0).min(1.0), format!("risk reversal {skew:+.1} — puts bid"))
    } else {
        None
    }
}

fn iv_contango(ctx: &ScoringContext) -> Option<Contribution> {
    if ctx.facts.options.term_in_contango()? {
        info("IV contango".to_string())
    } else {
        None
    }
}

fn iv_backwardation(ctx: &ScoringContext) -> Option<Contribution> {
    if !ctx.facts.options.term_in_contango()? {
        info("IV backwardation — near-dated stress".to_string())
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Dark pool & tape
// ---------------------------------------------------------------------------

fn dark_pool_accumulation(ctx: &ScoringContext) -> Option<Contribution> {
    let dp = &ctx.facts.dark_pool;
    if dp.updated_at.is_none() || dp.aggressor_score <= 0.3 {
        return None;
    }
    bull(dp.aggressor_score, format!("dark pool aggressor {:+.2}", dp.aggressor_score))
}

fn dark_pool_distribution(ctx: &ScoringContext) -> Option<Contribution> {
    let dp = &ctx.facts.dark_pool;
    if dp.updated_at.is_none() || dp.aggressor_score >= -0.3 {
        return None;
    }
    bear(-dp.aggressor_score, format!("dark pool aggressor {:+.2}", dp.aggressor_score))
}

fn tape_imbalance_bull(ctx: &ScoringContext) -> Option<Contribution> {
    let tick = ctx.tick?;
    if !tick.is_fresh() || tick.flow_imbalance <= 0.3 {
        return None;
    }
    bull(tick.flow_imbalance, format!("tape imbalance {:+.2}", tick.flow_imbalance))
}

fn tape_imbalance_bear(ctx: &ScoringContext) -> Option<Contribution> {
    let tick = ctx.tick?;
    if !tick.is_fresh() || tick.flow_imbalance >= -0.3 {
        return None;
    }
    bear(-tick.flow_imbalance, format!("tape imbalance {:+.2}", tick.flow_imbalance))
}

fn block_trades_bull(ctx: &ScoringContext) -> Option<Contribution> {
    let tick = ctx.tick?;
    if !tick.is_fresh() || tick.large_block_buys < 3 || tick.large_block_buys < tick.large_block_sells * 2 {
        return None;
    }
    bull(
        (tick.large_block_buys as f64 / 10.0).min(1.0),
        format!("{} block buys vs {} sells", tick.large_block_buys, tick.large_block_sells),
    )
}

fn block_trades_bear(ctx: &ScoringContext) -> Option<Contribution> {
    let tick = ctx.tick?;
    if !tick.is_fresh() || tick.large_block_sells < 3 || tick.large_block_sells < tick.large_block_buys * 2 {
        return None;
    }
    bear(
        (tick.large_block_sells as f64 / 10.0).min(1.0),
        format!("{} block sells vs {} buys", tick.large_block_sells, tick.large_block_buys),
    )
}

// ---------------------------------------------------------------------------
// Positioning / catalysts / context
// ---------------------------------------------------------------------------

fn short_squeeze_setup(ctx: &ScoringContext) -> Option<Contribution> {
    let si = ctx.facts.fundamentals.short_interest_pct?;
    if !(20.0..=100.0).contains(&si) {
        return None;
    }
    let t = ta(ctx)?;
    let price = last_price(ctx)?;
    if price <= ctx.facts.quote.prev_close || !t.volume_spike {
        return None;
    }
    bull(((si - 20.0) / 30.0 + 0.4).min(1.0), format!("SI {si:.1}% with volume thrust"))
}

fn short_interest_implausible(ctx: &ScoringContext) -> Option<Contribution> {
    let si = ctx.facts.fundamentals.short_interest_pct?;
    if si <= 100.0 {
        return None;
    }
    // Impossible reading — refuse to score it, surface it instead.
    info(format!("short interest {si:.0}% implausible — ignored"))
}

fn insider_buying(ctx: &ScoringContext) -> Option<Contribution> {
    let bought: f64 = ctx
        .facts
        .fundamentals
        .insider_transactions
        .iter()
        .filter(|tx| tx.side == "buy")
        .map(|tx| tx.value_usd)
        .sum();
    if bought < 1_000_000.0 {
        return None;
    }
    bull((bought / 10_000_000.0).min(1.0), format!("insiders bought ${:.1}M", bought / 1e6))
}

fn insider_selling(ctx: &ScoringContext) -> Option<Contribution> {
    let sold: f64 = ctx
        .facts
        .fundamentals
        .insider_transactions
        .iter()
        .filter(|tx| tx.side == "sell")
        .map(|tx| tx.value_usd)
        .sum();
    // Routine selling is noise; only heavy clusters matter.
    if sold < 5_000_000.0 {
        return None;
    }
    bear((sold / 50_000_000.0).min(1.0) * 0.5, format!("insiders sold ${:.1}M", sold / 1e6))
}

fn earnings_beat_gap_up(ctx: &ScoringContext) -> Option<Contribution> {
    let e = ctx.facts.fundamentals.earnings.as_ref()?;
    if e.beat.as_deref() != Some("BEAT") {
        return None;
    }
    let ah = e.afterhours_change?;
    if ah <= 2.0 {
        return None;
    }
    let surprise = e.surprise_pct.unwrap_or(0.0);
    bull(1.0, format!("earnings beat {surprise:+.1}% surprise, +{ah:.1}% after hours"))
}

fn earnings_miss_gap_down(ctx: &ScoringContext) -> Option<Contribution> {
    let e = ctx.facts.fundamentals.earnings.as_ref()?;
    if e.beat.as_deref() != Some("MISS") {
        return None;
    }
    let ah = e.afterhours_change?;
    if ah >= -2.0 {
        return None;
    }
    bear(1.0, format!("earnings miss, {ah:.1}% after hours"))
}

fn earnings_event_risk(ctx: &ScoringContext) -> Option<Contribution> {
    let date = ctx.facts.quote.earnings_next_date.as_deref()?;
    let announce = ctx.facts.quote.announce_time.as_deref().unwrap_or("unknown");
    // The scheduler only stores imminent dates here; treat presence as risk.
    info(format!("earnings {date} ({announce}) — event risk"))
}

fn news_sentiment_bull(ctx: &ScoringContext) -> Option<Contribution> {
    let avg = ticker_news_sentiment(ctx)?;
    if avg <= 0.35 {
        return None;
    }
    bull(avg.min(1.0), format!("news sentiment {avg:+.2}"))
}

fn news_sentiment_bear(ctx: &ScoringContext) -> Option<Contribution> {
    let avg = ticker_news_sentiment(ctx)?;
    if avg >= -0.35 {
        return None;
    }
    bear((-avg).min(1.0), format!("news sentiment {avg:+.2}"))
}

fn ticker_news_sentiment(ctx: &ScoringContext) -> Option<f64> {
    let scores: Vec<f64> = ctx
        .market
        .news
        .iter()
        .filter(|n| n.ticker.as_deref() == Some(ctx.ticker))
        .map(|n| n.sentiment)
        .collect();
    if scores.len() < 2 {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

fn market_tide_bull(ctx: &ScoringContext) -> Option<Contribution> {
    let lean = ctx.market.market_tide.as_ref()?.lean();
    if lean <= 0.25 {
        return None;
    }
    bull(lean.min(1.0) * 0.6, format!("market tide {lean:+.2}"))
}

fn market_tide_bear(ctx: &ScoringContext) -> Option<Contribution> {
    let lean = ctx.market.market_tide.as_ref()?.lean();
    if lean >= -0.25 {
        return None;
    }
    bear((-lean).min(1.0) * 0.6, format!("market tide {lean:+.2}"))
}

fn congress_buying(ctx: &ScoringContext) -> Option<Contribution> {
    let hit = ctx.market.congress_trades.iter().find(|t| {
        t.ticker == ctx.ticker
            && t.side == "buy"
            && t.track_record_win_rate.map(|w| w > 0.6).unwrap_or(false)
    })?;
    bull(
        0.6,
        format!(
            "{} bought ({} win rate {:.0}%)",
            hit.politician,
            hit.amount_range,
            hit.track_record_win_rate.unwrap_or(0.0) * 100.0
        ),
    )
}

fn vix_fear_extreme(ctx: &ScoringContext) -> Option<Contribution> {
    let vix = ctx.market.vix.as_ref()?;
    if vix.value <= 30.0 {
        return None;
    }
    info(format!("VIX {:.1} — fear extreme", vix.value))
}
