// =============================================================================
// Gap Analyzer — classify the open gap, infer the stock's personality
// =============================================================================
//
// Every cycle, each known ticker's open-vs-prior-close gap (>= 0.5%) is
// classified by its likely cause (earnings, FDA catalyst, analyst action,
// M&A, short squeeze, guidance, momentum, technical), cross-checked against
// news and the market tide, and mapped onto a personality: how this kind of
// gapper usually trades. The output is a directional bias plus a concrete
// trading signal — fade setups target the half-gap fill first and the full
// fill second; momentum setups target continuation.
// =============================================================================

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app_state::AppState;
use crate::discovery::{
    process_discovery, score_existing, top_signals, DiscoveryEntry, DiscoveryMeta, ETF_BLACKLIST,
};
use crate::state::{MarketFacts, TickerFacts};
use crate::types::{DiscoverySource, SignalDirection, TradeDirection};

/// Minimum open gap worth classifying.
const MIN_GAP_PCT: f64 = 0.5;
/// Gaps beyond this read as catalyst-driven even without a named cause.
const MOMENTUM_GAP_PCT: f64 = 2.0;

/// Concrete levels for trading the gap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapSignal {
    pub direction: TradeDirection,
    pub entry: f64,
    pub stop: f64,
    /// Fade setups: the half-gap fill.
    pub target1: f64,
    /// Fade setups: the full gap fill.
    pub target2: f64,
    pub is_fade: bool,
}

/// Full analysis for one gapping ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapAnalysis {
    pub ticker: String,
    pub gap_pct: f64,
    /// earnings | fda-catalyst | analyst | m-and-a | short-squeeze |
    /// guidance | momentum | technical
    pub classification: String,
    pub causation: String,
    /// overbought-gapper | momentum-runner | oversold-bounce | breakdown |
    /// pullback-dip | neutral-gapper
    pub personality: String,
    pub bias: SignalDirection,
    #[serde(default)]
    pub signal: Option<GapSignal>,
    pub at: chrono::DateTime<Utc>,
}

/// Analyze one ticker's gap. `None` when there is no qualifying gap.
pub fn analyze_ticker(ticker: &str, facts: &TickerFacts, market: &MarketFacts) -> Option<GapAnalysis> {
    let open = facts.quote.open;
    let prev_close = facts.quote.prev_close;
    if open <= 0.0 || prev_close <= 0.0 {
        return None;
    }

    let gap_pct = (open - prev_close) / prev_close * 100.0;
    if gap_pct.abs() < MIN_GAP_PCT {
        return None;
    }

    let (classification, causation) = classify_cause(ticker, facts, market, gap_pct);
    let personality = infer_personality(facts, gap_pct);
    let (bias, signal) = build_signal(facts, gap_pct, &personality, open, prev_close);

    Some(GapAnalysis {
        ticker: ticker.to_string(),
        gap_pct,
        classification,
        causation,
        personality,
        bias,
        signal,
        at: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Cause classification
// ---------------------------------------------------------------------------

fn classify_cause(
    ticker: &str,
    facts: &TickerFacts,
    market: &MarketFacts,
    gap_pct: f64,
) -> (String, String) {
    // Earnings on the tape beats every other explanation.
    if let Some(e) = &facts.fundamentals.earnings {
        if e.beat.is_some() {
            return (
                "earnings".into(),
                format!(
                    "reported {} ({:+.1}% surprise)",
                    e.beat.as_deref().unwrap_or("?"),
                    e.surprise_pct.unwrap_or(0.0)
                ),
            );
        }
    }
    if facts.quote.earnings_next_date.is_some() {
        return ("earnings".into(), "gapping into a scheduled report".into());
    }

    if market
        .fda_calendar
        .iter()
        .any(|e| e.ticker.as_deref() == Some(ticker))
    {
        return ("fda-catalyst".into(), "scheduled FDA decision on the calendar".into());
    }

    // News keyword pass.
    let headlines: Vec<&str> = market
        .news
        .iter()
        .filter(|n| n.ticker.as_deref() == Some(ticker))
        .map(|n| n.headline.as_str())
        .collect();
    for h in &headlines {
        let lower = h.to_lowercase();
        if lower.contains("upgrade") || lower.contains("downgrade") || lower.contains("price target") {
            return ("analyst".into(), format!("analyst action: {h}"));
        }
        if lower.contains("acquire") || lower.contains("merger") || lower.contains("buyout") {
            return ("m-and-a".into(), format!("deal headline: {h}"));
        }
        if lower.contains("guidance") || lower.contains("outlook") {
            return ("guidance".into(), format!("guidance headline: {h}"));
        }
    }

    if gap_pct > 0.0 {
        if let Some(si) = facts.fundamentals.short_interest_pct {
            if (20.0..=100.0).contains(&si) {
                return (
                    "short-squeeze".into(),
                    format!("SI {si:.1}% of float gapping up"),
                );
            }
        }
    }

    if gap_pct.abs() >= MOMENTUM_GAP_PCT {
        let tide = market.market_tide.as_ref().map(|t| t.lean()).unwrap_or(0.0);
        return (
            "momentum".into(),
            format!("no named catalyst; market tide {tide:+.2}"),
        );
    }

    ("technical".into(), "small structural gap, no catalyst in view".into())
}

// ---------------------------------------------------------------------------
// Personality
// ---------------------------------------------------------------------------

fn infer_personality(facts: &TickerFacts, gap_pct: f64) -> String {
    let Some(ta) = &facts.technicals else {
        return "neutral-gapper".into();
    };
    let gapping_up = gap_pct > 0.0;

    if gapping_up && ta.rsi > 70.0 {
        "overbought-gapper".into()
    } else if gapping_up && ta.ema_bias == SignalDirection::Bullish {
        "momentum-runner".into()
    } else if gapping_up && ta.rsi < 30.0 {
        "oversold-bounce".into()
    } else if !gapping_up && ta.ema_bias == SignalDirection::Bearish {
        "breakdown".into()
    } else if !gapping_up && ta.ema_bias == SignalDirection::Bullish {
        "pullback-dip".into()
    } else {
        "neutral-gapper".into()
    }
}

// ---------------------------------------------------------------------------
// Signal construction
// ---------------------------------------------------------------------------

fn build_signal(
    facts: &TickerFacts,
    gap_pct: f64,
    personality: &str,
    open: f64,
    prev_close: f64,
) -> (SignalDirection, Option<GapSignal>) {
    let price = if facts.quote.last > 0.0 { facts.quote.last } else { open };
    let atr = facts.technicals.as_ref().map(|t| t.atr).unwrap_or(0.0);
    let gap_size = (open - prev_close).abs();
    let half_fill = (open + prev_close) / 2.0;

    match personality {
        // Stretched gap into overbought: fade it back into the gap.
        "overbought-gapper" => {
            let signal = GapSignal {
                direction: TradeDirection::Short,
                entry: price,
                stop: price + gap_size * 0.5,
                target1: half_fill,
                target2: prev_close,
                is_fade: true,
            };
            (SignalDirection::Bearish, Some(signal))
        }
        // Dip against an intact uptrend: buy the fill.
        "pullback-dip" | "oversold-bounce" => {
            let signal = GapSignal {
                direction: TradeDirection::Long,
                entry: price,
                stop: price - gap_size * 0.5,
                target1: half_fill.max(price),
                target2: prev_close.max(price),
                is_fade: true,
            };
            (SignalDirection::Bullish, Some(signal))
        }
        // Trend continuation: ride it with ATR targets.
        "momentum-runner" if atr > 0.0 => {
            let signal = GapSignal {
                direction: TradeDirection::Long,
                entry: price,
                stop: price - atr,
                target1: price + atr * 1.5,
                target2: price + atr * 3.0,
                is_fade: false,
            };
            (SignalDirection::Bullish, Some(signal))
        }
        "breakdown" if atr > 0.0 => {
            let signal = GapSignal {
                direction: TradeDirection::Short,
                entry: price,
                stop: price + atr,
                target1: price - atr * 1.5,
                target2: price - atr * 3.0,
                is_fade: false,
            };
            (SignalDirection::Bearish, Some(signal))
        }
        _ => {
            let bias = if gap_pct > 0.0 {
                SignalDirection::Bullish
            } else {
                SignalDirection::Bearish
            };
            (bias, None)
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle pass
// ---------------------------------------------------------------------------

/// Analyze every known ticker's gap; store reports and promote qualifying
/// non-watchlist gappers through the sink.
pub fn run_gap_pass(app: &Arc<AppState>) -> usize {
    let watchlist = app.config.read().watchlist.clone();
    let market = app.store.market();
    let ttl = Duration::minutes(app.config.read().discovery_ttl_minutes);
    let mut analyzed = 0;

    for (ticker, facts) in app.store.all_tickers() {
        let Some(report) = analyze_ticker(&ticker, &facts, &market) else {
            continue;
        };
        analyzed += 1;
        let gap_pct = report.gap_pct;
        app.discoveries.store_gap_report(report.clone());

        let promotable = !watchlist.contains(&ticker)
            && !ETF_BLACKLIST.contains(&ticker.as_str())
            && !app.discoveries.contains(&ticker)
            && gap_pct.abs() >= MOMENTUM_GAP_PCT;
        if !promotable {
            continue;
        }

        let Some(score) = score_existing(app, &ticker) else {
            continue;
        };
        let now = Utc::now();
        let entry = DiscoveryEntry {
            ticker: ticker.clone(),
            source: DiscoverySource::GapAnalyzer,
            discovered_at: now,
            price: facts.quote.last,
            direction: if score.direction != SignalDirection::Neutral {
                score.direction
            } else {
                report.bias
            },
            confidence: score.confidence,
            top_signals: top_signals(&score, 3),
            meta: DiscoveryMeta {
                gap_pct: Some(gap_pct),
                relative_volume: None,
                halt_reason: None,
            },
            expires_at: now + ttl,
        };
        process_discovery(app, entry, Some(&score));
    }

    debug!(analyzed, "gap pass complete");
    analyzed
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Technicals;
    use crate::state::EarningsEnriched;

    fn facts(open: f64, prev_close: f64, last: f64) -> TickerFacts {
        let mut f = TickerFacts::default();
        f.quote.open = open;
        f.quote.prev_close = prev_close;
        f.quote.last = last;
        f
    }

    #[test]
    fn small_gap_ignored() {
        let f = facts(100.3, 100.0, 100.2);
        assert!(analyze_ticker("XYZ", &f, &MarketFacts::default()).is_none());
    }

    #[test]
    fn missing_prices_ignored() {
        let f = facts(0.0, 100.0, 100.0);
        assert!(analyze_ticker("XYZ", &f, &MarketFacts::default()).is_none());
    }

    #[test]
    fn earnings_classification_wins() {
        let mut f = facts(105.0, 100.0, 105.5);
        f.fundamentals.earnings = Some(EarningsEnriched {
            beat: Some("BEAT".into()),
            surprise_pct: Some(8.0),
            afterhours_change: Some(4.0),
        });
        let report = analyze_ticker("XYZ", &f, &MarketFacts::default()).unwrap();
        assert_eq!(report.classification, "earnings");
        assert!((report.gap_pct - 5.0).abs() < 1e-10);
    }

    #[test]
    fn short_squeeze_classification() {
        let mut f = facts(104.0, 100.0, 104.5);
        f.fundamentals.short_interest_pct = Some(32.0);
        let report = analyze_ticker("XYZ", &f, &MarketFacts::default()).unwrap();
        assert_eq!(report.classification, "short-squeeze");
    }

    #[test]
    fn overbought_gapper_fades_to_fill() {
        let mut f = facts(106.0, 100.0, 106.5);
        f.technicals = Some(Technicals { rsi: 78.0, ..Default::default() });
        let report = analyze_ticker("XYZ", &f, &MarketFacts::default()).unwrap();
        assert_eq!(report.personality, "overbought-gapper");
        assert_eq!(report.bias, SignalDirection::Bearish);

        let signal = report.signal.unwrap();
        assert!(signal.is_fade);
        assert_eq!(signal.direction, TradeDirection::Short);
        // Target1 = half fill, target2 = full fill.
        assert!((signal.target1 - 103.0).abs() < 1e-10);
        assert!((signal.target2 - 100.0).abs() < 1e-10);
        assert!(signal.stop > signal.entry);
    }

    #[test]
    fn momentum_runner_rides_continuation() {
        let mut f = facts(103.0, 100.0, 103.5);
        f.technicals = Some(Technicals {
            rsi: 60.0,
            ema_bias: SignalDirection::Bullish,
            atr: 2.0,
            ..Default::default()
        });
        let report = analyze_ticker("XYZ", &f, &MarketFacts::default()).unwrap();
        assert_eq!(report.personality, "momentum-runner");
        let signal = report.signal.unwrap();
        assert!(!signal.is_fade);
        assert_eq!(signal.direction, TradeDirection::Long);
        assert!(signal.target1 > signal.entry);
        assert!(signal.target2 > signal.target1);
    }

    #[test]
    fn breakdown_personality_down_gap() {
        let mut f = facts(96.0, 100.0, 95.5);
        f.technicals = Some(Technicals {
            rsi: 40.0,
            ema_bias: SignalDirection::Bearish,
            atr: 2.0,
            ..Default::default()
        });
        let report = analyze_ticker("XYZ", &f, &MarketFacts::default()).unwrap();
        assert_eq!(report.personality, "breakdown");
        assert_eq!(report.bias, SignalDirection::Bearish);
    }

    #[test]
    fn no_technicals_is_neutral_gapper() {
        let f = facts(103.0, 100.0, 103.0);
        let report = analyze_ticker("XYZ", &f, &MarketFacts::default()).unwrap();
        assert_eq!(report.personality, "neutral-gapper");
        assert!(report.signal.is_none());
        assert_eq!(report.bias, SignalDirection::Bullish);
    }
}
