// =============================================================================
// Candle replay — bootstrap training labels from history
// =============================================================================
//
// Replays a candle sequence through the signal engine: every bar where the
// engine reads directional with enough confidence opens a simulated trade
// with ATR-based levels, walked forward bar by bar until target, stop, or
// timeout. Each resolved trade emits one labeled training sample.
//
// Same-bar ambiguity: a bar spanning both levels fills the target only when
// the bar's own direction (close vs open) moves toward it; otherwise the
// stop fills. Trades do not overlap — the replay jumps past each exit.
// =============================================================================

use tracing::info;

use crate::analyzer;
use crate::indicators::MIN_CANDLES;
use crate::ml::TrainingSample;
use crate::regime::RegimeDetector;
use crate::signals::{ScoringContext, SignalEngine};
use crate::state::{Candle, MarketFacts, TickerFacts};
use crate::types::{Session, TradeDirection};

/// Minimum score confidence to take a replay trade.
const MIN_CONFIDENCE: u8 = 55;
/// Bars a simulated trade may stay open before timing out.
const MAX_HOLD_BARS: usize = 10;
/// ATR multiples for the simulated levels.
const TARGET_ATR: f64 = 2.0;
const STOP_ATR: f64 = 1.0;

#[derive(Debug, Clone, Default)]
pub struct BacktestReport {
    pub bars: usize,
    pub trades: usize,
    pub wins: usize,
    pub samples: Vec<TrainingSample>,
}

/// Replay `candles` (oldest first) and emit labeled samples for the given
/// training horizon ("day" or "swing").
pub fn backtest(
    ticker: &str,
    candles: &[Candle],
    engine: &SignalEngine,
    horizon: &str,
) -> BacktestReport {
    let mut report = BacktestReport {
        bars: candles.len(),
        ..Default::default()
    };

    if candles.len() <= MIN_CANDLES {
        return report;
    }

    let market = MarketFacts::default();
    let detector = RegimeDetector::new();
    let regime = detector.update(&market, Default::default());

    let mut i = MIN_CANDLES;
    while i < candles.len() - 1 {
        let window = &candles[..=i];
        let Some(ta) = analyzer::analyze(window) else {
            i += 1;
            continue;
        };

        let atr = ta.atr;
        let entry = window.last().unwrap().close;
        if atr <= 0.0 || entry <= 0.0 {
            i += 1;
            continue;
        }

        let mut facts = TickerFacts::default();
        facts.quote.last = entry;
        facts.quote.open = window.last().unwrap().open;
        facts.quote.prev_close = window[window.len() - 2].close;
        facts.technicals = Some(ta);
        facts.candles.insert("1d".to_string(), window.to_vec());

        let ctx = ScoringContext {
            ticker,
            facts: &facts,
            market: &market,
            regime: &regime,
            session: Session::Midday,
            tick: None,
        };
        let score = engine.score(&ctx);

        let Some(direction) = score.direction.trade_direction() else {
            i += 1;
            continue;
        };
        if score.confidence < MIN_CONFIDENCE {
            i += 1;
            continue;
        }

        let (target, stop) = match direction {
            TradeDirection::Long => (entry + TARGET_ATR * atr, entry - STOP_ATR * atr),
            TradeDirection::Short => (entry - TARGET_ATR * atr, entry + STOP_ATR * atr),
        };

        // ── Walk forward ────────────────────────────────────────────────
        let mut exit: Option<f64> = None;
        let mut exit_idx = i;
        for (offset, bar) in candles[i + 1..].iter().take(MAX_HOLD_BARS).enumerate() {
            if let Some(price) = resolve_bar(bar, direction, target, stop) {
                exit = Some(price);
                exit_idx = i + 1 + offset;
                break;
            }
            exit_idx = i + 1 + offset;
        }
        // Timeout: mark at the last held bar's close.
        let exit_price = exit.unwrap_or(candles[exit_idx].close);

        let points = match direction {
            TradeDirection::Long => exit_price - entry,
            TradeDirection::Short => entry - exit_price,
        };
        let pnl_pct = 100.0 * points / entry;
        let label = (points > 0.0) as u8;

        report.trades += 1;
        report.wins += label as usize;
        report.samples.push(TrainingSample {
            features: score.features.clone(),
            label,
            confidence: score.confidence,
            pnl_pct,
            horizon: horizon.to_string(),
            at: chrono::Utc::now(),
        });

        // No overlapping trades.
        i = exit_idx + 1;
    }

    info!(
        ticker,
        bars = report.bars,
        trades = report.trades,
        wins = report.wins,
        "replay complete"
    );
    report
}

/// Did this bar fill the target or the stop? Both spanned: the bar's own
/// direction decides whether the target fill is credible; otherwise the
/// stop wins.
fn resolve_bar(bar: &Candle, direction: TradeDirection, target: f64, stop: f64) -> Option<f64> {
    let (hit_target, hit_stop) = match direction {
        TradeDirection::Long => (bar.high >= target, bar.low <= stop),
        TradeDirection::Short => (bar.low <= target, bar.high >= stop),
    };

    match (hit_target, hit_stop) {
        (true, true) => {
            let bar_toward_target = match direction {
                TradeDirection::Long => bar.close > bar.open,
                TradeDirection::Short => bar.close < bar.open,
            };
            Some(if bar_toward_target { target } else { stop })
        }
        (true, false) => Some(target),
        (false, true) => Some(stop),
        (false, false) => None,
    }
}
