// =============================================================================
// Discovery Pipeline — promoting non-watchlist tickers into the scoring loop
// =============================================================================
//
// Four producers (market scanner, volatility runner, halt-resume watcher,
// gap analyzer) feed one sink. The sink owns every discovery entry:
// consumers hold the ticker key and look entries up on demand, tolerating a
// missing key after expiry. An entry lives two hours; the sweep runs every
// fifteen minutes, records the outcome for the rolling performance file, and
// drops the tick subscription.
//
// A discovery confident enough (>= the configured floor, non-neutral) also
// generates a structure-snapped trade setup and — behind the consecutive-
// loss guard — a paper entry.
// =============================================================================

pub mod gaps;
pub mod halts;
pub mod runner;
pub mod scanner;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::journal::{risk_reward, StructureSources, TradeSetup};
use crate::persist;
use crate::session;
use crate::signals::{ScoringContext, SignalScore};
use crate::sources::null_on_error;
use crate::structure;
use crate::types::{DiscoverySource, SignalDirection, TradeDirection};

/// ETFs and index products the producers never promote.
pub const ETF_BLACKLIST: [&str; 12] = [
    "SPY", "QQQ", "IWM", "DIA", "VXX", "UVXY", "SQQQ", "TQQQ", "SPXU", "SOXL", "SOXS", "GLD",
];

/// ATR multiples for auto-generated setups.
const AUTO_TARGET_ATR: f64 = 2.0;
const AUTO_STOP_ATR: f64 = 1.0;

/// Producer-specific context attached to an entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryMeta {
    #[serde(default)]
    pub gap_pct: Option<f64>,
    #[serde(default)]
    pub relative_volume: Option<f64>,
    #[serde(default)]
    pub halt_reason: Option<String>,
}

/// One tracked discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryEntry {
    pub ticker: String,
    pub source: DiscoverySource,
    pub discovered_at: DateTime<Utc>,
    pub price: f64,
    pub direction: SignalDirection,
    pub confidence: u8,
    pub top_signals: Vec<String>,
    pub meta: DiscoveryMeta,
    pub expires_at: DateTime<Utc>,
}

/// Outcome row for `data/scanner-performance.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryOutcome {
    pub ticker: String,
    pub source: DiscoverySource,
    pub direction: SignalDirection,
    pub confidence: u8,
    pub discovered_at: DateTime<Utc>,
    pub price_at_discovery: f64,
    #[serde(default)]
    pub price_at_expiry: Option<f64>,
    #[serde(default)]
    pub move_pct: Option<f64>,
}

/// Rolling cap on persisted outcomes.
const MAX_OUTCOMES: usize = 2_000;

/// The sink: owns entries, runner cooldowns, gap analyses, and the rolling
/// outcome log.
pub struct DiscoveryBook {
    entries: RwLock<HashMap<String, DiscoveryEntry>>,
    outcomes: RwLock<Vec<DiscoveryOutcome>>,
    runner_cooldowns: RwLock<HashMap<String, DateTime<Utc>>>,
    gap_reports: RwLock<HashMap<String, gaps::GapAnalysis>>,
    perf_path: PathBuf,
}

impl DiscoveryBook {
    pub fn load(perf_path: PathBuf) -> Self {
        let outcomes: Vec<DiscoveryOutcome> = persist::read_json_or_default(&perf_path);
        Self {
            entries: RwLock::new(HashMap::new()),
            outcomes: RwLock::new(outcomes),
            runner_cooldowns: RwLock::new(HashMap::new()),
            gap_reports: RwLock::new(HashMap::new()),
            perf_path,
        }
    }

    /// Insert a new entry or upgrade an existing one in place on re-score.
    pub fn track(&self, entry: DiscoveryEntry) {
        let mut entries = self.entries.write();
        match entries.get_mut(&entry.ticker) {
            Some(existing) => {
                existing.price = entry.price;
                existing.direction = entry.direction;
                existing.confidence = entry.confidence;
                existing.top_signals = entry.top_signals;
                debug!(ticker = %entry.ticker, "discovery upgraded in place");
            }
            None => {
                info!(
                    ticker = %entry.ticker,
                    source = %entry.source,
                    direction = %entry.direction,
                    confidence = entry.confidence,
                    "discovery tracked"
                );
                entries.insert(entry.ticker.clone(), entry);
            }
        }
    }

    pub fn get(&self, ticker: &str) -> Option<DiscoveryEntry> {
        self.entries.read().get(ticker).cloned()
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.entries.read().contains_key(ticker)
    }

    /// All live entries, newest first.
    pub fn entries(&self) -> Vec<DiscoveryEntry> {
        let mut out: Vec<DiscoveryEntry> = self.entries.read().values().cloned().collect();
        out.sort_by(|a, b| b.discovered_at.cmp(&a.discovered_at));
        out
    }

    /// Remove expired entries, recording each outcome against the last
    /// known price. Returns the expired tickers.
    pub fn sweep(&self, now: DateTime<Utc>, last_prices: &HashMap<String, f64>) -> Vec<String> {
        let expired: Vec<DiscoveryEntry> = {
            let mut entries = self.entries.write();
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.expires_at <= now)
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| entries.remove(k)).collect()
        };

        if expired.is_empty() {
            return Vec::new();
        }

        {
            let mut outcomes = self.outcomes.write();
            for entry in &expired {
                let final_price = last_prices.get(&entry.ticker).copied();
                let move_pct = final_price.and_then(|p| {
                    (entry.price > 0.0).then(|| (p - entry.price) / entry.price * 100.0)
                });
                outcomes.push(DiscoveryOutcome {
                    ticker: entry.ticker.clone(),
                    source: entry.source,
                    direction: entry.direction,
                    confidence: entry.confidence,
                    discovered_at: entry.discovered_at,
                    price_at_discovery: entry.price,
                    price_at_expiry: final_price,
                    move_pct,
                });
            }
            if outcomes.len() > MAX_OUTCOMES {
                let excess = outcomes.len() - MAX_OUTCOMES;
                outcomes.drain(..excess);
            }
        }
        self.persist_outcomes();

        expired.into_iter().map(|e| e.ticker).collect()
    }

    pub fn outcomes(&self) -> Vec<DiscoveryOutcome> {
        self.outcomes.read().clone()
    }

    fn persist_outcomes(&self) {
        let outcomes = self.outcomes.read().clone();
        if let Err(e) = persist::write_json_atomic(&self.perf_path, &outcomes) {
            warn!(error = %e, "failed to persist discovery outcomes");
        }
    }

    // ── Runner cooldowns ────────────────────────────────────────────────

    pub fn runner_on_cooldown(&self, ticker: &str, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.runner_cooldowns
            .read()
            .get(ticker)
            .map(|&seen| now - seen < cooldown)
            .unwrap_or(false)
    }

    pub fn mark_runner_seen(&self, ticker: &str, now: DateTime<Utc>) {
        self.runner_cooldowns.write().insert(ticker.to_string(), now);
    }

    // ── Gap reports ─────────────────────────────────────────────────────

    pub fn store_gap_report(&self, report: gaps::GapAnalysis) {
        self.gap_reports.write().insert(report.ticker.clone(), report);
    }

    pub fn gap_reports(&self) -> Vec<gaps::GapAnalysis> {
        self.gap_reports.read().values().cloned().collect()
    }
}

// =============================================================================
// Shared producer plumbing
// =============================================================================

/// Fetch enough facts to score a candidate that may be entirely unknown:
/// quote plus daily candles, merged into the store, then one engine pass.
pub async fn score_candidate(app: &Arc<AppState>, ticker: &str) -> Option<SignalScore> {
    let provider = app.provider.clone();

    if let Some(quote) = null_on_error(provider.name(), "quote", provider.quote(ticker).await) {
        app.store.update_ticker(ticker, |t| t.quote.merge(quote));
    }
    if let Some(candles) =
        null_on_error(provider.name(), "candles", provider.candles(ticker, "1d", 120).await)
    {
        app.store.set_candles(ticker, "1d", candles);
    }

    let facts = app.store.ticker(ticker)?;
    let technicals = facts.candles.get("1d").and_then(|c| crate::analyzer::analyze(c));
    app.store.update_ticker(ticker, |t| t.technicals = technicals.clone());

    let facts = app.store.ticker(ticker)?;
    let market = app.store.market();
    let regime = app.regime.current()?;
    let tick = app.ticks.summary(ticker);

    let ctx = ScoringContext {
        ticker,
        facts: &facts,
        market: &market,
        regime: &regime,
        session: app.current_session(),
        tick: tick.as_ref(),
    };
    let score = app.engine.score(&ctx);
    app.store.update_ticker(ticker, |t| t.last_score = Some(score.clone()));
    Some(score)
}

/// Score a ticker from facts already in the store — no provider calls.
/// Used by producers that run every cycle and must stay budget-free.
pub fn score_existing(app: &Arc<AppState>, ticker: &str) -> Option<SignalScore> {
    let facts = app.store.ticker(ticker)?;
    facts.technicals.as_ref()?;
    let market = app.store.market();
    let regime = app.regime.current()?;
    let tick = app.ticks.summary(ticker);

    let ctx = ScoringContext {
        ticker,
        facts: &facts,
        market: &market,
        regime: &regime,
        session: app.current_session(),
        tick: tick.as_ref(),
    };
    let score = app.engine.score(&ctx);
    app.store.update_ticker(ticker, |t| t.last_score = Some(score.clone()));
    Some(score)
}

/// The common sink: track the entry, subscribe its tick stream with the TTL,
/// alert, and auto-trade when the entry qualifies.
pub fn process_discovery(app: &Arc<AppState>, entry: DiscoveryEntry, score: Option<&SignalScore>) {
    let config = app.config.read().clone();
    let ticker = entry.ticker.clone();

    app.ticks.subscribe(&ticker, Some(entry.expires_at));

    let alert_key = format!("discovery:{}:{}", entry.source, ticker);
    if entry.confidence >= 50 {
        app.notifier.notify(
            &alert_key,
            "discovery",
            Some(&ticker),
            &format!("{} surfaced {}", entry.source, ticker),
            &format!(
                "{} @ {:.2} — {} ({}%)",
                ticker, entry.price, entry.direction, entry.confidence
            ),
        );
    }

    let qualifies = entry.confidence >= config.auto_trade_min_confidence
        && entry.direction != SignalDirection::Neutral;

    app.discoveries.track(entry.clone());
    app.increment_version();

    if !qualifies {
        return;
    }
    let Some(score) = score else { return };
    let Some(direction) = entry.direction.trade_direction() else { return };

    let Some(setup) = build_setup(app, &ticker, direction, score) else {
        return;
    };

    app.journal
        .log_setup(setup.clone(), score.features.clone(), &score.signal_version);

    let losses = app.journal.consecutive_losses(&ticker, direction);
    if losses >= config.max_consecutive_losses {
        info!(
            ticker = %ticker,
            direction = %direction,
            losses,
            "auto entry refused — consecutive-loss guard"
        );
        return;
    }

    if let Some(trade) = app.journal.open_trade(
        &setup,
        setup.entry,
        Duration::minutes(config.paper_cooldown_minutes),
        &score.signal_version,
    ) {
        app.notifier.notify(
            &format!("trade-open:{}:{}", ticker, direction),
            "trade-open",
            Some(&ticker),
            &format!("Auto paper entry {ticker}"),
            &format!(
                "{} {} @ {:.2}, stop {:.2}, target {:.2} ({} shares)",
                direction, ticker, trade.entry_price, trade.stop, trade.target1, trade.shares
            ),
        );
        app.increment_version();
    }
}

/// Build a structure-snapped, ML-blended trade setup from a fresh score.
pub fn build_setup(
    app: &Arc<AppState>,
    ticker: &str,
    direction: TradeDirection,
    score: &SignalScore,
) -> Option<TradeSetup> {
    let facts = app.store.ticker(ticker)?;
    let technicals = facts.technicals.as_ref()?;
    let entry = facts.quote.last;
    let atr = technicals.atr;
    if entry <= 0.0 || atr <= 0.0 {
        return None;
    }

    let (atr_target, atr_stop) = match direction {
        TradeDirection::Long => (entry + AUTO_TARGET_ATR * atr, entry - AUTO_STOP_ATR * atr),
        TradeDirection::Short => (entry - AUTO_TARGET_ATR * atr, entry + AUTO_STOP_ATR * atr),
    };

    let snapped = structure::snap(
        entry,
        atr_target,
        atr_stop,
        direction,
        technicals,
        &facts.options.flow_per_strike,
        &facts.options.intraday_flow_per_strike,
    );

    let target2 = match direction {
        TradeDirection::Long => entry + AUTO_TARGET_ATR * 2.0 * atr,
        TradeDirection::Short => entry - AUTO_TARGET_ATR * 2.0 * atr,
    };

    let session = app.current_session();
    let horizon = session::horizon_for(session);
    let blend = app
        .ml
        .blend(score.confidence, &score.features, horizon.profile_key());

    Some(TradeSetup {
        ticker: ticker.to_string(),
        direction,
        entry,
        target1: snapped.target1,
        target2,
        stop: snapped.stop,
        risk_reward: risk_reward(entry, snapped.target1, snapped.stop),
        horizon,
        atr_multiplier: AUTO_TARGET_ATR,
        technical_confidence: blend.technical_confidence,
        ml_confidence: blend.ml_confidence,
        blended_confidence: blend.blended_confidence,
        kelly_pct: crate::journal::kelly::kelly_fraction(blend.blended_confidence),
        signals: score
            .signals
            .iter()
            .filter(|s| s.weight > 0.0)
            .map(|s| s.name.clone())
            .collect(),
        structure: Some(StructureSources {
            target_source: snapped.target_source,
            stop_source: snapped.stop_source,
        }),
        at: Utc::now(),
    })
}

/// Strongest weighted signal names from a score, for the entry card.
pub fn top_signals(score: &SignalScore, count: usize) -> Vec<String> {
    let mut weighted: Vec<(&String, f64)> = score
        .signals
        .iter()
        .filter(|s| s.weight > 0.0)
        .map(|s| (&s.name, s.weight))
        .collect();
    weighted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    weighted.into_iter().take(count).map(|(n, _)| n.clone()).collect()
}
