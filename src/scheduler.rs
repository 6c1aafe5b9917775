// =============================================================================
// Scheduler & Tier Orchestrator — the engine's heartbeat
// =============================================================================
//
// One cycle at a time, never preempted: classify the ET session, decide the
// data tier from the cycle counter (HOT every cycle, WARM every 5th, COLD
// every 15th; COLD wins when both line up), fan the provider calls out in
// parallel, then run the decision pipeline in order — merge, regime, TA,
// scoring, ML blend, journal lifecycle, gap pass — and finally persist the
// snapshot and bump the version so WebSocket clients get the push.
//
// The daily call budget (~15k) is enforced before a cycle starts: at 90% of
// the limit the whole cycle is skipped and logged. The count resets at ET
// midnight and survives restarts via `data/budget.json`.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::analyzer;
use crate::app_state::AppState;
use crate::discovery::{gaps, runner, scanner};
use crate::indicators::adx::latest_adx;
use crate::ml::TrainingSample;
use crate::persist;
use crate::regime::IndexTrend;
use crate::session;
use crate::sources::null_on_error;
use crate::types::{DataTier, Session};

/// Reference index for market-level trend inputs.
const INDEX_TICKER: &str = "SPY";

/// Persisted budget counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BudgetFile {
    date: String,
    calls: u64,
}

pub struct Scheduler {
    app: Arc<AppState>,
    budget_path: PathBuf,
    snapshot_path: PathBuf,
    /// Only one deferred scan in flight at a time.
    scan_lock: Arc<Mutex<()>>,
    /// ET date of the last intraday force-close pass.
    last_intraday_close: Mutex<String>,
}

impl Scheduler {
    pub fn new(app: Arc<AppState>) -> Self {
        let config = app.config.read();
        let budget_path = config.data_path("budget.json");
        let snapshot_path = config.data_path("state-snapshot.json");
        drop(config);

        // Restore the budget counter so a restart cannot double-spend.
        let saved: BudgetFile = persist::read_json_or_default(&budget_path);
        let today = session::eastern_date_string(session::now_eastern());
        if saved.date == today {
            app.call_counter.store(saved.calls, Ordering::Relaxed);
            let mut telemetry = app.scheduler.write();
            telemetry.daily_call_count = saved.calls;
            telemetry.last_reset_date = today;
        } else {
            app.scheduler.write().last_reset_date = today;
        }

        Self {
            app,
            budget_path,
            snapshot_path,
            scan_lock: Arc::new(Mutex::new(())),
            last_intraday_close: Mutex::new(String::new()),
        }
    }

    /// The main loop. Cooperative: the next cycle is scheduled only after
    /// the current one completes; an overrunning cycle simply delays it.
    pub async fn run(self: Arc<Self>) {
        info!("refresh loop starting");
        loop {
            let now_et = session::now_eastern();
            let session_label = session::classify(now_et);
            let interval_ms = session::refresh_interval_ms(session_label);

            {
                let mut telemetry = self.app.scheduler.write();
                telemetry.session = session_label;
                telemetry.session_interval_ms = interval_ms;
            }

            self.maybe_reset_budget(now_et);

            match self.skip_reason(now_et) {
                Some(reason) => {
                    debug!(%reason, "cycle skipped");
                    self.app.scheduler.write().last_skip_reason = Some(reason);
                }
                None => {
                    let started = std::time::Instant::now();
                    self.run_cycle(session_label, now_et).await;
                    let elapsed = started.elapsed().as_millis() as u64;
                    let mut telemetry = self.app.scheduler.write();
                    telemetry.last_cycle_ms = elapsed;
                    telemetry.last_skip_reason = None;
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_millis(interval_ms)).await;
        }
    }

    // ── Budget ──────────────────────────────────────────────────────────

    fn maybe_reset_budget(&self, now_et: DateTime<Tz>) {
        let today = session::eastern_date_string(now_et);
        let mut telemetry = self.app.scheduler.write();
        if telemetry.last_reset_date != today {
            info!(
                old = %telemetry.last_reset_date,
                new = %today,
                spent = telemetry.daily_call_count,
                "ET midnight — daily call budget reset"
            );
            telemetry.last_reset_date = today.clone();
            telemetry.daily_call_count = 0;
            self.app.call_counter.store(0, Ordering::Relaxed);
            drop(telemetry);
            self.persist_budget(&today, 0);
        }
    }

    fn persist_budget(&self, date: &str, calls: u64) {
        let file = BudgetFile { date: date.to_string(), calls };
        if let Err(e) = persist::write_json_atomic(&self.budget_path, &file) {
            warn!(error = %e, "failed to persist budget counter");
        }
    }

    fn skip_reason(&self, now_et: DateTime<Tz>) -> Option<String> {
        if session::is_weekend(now_et) {
            return Some("weekend — market closed".into());
        }

        let date = session::eastern_date_string(now_et);
        let market = self.app.store.market();
        if market.is_holiday(&date) {
            return Some(format!("market holiday {date}"));
        }
        if session::past_early_close(now_et, market.is_early_close(&date)) {
            return Some("past early close".into());
        }

        let config = self.app.config.read();
        let spent = self.app.call_counter.load(Ordering::Relaxed);
        let ceiling = (config.daily_call_limit as f64 * config.budget_ceiling) as u64;
        if spent >= ceiling {
            return Some(format!("budget ceiling: {spent}/{} calls", config.daily_call_limit));
        }

        None
    }

    // ── The cycle ───────────────────────────────────────────────────────

    async fn run_cycle(&self, session_label: Session, now_et: DateTime<Tz>) {
        let cycle = self.app.scheduler.read().cycle_count;
        let tier = DataTier::for_cycle(cycle);
        let watchlist = self.app.config.read().watchlist.clone();

        debug!(cycle, %tier, session = %session_label, "cycle start");

        // ── 1. Fetch: market-wide plus per-ticker fan-out ───────────────
        self.fetch_market(tier).await;

        let discovered: Vec<String> = self
            .app
            .discoveries
            .entries()
            .into_iter()
            .map(|e| e.ticker)
            .collect();
        let mut all_tickers = watchlist.clone();
        for t in discovered {
            if !all_tickers.contains(&t) {
                all_tickers.push(t);
            }
        }

        let fetches = all_tickers.iter().map(|ticker| {
            let app = self.app.clone();
            let ticker = ticker.clone();
            async move {
                fetch_ticker(&app, &ticker, tier).await;
            }
        });
        join_all(fetches).await;

        // ── 2. Regime from the index ────────────────────────────────────
        let index_trend = self.index_trend();
        let market = self.app.store.market();
        self.app.regime.update(&market, index_trend);

        // ── 3. TA + scoring per ticker; one failure never stops the rest ─
        for ticker in &all_tickers {
            let technicals = self
                .app
                .store
                .ticker(ticker)
                .and_then(|f| f.candles.get("1d").cloned())
                .and_then(|c| analyzer::analyze(&c));
            self.app
                .store
                .update_ticker(ticker, |t| t.technicals = technicals.clone());

            crate::discovery::score_existing(&self.app, ticker);
        }

        // ── 4. Journal lifecycle ────────────────────────────────────────
        let prices = self.app.last_prices();
        self.app.journal.update_unrealized(&prices);
        let closed = self.app.journal.check_outcomes(&prices);
        self.label_closed_trades(&closed);

        if session::is_intraday_close_window(now_et) {
            let date = session::eastern_date_string(now_et);
            let mut last = self.last_intraday_close.lock().await;
            if *last != date {
                *last = date;
                let forced = self.app.journal.close_intraday(&prices);
                if !forced.is_empty() {
                    info!(count = forced.len(), "intraday trades force-closed at 15:55 ET");
                    self.label_closed_trades(&forced);
                }
            }
        }

        // ── 5. Discovery post-processing ────────────────────────────────
        gaps::run_gap_pass(&self.app);

        if tier == DataTier::Hot {
            self.spawn_deferred_scan();
        }
        if tier == DataTier::Warm {
            runner::run_volatility_scan(&self.app).await;
        }

        // ── 6. Daily brief, once per session ────────────────────────────
        self.maybe_send_brief(session_label, now_et);

        // ── 7. Telemetry, persistence, broadcast ────────────────────────
        let calls = self.app.call_counter.load(Ordering::Relaxed);
        {
            let mut telemetry = self.app.scheduler.write();
            telemetry.cycle_count = cycle + 1;
            telemetry.daily_call_count = calls;
        }
        let date = session::eastern_date_string(now_et);
        self.persist_budget(&date, calls);

        if let Err(e) = self.app.store.save(&self.snapshot_path) {
            warn!(error = %e, "failed to persist state snapshot");
            self.app.push_error("scheduler", format!("snapshot persist failed: {e}"));
        }

        self.app.increment_version();
        debug!(cycle, calls, "cycle complete");
    }

    // ── Pieces ──────────────────────────────────────────────────────────

    /// Attach training labels to freshly closed trades by joining back to
    /// the setup records that produced them.
    fn label_closed_trades(&self, closed: &[crate::journal::PaperTrade]) {
        for trade in closed {
            let features = self
                .app
                .journal
                .setups()
                .into_iter()
                .filter(|r| {
                    r.setup.ticker == trade.ticker
                        && r.setup.direction == trade.direction
                        && (trade.entry_time - r.at).num_minutes().abs() <= 5
                })
                .map(|r| r.features)
                .next_back();
            let Some(features) = features else { continue };

            let horizon = trade.horizon.profile_key();
            let horizon = if horizon == "swing" { "swing" } else { "day" };
            self.app.ml.add_sample(TrainingSample {
                features,
                label: (trade.pnl_points.unwrap_or(0.0) > 0.0) as u8,
                confidence: trade.confidence,
                pnl_pct: trade.pnl_pct.unwrap_or(0.0),
                horizon: horizon.to_string(),
                at: Utc::now(),
            });
        }
    }

    fn index_trend(&self) -> IndexTrend {
        self.app
            .store
            .ticker(INDEX_TICKER)
            .and_then(|f| f.candles.get("1d").cloned())
            .and_then(|candles| latest_adx(&candles, 14))
            .map(|adx| IndexTrend {
                adx: adx.adx,
                plus_di: adx.plus_di,
                minus_di: adx.minus_di,
            })
            .unwrap_or_default()
    }

    /// The scanner runs 60 s after a HOT cycle so the provider's rate window
    /// can reset. At most one deferred scan is in flight.
    fn spawn_deferred_scan(&self) {
        let app = self.app.clone();
        let lock = self.scan_lock.clone();
        let defer_secs = self.app.config.read().scanner_defer_secs;
        tokio::spawn(async move {
            let Ok(_guard) = lock.try_lock() else { return };
            tokio::time::sleep(tokio::time::Duration::from_secs(defer_secs)).await;
            scanner::run_scan(&app).await;
        });
    }

    fn maybe_send_brief(&self, session_label: Session, now_et: DateTime<Tz>) {
        let date = session::eastern_date_string(now_et);
        let stats = self.app.journal.stats(None);
        let regime = self
            .app
            .regime
            .current()
            .map(|r| r.regime.to_string())
            .unwrap_or_else(|| "unknown".into());
        let content = format!(
            "regime {regime}; {} pending trades; {} closed all-time ({:.0}% win rate)",
            self.app.journal.pending().len(),
            stats.total_trades,
            stats.win_rate * 100.0
        );
        self.app.notifier.send_brief(&date, session_label, &content);
    }

    async fn fetch_market(&self, tier: DataTier) {
        let app = &self.app;
        let provider = app.provider.clone();
        let name = provider.name();

        // HOT essentials every cycle.
        let (tide, vix) = tokio::join!(provider.market_tide(), provider.vix());
        if let Some(tide) = null_on_error(name, "market_tide", tide) {
            app.store.update_market(|m| m.market_tide = Some(tide));
        }
        if let Some(vix) = null_on_error(name, "vix", vix) {
            app.store.update_market(|m| m.vix = Some(vix));
        }

        if tier == DataTier::Warm || tier == DataTier::Cold {
            let (sectors, etfs, impact, news, breadth) = tokio::join!(
                provider.sector_tides(),
                provider.etf_tides(),
                provider.top_net_impact(),
                provider.news(),
                provider.breadth(),
            );
            if let Some(sectors) = null_on_error(name, "sector_tides", sectors) {
                app.store.update_market(|m| m.sector_tides = sectors.into_iter().collect());
            }
            if let Some(etfs) = null_on_error(name, "etf_tides", etfs) {
                app.store.update_market(|m| m.etf_tides = etfs.into_iter().collect());
            }
            if let Some(impact) = null_on_error(name, "top_net_impact", impact) {
                app.store.update_market(|m| m.top_net_impact = impact);
            }
            if let Some(news) = null_on_error(name, "news", news) {
                app.store.update_market(|m| m.news.extend(news));
            }
            if let Some(breadth) = null_on_error(name, "breadth", breadth) {
                app.store.update_market(|m| m.breadth = Some(breadth));
            }
        }

        if tier == DataTier::Cold {
            let (econ, fda, congress, holidays) = tokio::join!(
                provider.economic_calendar(),
                provider.fda_calendar(),
                provider.congress_trades(),
                provider.market_holidays(),
            );
            if let Some(econ) = null_on_error(name, "economic_calendar", econ) {
                app.store.update_market(|m| m.economic_calendar = econ);
            }
            if let Some(fda) = null_on_error(name, "fda_calendar", fda) {
                app.store.update_market(|m| m.fda_calendar = fda);
            }
            if let Some(congress) = null_on_error(name, "congress_trades", congress) {
                app.store.update_market(|m| m.congress_trades = congress);
            }
            if let Some(holidays) = null_on_error(name, "market_holidays", holidays) {
                app.store.update_market(|m| m.holidays = holidays);
            }
        }
    }
}

/// Per-ticker fetch for one tier. Every call is independent and optional;
/// a failure leaves the previous entry intact.
pub async fn fetch_ticker(app: &Arc<AppState>, ticker: &str, tier: DataTier) {
    let provider = app.provider.clone();
    let name = provider.name();

    // ── HOT: quote, flow, dark pool, GEX, tight candles ─────────────────
    let (quote, flow, dark_pool, gex, daily, intraday) = tokio::join!(
        provider.quote(ticker),
        provider.flow_alerts(ticker),
        provider.dark_pool(ticker),
        provider.gex_per_strike(ticker),
        provider.candles(ticker, "1d", 120),
        provider.candles(ticker, "5m", 100),
    );

    if let Some(quote) = null_on_error(name, "quote", quote) {
        app.store.update_ticker(ticker, |t| t.quote.merge(quote));
    }
    if let Some(flow) = null_on_error(name, "flow_alerts", flow) {
        app.store.update_ticker(ticker, |t| {
            t.options.flow_alerts = flow;
            t.options.updated_at = Some(Utc::now());
        });
    }
    if let Some(dp) = null_on_error(name, "dark_pool", dark_pool) {
        app.store.update_ticker(ticker, |t| t.dark_pool = dp);
    }
    if let Some(gex) = null_on_error(name, "gex_per_strike", gex) {
        app.store.update_ticker(ticker, |t| t.options.gex_per_strike = gex);
    }
    if let Some(candles) = null_on_error(name, "candles_1d", daily) {
        app.store.set_candles(ticker, "1d", candles);
    }
    if let Some(candles) = null_on_error(name, "candles_5m", intraday) {
        app.store.set_candles(ticker, "5m", candles);
    }
    if let Some(np) = null_on_error(name, "net_premium", provider.net_premium(ticker).await) {
        app.store.update_ticker(ticker, |t| t.options.net_premium = Some(np));
    }

    // ── WARM: positioning and vol surfaces ──────────────────────────────
    if tier == DataTier::Warm || tier == DataTier::Cold {
        let (iv_rank, skew, max_pain, oi, greeks, spot_gamma, nope, strikes, intraday_strikes, expiries) = tokio::join!(
            provider.iv_rank(ticker),
            provider.iv_skew(ticker),
            provider.max_pain(ticker),
            provider.oi_change(ticker),
            provider.greek_exposure(ticker),
            provider.spot_gamma(ticker),
            provider.nope(ticker),
            provider.flow_per_strike(ticker),
            provider.intraday_flow_per_strike(ticker),
            provider.flow_per_expiry(ticker),
        );

        app.store.update_ticker(ticker, |t| {
            if let Some(v) = null_on_error(name, "iv_rank", iv_rank) {
                t.options.iv_rank = Some(v);
            }
            if let Some(v) = null_on_error(name, "iv_skew", skew) {
                t.options.iv_skew = Some(v);
            }
            if let Some(v) = null_on_error(name, "max_pain", max_pain) {
                t.options.max_pain = Some(v);
            }
            if let Some(v) = null_on_error(name, "oi_change", oi) {
                t.options.oi_change = Some(v);
            }
            if let Some(v) = null_on_error(name, "greek_exposure", greeks) {
                t.options.greek_exposure = Some(v);
            }
            if let Some(v) = null_on_error(name, "spot_gamma", spot_gamma) {
                t.options.spot_gamma = Some(v);
            }
            if let Some(v) = null_on_error(name, "nope", nope) {
                t.options.nope = Some(v);
            }
            if let Some(v) = null_on_error(name, "flow_per_strike", strikes) {
                t.options.flow_per_strike = v;
            }
            if let Some(v) = null_on_error(name, "intraday_flow_per_strike", intraday_strikes) {
                t.options.intraday_flow_per_strike = v;
            }
            if let Some(v) = null_on_error(name, "flow_per_expiry", expiries) {
                t.options.flow_per_expiry = v;
            }
            t.options.updated_at = Some(Utc::now());
        });
    }

    // ── COLD: slow-moving positioning and fundamentals ──────────────────
    if tier == DataTier::Cold {
        let (si, insider, earnings, rv, term, analyst, inst, mcap) = tokio::join!(
            provider.short_interest(ticker),
            provider.insider_transactions(ticker),
            provider.earnings_enriched(ticker),
            provider.realized_vol(ticker),
            provider.term_structure(ticker),
            provider.analyst_summary(ticker),
            provider.institutional_ownership(ticker),
            provider.market_cap(ticker),
        );

        app.store.update_ticker(ticker, |t| {
            if let Some(v) = null_on_error(name, "short_interest", si) {
                t.fundamentals.short_interest_pct = Some(v);
            }
            if let Some(v) = null_on_error(name, "insider_transactions", insider) {
                t.fundamentals.insider_transactions = v;
            }
            if let Some(v) = null_on_error(name, "earnings_enriched", earnings) {
                t.fundamentals.earnings = Some(v);
            }
            if let Some(v) = null_on_error(name, "realized_vol", rv) {
                t.options.realized_vol = Some(v);
            }
            if let Some(v) = null_on_error(name, "term_structure", term) {
                t.options.term_structure = v;
            }
            if let Some((rating, target)) = null_on_error(name, "analyst_summary", analyst) {
                t.fundamentals.analyst_rating = Some(rating);
                t.fundamentals.analyst_target = Some(target);
            }
            if let Some(v) = null_on_error(name, "institutional_ownership", inst) {
                t.fundamentals.institutional_ownership_pct = Some(v);
            }
            if let Some(v) = null_on_error(name, "market_cap", mcap) {
                t.fundamentals.market_cap = Some(v);
            }
            t.fundamentals.updated_at = Some(Utc::now());
        });
    }
}
