// =============================================================================
// Meridian Desk — Main Entry Point
// =============================================================================
//
// Real-time trading intelligence engine: tiered data refresh, multi-signal
// scoring with ML calibration, paper-trade journaling, and a discovery
// pipeline, all behind one axum REST + WebSocket surface.
//
// The engine never routes real orders — every trade is paper.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analyzer;
mod api;
mod app_state;
mod discovery;
mod eod;
mod indicators;
mod journal;
mod ml;
mod notifier;
mod persist;
mod regime;
mod runtime_config;
mod scheduler;
mod session;
mod signals;
mod sources;
mod state;
mod structure;
mod types;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use anyhow::Context;
use parking_lot::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::discovery::halts::{HaltWatcher, DEFAULT_FEED_URL};
use crate::discovery::DiscoveryBook;
use crate::journal::PaperJournal;
use crate::ml::MlCalibrator;
use crate::notifier::{Notifier, NotifierEndpoints};
use crate::regime::RegimeDetector;
use crate::runtime_config::EngineConfig;
use crate::scheduler::Scheduler;
use crate::signals::versions::SignalVersions;
use crate::signals::SignalEngine;
use crate::sources::rest::RestProvider;
use crate::sources::tick_stream::{self, TickStreamManager};
use crate::state::StateStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Meridian Desk — Starting Up                       ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = EngineConfig::load("data/engine-config.json").unwrap_or_else(|e| {
        warn!(error = %e, "no engine config on disk — using defaults");
        EngineConfig::default()
    });

    if let Ok(tickers) = std::env::var("MERIDIAN_TICKERS") {
        config.apply_ticker_env(&tickers);
    }
    info!(watchlist = ?config.watchlist, "configured watchlist");

    // ── 2. Build shared components ───────────────────────────────────────
    let call_counter = Arc::new(AtomicU64::new(0));
    let api_key = std::env::var("MARKET_API_KEY").unwrap_or_default();
    let api_base =
        std::env::var("MARKET_API_BASE").unwrap_or_else(|_| "https://api.marketdata.example".into());
    let provider = Arc::new(RestProvider::new(api_base, &api_key, call_counter.clone()));

    let store = Arc::new(StateStore::load(config.data_path("state-snapshot.json")));
    let ticks = TickStreamManager::new();
    for ticker in &config.watchlist {
        ticks.subscribe(ticker, None);
    }

    let versions = SignalVersions::load_or_default(config.data_path("signal-versions.json"));
    let engine = Arc::new(SignalEngine::new(versions));
    let regime = Arc::new(RegimeDetector::new());
    let ml = Arc::new(MlCalibrator::load(config.data_path("ml-training-cumulative.json")));
    let journal = Arc::new(PaperJournal::load(
        config.data_path("paper-journal.json"),
        config.risk_budget_usd,
    ));
    let options_journal = Arc::new(PaperJournal::load(
        config.data_path("options-paper-journal.json"),
        config.risk_budget_usd,
    ));
    let discoveries = Arc::new(DiscoveryBook::load(config.data_path("scanner-performance.json")));
    let notifier = Arc::new(Notifier::new(
        config.alert_cooldown_minutes,
        NotifierEndpoints::from_env(),
    ));
    let (alert_tx, _) = tokio::sync::broadcast::channel(64);

    let state = Arc::new(AppState {
        state_version: AtomicU64::new(1),
        ws_sequence: AtomicU64::new(0),
        config: RwLock::new(config),
        store,
        ticks: ticks.clone(),
        provider,
        call_counter,
        engine,
        regime,
        ml,
        journal,
        options_journal,
        discoveries,
        notifier,
        alert_tx,
        scheduler: RwLock::new(Default::default()),
        recent_errors: RwLock::new(Vec::new()),
        start_time: std::time::Instant::now(),
    });

    // ── 3. Bind the API server up front — a taken port is fatal ─────────
    let port = std::env::var("MERIDIAN_PORT").unwrap_or_else(|_| "3400".into());
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let api_state = state.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    // ── 4. Tick stream subscriber ────────────────────────────────────────
    if let Ok(url) = std::env::var("TICK_STREAM_URL") {
        let manager = ticks.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = tick_stream::run_tick_stream(&url, &manager).await {
                    error!(error = %e, "tick stream error — reconnecting in 5s");
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        });
    } else {
        warn!("TICK_STREAM_URL not set — tape signals will stay dark");
    }

    if std::env::var("TRADINGVIEW_WEBHOOK_SECRET").unwrap_or_default().is_empty() {
        warn!("TRADINGVIEW_WEBHOOK_SECRET not set — /webhook/tradingview will reject all posts");
    }

    // ── 5. Halt-feed poller (60 s) ───────────────────────────────────────
    {
        let halt_state = state.clone();
        let feed_url =
            std::env::var("HALT_FEED_URL").unwrap_or_else(|_| DEFAULT_FEED_URL.to_string());
        tokio::spawn(async move {
            let watcher = HaltWatcher::new(feed_url);
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                discovery::halts::poll_once(&halt_state, &watcher).await;
            }
        });
    }

    // ── 6. Discovery TTL sweep ───────────────────────────────────────────
    {
        let sweep_state = state.clone();
        let sweep_minutes = sweep_state.config.read().discovery_sweep_minutes;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(sweep_minutes * 60));
            loop {
                interval.tick().await;
                let now = chrono::Utc::now();
                let prices = sweep_state.last_prices();
                let expired = sweep_state.discoveries.sweep(now, &prices);
                let dropped = sweep_state.ticks.expire_subscriptions(now);
                if !expired.is_empty() || !dropped.is_empty() {
                    info!(expired = expired.len(), unsubscribed = dropped.len(), "discovery sweep");
                    sweep_state.increment_version();
                }
            }
        });
    }

    // ── 7. Nightly retrain + EOD report (17:00 ET) ───────────────────────
    {
        let nightly_state = state.clone();
        tokio::spawn(async move {
            let mut last_run = String::new();
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let now_et = session::now_eastern();
                let date = session::eastern_date_string(now_et);
                if session::is_retrain_window(now_et) && last_run != date {
                    last_run = date.clone();
                    info!("nightly pass — retraining classifiers and writing the EOD report");
                    nightly_state.ml.retrain_all();
                    let report = eod::generate_report(&nightly_state.journal, &date);
                    let data_dir = nightly_state.config.read().data_dir.clone();
                    if let Err(e) = eod::save_report(&data_dir, &report) {
                        warn!(error = %e, "failed to save EOD report");
                    }
                    nightly_state.increment_version();
                }
            }
        });
    }

    // ── 8. The refresh loop ──────────────────────────────────────────────
    let scheduler = Arc::new(Scheduler::new(state.clone()));
    {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            scheduler.run().await;
        });
    }

    info!("all subsystems running — ctrl-c to stop");

    // ── 9. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — persisting state");

    let snapshot_path = state.config.read().data_path("state-snapshot.json");
    if let Err(e) = state.store.save(&snapshot_path) {
        error!(error = %e, "failed to persist state snapshot on shutdown");
    }
    let config_path = state.config.read().data_path("engine-config.json");
    if let Err(e) = state.config.read().save(&config_path) {
        error!(error = %e, "failed to persist engine config on shutdown");
    }
    let versions_path = state.config.read().data_path("signal-versions.json");
    if let Err(e) = state.engine.versions().save(&versions_path) {
        error!(error = %e, "failed to persist signal versions on shutdown");
    }

    info!("Meridian Desk shut down complete");
    Ok(())
}
