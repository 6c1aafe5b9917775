// =============================================================================
// REST API — the dashboard's read/write surface
// =============================================================================
//
// Reads serve cloned snapshots; writes go through the same serialization
// discipline as the refresh loop (component locks) and bump the state
// version so connected WebSocket clients get the push. Internal errors map
// to `{ "error": msg }` with a 4xx/5xx status — never a stack trace.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Duration;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::analyzer;
use crate::app_state::AppState;
use crate::discovery::{build_setup, runner, score_candidate};
use crate::eod;
use crate::journal::{backtest, risk_reward, TradeSetup};
use crate::session;
use crate::sources::null_on_error;
use crate::types::{canonical_ticker, DiscoverySource, Horizon, TradeDirection};

const VALID_TIMEFRAMES: [&str; 6] = ["1m", "5m", "15m", "1h", "4h", "1d"];

type ApiError = (StatusCode, Json<serde_json::Value>);

fn bad_request(msg: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": msg.into() })),
    )
}

fn not_found(msg: impl Into<String>) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": msg.into() })),
    )
}

/// Build the full router with CORS and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Reads ───────────────────────────────────────────────────────
        .route("/api/health", get(health))
        .route("/api/state", get(full_state))
        .route("/api/tickers", get(get_tickers))
        .route("/api/technicals/:ticker/:timeframe", get(technicals))
        .route("/api/ticker/:ticker/deep", get(ticker_deep))
        .route("/api/signals/:ticker", get(signals))
        .route("/api/regime", get(regime))
        .route("/api/correlation", get(correlation))
        .route("/api/scanner", get(scanner_entries))
        .route("/api/x-alerts", get(x_alerts))
        .route("/api/gaps", get(gap_reports))
        .route("/api/halts", get(halt_entries))
        .route("/api/paper-trades", get(paper_trades).post(open_paper_trade))
        .route("/api/paper-trades/stats", get(paper_stats))
        .route("/api/paper-trades/close", post(close_paper_trade))
        .route("/api/options-paper/trades", get(options_trades))
        .route("/api/options-paper/stats", get(options_stats))
        .route("/api/options-paper/open", post(open_options_trade))
        .route("/api/options-paper/close", post(close_options_trade))
        .route("/api/options-paper/auto-enter/:ticker", post(options_auto_enter))
        .route("/api/journal/stats", get(journal_stats))
        .route("/api/ml/status", get(ml_status))
        .route("/api/ml/retrain", post(ml_retrain))
        .route("/api/ml/weights/confirm", post(ml_confirm_weights))
        .route("/api/eod-reports", get(eod_reports))
        .route("/api/eod-report/:date", get(eod_report))
        .route("/api/eod-report/generate", post(eod_generate))
        .route("/api/budget", get(budget))
        .route("/api/discovery-performance", get(discovery_performance))
        // ── Writes ──────────────────────────────────────────────────────
        .route("/api/tickers", post(mutate_tickers))
        .route("/api/backtest", post(run_backtest))
        .route("/api/validate-ticker", post(validate_ticker))
        .route("/api/scan-low-float", post(scan_low_float))
        .route("/api/chat", post(chat))
        // ── Webhooks & WS ───────────────────────────────────────────────
        .route("/webhook/tradingview", post(crate::api::webhooks::tradingview))
        .route("/webhook/x-alert", post(crate::api::webhooks::x_alert))
        .route("/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Reads
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "state_version": state.current_version(),
        "server_time": chrono::Utc::now().timestamp_millis(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

async fn full_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

async fn get_tickers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.read().watchlist.clone())
}

async fn technicals(
    State(state): State<Arc<AppState>>,
    Path((ticker, timeframe)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let ticker = canonical_ticker(&ticker).ok_or_else(|| bad_request("invalid ticker"))?;
    if !VALID_TIMEFRAMES.contains(&timeframe.as_str()) {
        return Err(bad_request(format!(
            "invalid timeframe '{timeframe}' — expected one of {VALID_TIMEFRAMES:?}"
        )));
    }

    // Serve from stored candles, fetching once when the timeframe is cold.
    let mut candles = state
        .store
        .ticker(&ticker)
        .and_then(|f| f.candles.get(&timeframe).cloned());
    if candles.is_none() {
        let provider = state.provider.clone();
        if let Some(fetched) = null_on_error(
            provider.name(),
            "candles",
            provider.candles(&ticker, &timeframe, 120).await,
        ) {
            state.store.set_candles(&ticker, &timeframe, fetched.clone());
            candles = Some(fetched);
        }
    }

    let Some(candles) = candles else {
        return Err(not_found(format!("no candles for {ticker} {timeframe}")));
    };

    match analyzer::analyze(&candles) {
        Some(ta) => Ok(Json(serde_json::json!({
            "ticker": ticker,
            "timeframe": timeframe,
            "technicals": ta,
        }))),
        None => Ok(Json(serde_json::json!({
            "ticker": ticker,
            "timeframe": timeframe,
            "technicals": null,
            "message": format!("insufficient data: {} candles (need 30)", candles.len()),
        }))),
    }
}

async fn ticker_deep(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ticker = canonical_ticker(&ticker).ok_or_else(|| bad_request("invalid ticker"))?;
    let facts = state
        .store
        .ticker(&ticker)
        .ok_or_else(|| not_found(format!("unknown ticker {ticker}")))?;
    Ok(Json(serde_json::json!({
        "ticker": ticker,
        "facts": facts,
        "tick_summary": state.ticks.summary(&ticker),
        "discovery": state.discoveries.get(&ticker),
    })))
}

async fn signals(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ticker = canonical_ticker(&ticker).ok_or_else(|| bad_request("invalid ticker"))?;
    let score = state
        .store
        .ticker(&ticker)
        .and_then(|f| f.last_score)
        .ok_or_else(|| not_found(format!("no score for {ticker} yet")))?;
    Ok(Json(score))
}

async fn regime(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.regime.current() {
        Some(rs) => Json(serde_json::json!(rs)).into_response(),
        None => Json(serde_json::json!({ "regime": null, "message": "no regime data yet" }))
            .into_response(),
    }
}

/// Pairwise correlation of daily returns across the watchlist.
async fn correlation(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let watchlist = state.config.read().watchlist.clone();
    let mut returns: HashMap<String, Vec<f64>> = HashMap::new();

    for ticker in &watchlist {
        if let Some(candles) = state.store.ticker(ticker).and_then(|f| f.candles.get("1d").cloned()) {
            let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
            if closes.len() >= 30 {
                let rets: Vec<f64> = closes
                    .windows(2)
                    .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
                    .collect();
                returns.insert(ticker.clone(), rets);
            }
        }
    }

    let mut matrix: HashMap<String, HashMap<String, f64>> = HashMap::new();
    for (a, ra) in &returns {
        for (b, rb) in &returns {
            let corr = pearson(ra, rb);
            matrix.entry(a.clone()).or_default().insert(b.clone(), corr);
        }
    }
    Json(matrix)
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let (a, b) = (&a[a.len() - n..], &b[b.len() - n..]);
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

async fn scanner_entries(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.discoveries.entries())
}

async fn x_alerts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let alerts: Vec<_> = state
        .notifier
        .recent()
        .into_iter()
        .filter(|a| a.kind == "x-alert" || a.kind == "tradingview")
        .collect();
    Json(alerts)
}

async fn gap_reports(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.discoveries.gap_reports())
}

async fn halt_entries(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let halts: Vec<_> = state
        .discoveries
        .entries()
        .into_iter()
        .filter(|e| e.source == DiscoverySource::HaltResume)
        .collect();
    Json(halts)
}

async fn paper_trades(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.journal.trades())
}

async fn paper_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "overall": state.journal.stats(None),
        "by_version": state.journal.stats_by_version(),
    }))
}

async fn options_trades(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.options_journal.trades())
}

async fn options_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.options_journal.stats(None))
}

async fn journal_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "trades": state.journal.stats(None),
        "setups_logged": state.journal.setups().len(),
    }))
}

async fn ml_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": state.ml.status(),
        "suggested_weights": state.ml.suggested_weights(),
        "active_version": state.engine.active_version_key(),
    }))
}

async fn eod_reports(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let data_dir = state.config.read().data_dir.clone();
    Json(eod::list_reports(&data_dir))
}

async fn eod_report(
    State(state): State<Arc<AppState>>,
    Path(date): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let data_dir = state.config.read().data_dir.clone();
    eod::load_report(&data_dir, &date)
        .map(Json)
        .ok_or_else(|| not_found(format!("no report for {date}")))
}

async fn budget(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let telemetry = state.scheduler.read().clone();
    let limit = state.config.read().daily_call_limit;
    Json(serde_json::json!({
        "daily_call_count": telemetry.daily_call_count,
        "daily_limit": limit,
        "last_reset_date": telemetry.last_reset_date,
        "cycle_count": telemetry.cycle_count,
        "session": telemetry.session,
        "session_interval_ms": telemetry.session_interval_ms,
        "last_skip_reason": telemetry.last_skip_reason,
    }))
}

async fn discovery_performance(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.discoveries.outcomes())
}

// =============================================================================
// Writes
// =============================================================================

#[derive(Deserialize)]
struct TickerMutation {
    ticker: String,
    /// "add" | "remove"
    action: String,
}

async fn mutate_tickers(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TickerMutation>,
) -> Result<impl IntoResponse, ApiError> {
    let ticker = canonical_ticker(&req.ticker).ok_or_else(|| bad_request("invalid ticker"))?;

    let (watchlist, config_path) = {
        let mut config = state.config.write();
        match req.action.as_str() {
            "add" => {
                if !config.watchlist.contains(&ticker) {
                    config.watchlist.push(ticker.clone());
                }
            }
            "remove" => {
                config.watchlist.retain(|t| t != &ticker);
            }
            other => return Err(bad_request(format!("invalid action '{other}'"))),
        }
        (config.watchlist.clone(), config.data_path("engine-config.json"))
    };

    // Keep tick subscriptions in step with the watchlist.
    match req.action.as_str() {
        "add" => state.ticks.subscribe(&ticker, None),
        _ => {
            state.ticks.unsubscribe(&ticker);
            state.store.remove_ticker(&ticker);
        }
    }

    if let Err(e) = state.config.read().save(&config_path) {
        warn!(error = %e, "failed to persist watchlist change");
    }
    // Also keep the plain watchlist file for external tooling.
    let watchlist_path = state.config.read().data_path("watchlist.json");
    if let Err(e) = crate::persist::write_json_atomic(&watchlist_path, &watchlist) {
        warn!(error = %e, "failed to persist watchlist file");
    }

    info!(ticker = %ticker, action = %req.action, "watchlist mutated");
    state.increment_version();
    Ok(Json(serde_json::json!({ "watchlist": watchlist })))
}

#[derive(Deserialize)]
struct ManualTradeRequest {
    ticker: String,
    /// "long" | "short"
    direction: String,
    entry: f64,
    stop: f64,
    target1: f64,
    #[serde(default)]
    target2: Option<f64>,
    #[serde(default)]
    horizon: Option<String>,
}

fn parse_direction(raw: &str) -> Result<TradeDirection, ApiError> {
    match raw {
        "long" => Ok(TradeDirection::Long),
        "short" => Ok(TradeDirection::Short),
        other => Err(bad_request(format!("invalid direction '{other}'"))),
    }
}

fn parse_horizon(raw: Option<&str>) -> Horizon {
    match raw {
        Some("scalp") => Horizon::Scalp,
        Some("swing") => Horizon::Swing,
        Some("day-volatile") => Horizon::DayVolatile,
        Some("intraday") => Horizon::Intraday,
        Some("extended-hours") => Horizon::ExtendedHours,
        _ => Horizon::Day,
    }
}

fn manual_setup(req: &ManualTradeRequest, direction: TradeDirection) -> Result<TradeSetup, ApiError> {
    if req.entry <= 0.0 {
        return Err(bad_request("entry must be positive"));
    }
    let profit_side_ok = match direction {
        TradeDirection::Long => req.target1 > req.entry && req.stop < req.entry,
        TradeDirection::Short => req.target1 < req.entry && req.stop > req.entry,
    };
    if !profit_side_ok {
        return Err(bad_request("target1 must be on the profit side and stop on the loss side"));
    }

    let ticker = canonical_ticker(&req.ticker).ok_or_else(|| bad_request("invalid ticker"))?;
    let target2 = req.target2.unwrap_or_else(|| match direction {
        TradeDirection::Long => req.entry + (req.target1 - req.entry) * 2.0,
        TradeDirection::Short => req.entry - (req.entry - req.target1) * 2.0,
    });

    Ok(TradeSetup {
        ticker,
        direction,
        entry: req.entry,
        target1: req.target1,
        target2,
        stop: req.stop,
        risk_reward: risk_reward(req.entry, req.target1, req.stop),
        horizon: parse_horizon(req.horizon.as_deref()),
        atr_multiplier: 0.0,
        technical_confidence: 50,
        ml_confidence: None,
        blended_confidence: 50,
        kelly_pct: crate::journal::kelly::kelly_fraction(50),
        signals: vec!["manual".to_string()],
        structure: None,
        at: chrono::Utc::now(),
    })
}

async fn open_paper_trade(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ManualTradeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let direction = parse_direction(&req.direction)?;
    let setup = manual_setup(&req, direction)?;
    let cooldown = Duration::minutes(state.config.read().paper_cooldown_minutes);
    let version = state.engine.active_version_key();

    match state.journal.open_trade(&setup, setup.entry, cooldown, &version) {
        Some(trade) => {
            state.increment_version();
            Ok(Json(trade))
        }
        None => Err(bad_request("entry refused — pending trade or cooldown on this pair")),
    }
}

#[derive(Deserialize)]
struct CloseRequest {
    id: String,
    #[serde(default)]
    price: Option<f64>,
}

async fn close_paper_trade(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CloseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    close_in(&state, &state.journal, req).await
}

async fn open_options_trade(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ManualTradeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let direction = parse_direction(&req.direction)?;
    let setup = manual_setup(&req, direction)?;
    let cooldown = Duration::minutes(state.config.read().paper_cooldown_minutes);
    let version = state.engine.active_version_key();

    match state.options_journal.open_trade(&setup, setup.entry, cooldown, &version) {
        Some(trade) => {
            state.increment_version();
            Ok(Json(trade))
        }
        None => Err(bad_request("entry refused — pending trade or cooldown on this pair")),
    }
}

async fn close_options_trade(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CloseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    close_in(&state, &state.options_journal, req).await
}

async fn close_in(
    state: &Arc<AppState>,
    journal: &Arc<crate::journal::PaperJournal>,
    req: CloseRequest,
) -> Result<Json<crate::journal::PaperTrade>, ApiError> {
    let price = match req.price {
        Some(p) if p > 0.0 => p,
        _ => {
            let ticker = journal
                .pending()
                .into_iter()
                .find(|t| t.id == req.id)
                .map(|t| t.ticker)
                .ok_or_else(|| not_found("no pending trade with that id"))?;
            *state
                .last_prices()
                .get(&ticker)
                .ok_or_else(|| bad_request("no live price — pass one explicitly"))?
        }
    };

    match journal.close_manual(&req.id, price) {
        Some(trade) => {
            state.increment_version();
            Ok(Json(trade))
        }
        None => Err(not_found("no pending trade with that id")),
    }
}

async fn options_auto_enter(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ticker = canonical_ticker(&ticker).ok_or_else(|| bad_request("invalid ticker"))?;
    let score = score_candidate(&state, &ticker)
        .await
        .ok_or_else(|| bad_request("could not score ticker"))?;
    let direction = score
        .direction
        .trade_direction()
        .ok_or_else(|| bad_request("score is neutral — nothing to enter"))?;
    let setup = build_setup(&state, &ticker, direction, &score)
        .ok_or_else(|| bad_request("no setup could be built (missing technicals)"))?;

    let cooldown = Duration::minutes(state.config.read().paper_cooldown_minutes);
    match state
        .options_journal
        .open_trade(&setup, setup.entry, cooldown, &score.signal_version)
    {
        Some(trade) => {
            state.increment_version();
            Ok(Json(trade))
        }
        None => Err(bad_request("entry refused — pending trade or cooldown on this pair")),
    }
}

#[derive(Deserialize)]
struct BacktestRequest {
    ticker: String,
    #[serde(default)]
    timeframe: Option<String>,
    /// "day" | "swing"
    #[serde(default)]
    horizon: Option<String>,
}

async fn run_backtest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BacktestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ticker = canonical_ticker(&req.ticker).ok_or_else(|| bad_request("invalid ticker"))?;
    let timeframe = req.timeframe.unwrap_or_else(|| "1d".to_string());
    if !VALID_TIMEFRAMES.contains(&timeframe.as_str()) {
        return Err(bad_request(format!("invalid timeframe '{timeframe}'")));
    }
    let horizon = match req.horizon.as_deref() {
        Some("swing") => "swing",
        _ => "day",
    };

    let provider = state.provider.clone();
    let candles = null_on_error(
        provider.name(),
        "candles",
        provider.candles(&ticker, &timeframe, 500).await,
    )
    .ok_or_else(|| bad_request("no candles available for replay"))?;

    let report = backtest::backtest(&ticker, &candles, &state.engine, horizon);
    let samples = report.samples.len();
    for sample in report.samples.clone() {
        state.ml.add_sample(sample);
    }

    info!(ticker = %ticker, trades = report.trades, samples, "backtest complete");
    Ok(Json(serde_json::json!({
        "ticker": ticker,
        "bars": report.bars,
        "trades": report.trades,
        "wins": report.wins,
        "samples_added": samples,
    })))
}

async fn ml_retrain(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.ml.retrain_all();
    state.increment_version();
    Json(state.ml.status())
}

#[derive(Deserialize)]
struct ConfirmWeightsRequest {
    /// How far toward the classifier's importances to move, [0, 1].
    #[serde(default = "default_weight_blend")]
    blend: f64,
}

fn default_weight_blend() -> f64 {
    0.25
}

/// The operator-confirmation gate: the classifier's per-feature importances
/// are only absorbed into the active weight set through this explicit POST.
async fn ml_confirm_weights(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfirmWeightsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !(0.0..=1.0).contains(&req.blend) {
        return Err(bad_request("blend must be in [0, 1]"));
    }

    let suggestions = state
        .ml
        .suggested_weights()
        .ok_or_else(|| bad_request("no trained day model — nothing to absorb"))?;

    state
        .engine
        .with_versions_mut(|versions| versions.absorb_suggested_weights(&suggestions, req.blend));

    let versions = state.engine.versions();
    let versions_path = state.config.read().data_path("signal-versions.json");
    if let Err(e) = versions.save(&versions_path) {
        warn!(error = %e, "failed to persist absorbed weights");
    }

    info!(
        blend = req.blend,
        suggestions = suggestions.len(),
        "operator confirmed — classifier weights absorbed into active version"
    );
    state.increment_version();

    Ok(Json(serde_json::json!({
        "absorbed": suggestions.len(),
        "blend": req.blend,
        "active_version": versions.active_version,
        "weights": versions.active().weights,
    })))
}

async fn eod_generate(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let date = session::eastern_date_string(session::now_eastern());
    let report = eod::generate_report(&state.journal, &date);
    let data_dir = state.config.read().data_dir.clone();
    eod::save_report(&data_dir, &report)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": e.to_string() }))))?;
    state.increment_version();
    Ok(Json(report))
}

#[derive(Deserialize)]
struct ValidateRequest {
    ticker: String,
}

async fn validate_ticker(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(ticker) = canonical_ticker(&req.ticker) else {
        return Ok(Json(serde_json::json!({ "valid": false, "reason": "not an equity symbol" })));
    };

    let provider = state.provider.clone();
    let quote = null_on_error(provider.name(), "quote", provider.quote(&ticker).await);
    match quote {
        Some(q) if q.last > 0.0 => Ok(Json(serde_json::json!({
            "valid": true,
            "ticker": ticker,
            "last": q.last,
        }))),
        _ => Ok(Json(serde_json::json!({
            "valid": false,
            "ticker": ticker,
            "reason": "no quote from provider",
        }))),
    }
}

async fn scan_low_float(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let scored = runner::run_volatility_scan(&state).await;
    Json(serde_json::json!({ "scored": scored }))
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    ticker: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

/// Deterministic state-backed answers; the conversational layer lives
/// outside this process.
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    let _ = req.session_id;
    let ticker = req
        .ticker
        .as_deref()
        .and_then(canonical_ticker)
        .or_else(|| {
            req.message
                .split_whitespace()
                .filter_map(|w| canonical_ticker(w.trim_start_matches('$')))
                .find(|t| state.store.ticker(t).is_some())
        });

    let reply = match ticker {
        Some(ticker) => match state.store.ticker(&ticker).and_then(|f| f.last_score) {
            Some(score) => format!(
                "{ticker}: {} at {}% confidence ({} session). Top drivers: {}.",
                score.direction,
                score.confidence,
                score.session,
                crate::discovery::top_signals(&score, 3).join(", ")
            ),
            None => format!("{ticker} is known but not scored yet — give it a cycle."),
        },
        None => {
            let regime = state
                .regime
                .current()
                .map(|r| r.regime.to_string())
                .unwrap_or_else(|| "unknown".into());
            let stats = state.journal.stats(None);
            format!(
                "Regime {regime}; {} pending paper trades; all-time win rate {:.0}%.",
                state.journal.pending().len(),
                stats.win_rate * 100.0
            )
        }
    };

    Json(serde_json::json!({ "reply": reply }))
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pearson_basics() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&a, &b) - 1.0).abs() < 1e-10);

        let inv: Vec<f64> = b.iter().map(|x| -x).collect();
        assert!((pearson(&a, &inv) + 1.0).abs() < 1e-10);

        let flat = vec![5.0; 4];
        assert_eq!(pearson(&a, &flat), 0.0);
        assert_eq!(pearson(&[1.0], &[2.0]), 0.0);
    }

    #[test]
    fn direction_parsing() {
        assert_eq!(parse_direction("long").unwrap(), TradeDirection::Long);
        assert_eq!(parse_direction("short").unwrap(), TradeDirection::Short);
        assert!(parse_direction("sideways").is_err());
    }

    #[test]
    fn manual_setup_validation() {
        let req = ManualTradeRequest {
            ticker: "nvda".into(),
            direction: "long".into(),
            entry: 100.0,
            stop: 98.0,
            target1: 103.0,
            target2: None,
            horizon: None,
        };
        let setup = manual_setup(&req, TradeDirection::Long).unwrap();
        assert_eq!(setup.ticker, "NVDA");
        assert!((setup.risk_reward - 1.5).abs() < 1e-10);
        assert!((setup.target2 - 106.0).abs() < 1e-10);

        // Target on the wrong side is rejected.
        let bad = ManualTradeRequest {
            ticker: "NVDA".into(),
            direction: "long".into(),
            entry: 100.0,
            stop: 98.0,
            target1: 99.0,
            target2: None,
            horizon: None,
        };
        assert!(manual_setup(&bad, TradeDirection::Long).is_err());
    }

    #[test]
    fn confirm_weights_blend_default() {
        let req: ConfirmWeightsRequest = serde_json::from_str("{}").unwrap();
        assert!((req.blend - 0.25).abs() < 1e-10);
        let req: ConfirmWeightsRequest = serde_json::from_str(r#"{"blend":0.5}"#).unwrap();
        assert!((req.blend - 0.5).abs() < 1e-10);
    }

    #[test]
    fn horizon_parsing_defaults_to_day() {
        assert_eq!(parse_horizon(None), Horizon::Day);
        assert_eq!(parse_horizon(Some("swing")), Horizon::Swing);
        assert_eq!(parse_horizon(Some("nonsense")), Horizon::Day);
    }
}
