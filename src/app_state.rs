// =============================================================================
// Central Application State — Meridian trading intelligence engine
// =============================================================================
//
// The single aggregate every long-lived task shares via `Arc<AppState>`.
// Subsystems own their interior mutability; AppState ties them together and
// builds the unified snapshot served over REST and pushed over WebSocket.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for all mutable shared collections.
//   - Arc wrappers for subsystem engines that manage their own locking.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::discovery::DiscoveryBook;
use crate::journal::{JournalStats, PaperJournal, PaperTrade};
use crate::ml::{MlCalibrator, MlStatus};
use crate::notifier::{Alert, Notifier};
use crate::regime::{RegimeDetector, RegimeState};
use crate::runtime_config::EngineConfig;
use crate::signals::SignalEngine;
use crate::sources::tick_stream::{TickStreamManager, TickSummary};
use crate::sources::MarketDataSource;
use crate::state::{MarketFacts, StateStore, TickerFacts};
use crate::types::Session;

/// Maximum number of recent errors retained for the dashboard.
const MAX_RECENT_ERRORS: usize = 50;

/// A recorded error event for the dashboard error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub source: String,
    pub at: String,
}

/// Live scheduler counters, serialised into every snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerTelemetry {
    pub cycle_count: u64,
    pub daily_call_count: u64,
    pub daily_limit: u64,
    pub last_reset_date: String,
    pub session: Session,
    pub session_interval_ms: u64,
    pub last_cycle_ms: u64,
    pub last_skip_reason: Option<String>,
}

impl Default for SchedulerTelemetry {
    fn default() -> Self {
        Self {
            cycle_count: 0,
            daily_call_count: 0,
            daily_limit: 0,
            last_reset_date: String::new(),
            session: Session::Overnight,
            session_interval_ms: 60_000,
            last_cycle_ms: 0,
            last_skip_reason: None,
        }
    }
}

/// Central application state shared across all async tasks.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Incremented on every meaningful mutation; the WebSocket feed pushes
    /// when it changes.
    pub state_version: AtomicU64,
    pub ws_sequence: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub config: RwLock<EngineConfig>,

    // ── Data plane ──────────────────────────────────────────────────────
    pub store: Arc<StateStore>,
    pub ticks: Arc<TickStreamManager>,
    pub provider: Arc<dyn MarketDataSource>,
    /// Shared with the provider; the scheduler budgets against it.
    pub call_counter: Arc<AtomicU64>,

    // ── Decision plane ──────────────────────────────────────────────────
    pub engine: Arc<SignalEngine>,
    pub regime: Arc<RegimeDetector>,
    pub ml: Arc<MlCalibrator>,
    pub journal: Arc<PaperJournal>,
    /// Separate journal for manually driven options paper trades.
    pub options_journal: Arc<PaperJournal>,
    pub discoveries: Arc<DiscoveryBook>,
    pub notifier: Arc<Notifier>,
    /// Out-of-band alert fan-out for connected WebSocket clients.
    pub alert_tx: tokio::sync::broadcast::Sender<Alert>,

    // ── Telemetry ───────────────────────────────────────────────────────
    pub scheduler: RwLock<SchedulerTelemetry>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    pub start_time: std::time::Instant,
}

impl AppState {
    // ── Version management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error log ───────────────────────────────────────────────────────

    pub fn push_error(&self, source: &str, message: impl Into<String>) {
        let record = ErrorRecord {
            message: message.into(),
            source: source.to_string(),
            at: Utc::now().to_rfc3339(),
        };
        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);
        self.increment_version();
    }

    // ── Snapshot builder ────────────────────────────────────────────────

    /// Build the full serialisable snapshot — the payload for
    /// `GET /api/state` and every WebSocket push.
    pub fn build_snapshot(&self) -> EngineSnapshot {
        let now = Utc::now();
        let scheduler = self.scheduler.read().clone();
        let config = self.config.read();

        EngineSnapshot {
            state_version: self.current_version(),
            server_time: now.timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            watchlist: config.watchlist.clone(),
            scheduler,
            tickers: self.store.all_tickers(),
            market: self.store.market(),
            regime: self.regime.current(),
            tick_summaries: self.ticks.all_summaries(),
            discoveries: self.discoveries.entries(),
            pending_trades: self.journal.pending(),
            journal_stats: self.journal.stats(None),
            ml_status: self.ml.status(),
            alerts: self.notifier.recent(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }

    /// Last prices for every known ticker — the journal refresh input.
    /// Stream prices win over snapshot prices per source preference.
    pub fn last_prices(&self) -> HashMap<String, f64> {
        let mut prices: HashMap<String, f64> = self
            .store
            .all_tickers()
            .into_iter()
            .filter(|(_, f)| f.quote.last > 0.0)
            .map(|(t, f)| (t, f.quote.last))
            .collect();
        for (ticker, summary) in self.ticks.all_summaries() {
            if summary.is_fresh() && summary.last_price > 0.0 {
                prices.insert(ticker, summary.last_price);
            }
        }
        prices
    }

    /// The current ET session as the scheduler last classified it.
    pub fn current_session(&self) -> Session {
        self.scheduler.read().session
    }
}

/// Full engine snapshot sent to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub watchlist: Vec<String>,
    pub scheduler: SchedulerTelemetry,
    pub tickers: HashMap<String, TickerFacts>,
    pub market: MarketFacts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regime: Option<RegimeState>,
    pub tick_summaries: HashMap<String, TickSummary>,
    pub discoveries: Vec<crate::discovery::DiscoveryEntry>,
    pub pending_trades: Vec<PaperTrade>,
    pub journal_stats: JournalStats,
    pub ml_status: MlStatus,
    pub alerts: Vec<Alert>,
    pub recent_errors: Vec<ErrorRecord>,
}
