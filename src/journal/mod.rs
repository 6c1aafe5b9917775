// =============================================================================
// Paper-Trade Journal — append-only trade log with outcome tracking
// =============================================================================
//
// Life-cycle: a trade opens `pending` and transitions exactly once to
// `win-t1` / `win-t2` / `loss-stop` / `closed-eod` / `closed-manual`.
// Unrealized P&L is recomputed every refresh; realized P&L uses the long
// convention on both sides (winning trades are positive, short or long).
//
// Guards enforced here:
//   - no two pending trades share a (ticker, direction)
//   - a recently closed (ticker, direction) blocks re-entry for the cooldown
//   - share counts come from the fixed notional risk budget
//
// Every mutation writes the journal file through atomically. Loading is
// tolerant: older records missing derived fields are migrated best-effort.
// =============================================================================

pub mod backtest;
pub mod kelly;

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::persist;
use crate::types::{Horizon, TradeDirection, TradeStatus};

// =============================================================================
// Records
// =============================================================================

/// Where a setup's levels came from after structure snapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureSources {
    pub target_source: String,
    pub stop_source: String,
}

/// A fully specified trade idea, before any paper entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSetup {
    pub ticker: String,
    pub direction: TradeDirection,
    pub entry: f64,
    pub target1: f64,
    pub target2: f64,
    pub stop: f64,
    pub risk_reward: f64,
    pub horizon: Horizon,
    pub atr_multiplier: f64,
    pub technical_confidence: u8,
    #[serde(default)]
    pub ml_confidence: Option<u8>,
    pub blended_confidence: u8,
    pub kelly_pct: f64,
    pub signals: Vec<String>,
    #[serde(default)]
    pub structure: Option<StructureSources>,
    pub at: DateTime<Utc>,
}

/// riskReward = |target1 - entry| / max(0.01, |entry - stop|).
pub fn risk_reward(entry: f64, target1: f64, stop: f64) -> f64 {
    (target1 - entry).abs() / (entry - stop).abs().max(0.01)
}

/// A setup observation kept for training-label joining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupRecord {
    pub setup: TradeSetup,
    pub features: Vec<f64>,
    pub signal_version: String,
    pub at: DateTime<Utc>,
}

/// One paper trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperTrade {
    pub id: String,
    pub ticker: String,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub stop: f64,
    pub target1: f64,
    pub target2: f64,
    pub horizon: Horizon,
    pub confidence: u8,
    pub status: TradeStatus,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pnl_points: Option<f64>,
    #[serde(default)]
    pub pnl_pct: Option<f64>,
    #[serde(default)]
    pub pnl_total: Option<f64>,
    #[serde(default)]
    pub unrealized_pnl_pct: Option<f64>,
    #[serde(default)]
    pub unrealized_pnl_total: Option<f64>,
    pub signal_version: String,
    pub shares: u64,
}

impl PaperTrade {
    /// Points with the long convention: positive when the trade won,
    /// whichever side it was on.
    fn points(&self, exit: f64) -> f64 {
        match self.direction {
            TradeDirection::Long => exit - self.entry_price,
            TradeDirection::Short => self.entry_price - exit,
        }
    }

    fn apply_close(&mut self, status: TradeStatus, exit: f64, at: DateTime<Utc>) {
        let points = self.points(exit);
        self.status = status;
        self.exit_price = Some(exit);
        self.exit_time = Some(at);
        self.pnl_points = Some(points);
        self.pnl_pct = Some(if self.entry_price > 0.0 {
            100.0 * points / self.entry_price
        } else {
            0.0
        });
        self.pnl_total = Some(points * self.shares as f64);
        self.unrealized_pnl_pct = None;
        self.unrealized_pnl_total = None;
    }
}

// =============================================================================
// Aggregate stats
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickerBreakdown {
    pub trades: usize,
    pub wins: usize,
    pub pnl_total: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalStats {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub pnl_points: f64,
    pub pnl_dollars: f64,
    pub best_pct: f64,
    pub worst_pct: f64,
    pub long_trades: usize,
    pub long_wins: usize,
    pub short_trades: usize,
    pub short_wins: usize,
    pub by_ticker: HashMap<String, TickerBreakdown>,
    /// Realized dollars per ET day (YYYY-MM-DD).
    pub by_day: HashMap<String, f64>,
}

// =============================================================================
// Journal
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct JournalFile {
    #[serde(default)]
    trades: Vec<PaperTrade>,
    #[serde(default)]
    setups: Vec<SetupRecord>,
}

pub struct PaperJournal {
    inner: RwLock<JournalFile>,
    path: PathBuf,
    /// Fixed notional risk per trade, in dollars.
    risk_budget: f64,
}

impl PaperJournal {
    pub fn load(path: PathBuf, risk_budget: f64) -> Self {
        let mut file: JournalFile = persist::read_json_or_default(&path);
        let migrated = file
            .trades
            .iter_mut()
            .fold(0usize, |acc, t| if migrate(t) { acc + 1 } else { acc });
        if migrated > 0 {
            info!(migrated, "journal records migrated on load");
        }
        if !file.trades.is_empty() {
            info!(trades = file.trades.len(), setups = file.setups.len(), "trade journal restored");
        }
        Self {
            inner: RwLock::new(file),
            path,
            risk_budget,
        }
    }

    fn persist(&self) {
        let snapshot = self.inner.read().clone();
        if let Err(e) = persist::write_json_atomic(&self.path, &snapshot) {
            warn!(error = %e, "failed to persist trade journal");
        }
    }

    // ── Setup logging ───────────────────────────────────────────────────

    /// Record that a setup was observed, for later training-label joins.
    pub fn log_setup(&self, setup: TradeSetup, features: Vec<f64>, signal_version: &str) {
        self.inner.write().setups.push(SetupRecord {
            setup,
            features,
            signal_version: signal_version.to_string(),
            at: Utc::now(),
        });
        self.persist();
    }

    // ── Entry ───────────────────────────────────────────────────────────

    /// Open a pending paper trade unless a pending or recently closed trade
    /// for the same (ticker, direction) blocks it.
    pub fn open_trade(
        &self,
        setup: &TradeSetup,
        entry_price: f64,
        cooldown: Duration,
        signal_version: &str,
    ) -> Option<PaperTrade> {
        let now = Utc::now();
        {
            let file = self.inner.read();

            let pending_exists = file.trades.iter().any(|t| {
                t.status == TradeStatus::Pending
                    && t.ticker == setup.ticker
                    && t.direction == setup.direction
            });
            if pending_exists {
                info!(ticker = %setup.ticker, direction = %setup.direction, "entry refused — pending trade exists");
                return None;
            }

            let recently_closed = file.trades.iter().any(|t| {
                t.ticker == setup.ticker
                    && t.direction == setup.direction
                    && t.exit_time.map(|e| now - e < cooldown).unwrap_or(false)
            });
            if recently_closed {
                info!(ticker = %setup.ticker, direction = %setup.direction, "entry refused — cooldown");
                return None;
            }
        }

        let shares = kelly::shares_for(self.risk_budget, entry_price, setup.stop);
        let trade = PaperTrade {
            id: uuid::Uuid::new_v4().to_string(),
            ticker: setup.ticker.clone(),
            direction: setup.direction,
            entry_price,
            entry_time: now,
            stop: setup.stop,
            target1: setup.target1,
            target2: setup.target2,
            horizon: setup.horizon,
            confidence: setup.blended_confidence,
            status: TradeStatus::Pending,
            exit_price: None,
            exit_time: None,
            pnl_points: None,
            pnl_pct: None,
            pnl_total: None,
            unrealized_pnl_pct: None,
            unrealized_pnl_total: None,
            signal_version: signal_version.to_string(),
            shares,
        };

        info!(
            id = %trade.id,
            ticker = %trade.ticker,
            direction = %trade.direction,
            entry_price,
            stop = trade.stop,
            target1 = trade.target1,
            shares,
            "paper trade opened"
        );

        self.inner.write().trades.push(trade.clone());
        self.persist();
        Some(trade)
    }

    // ── Guards ──────────────────────────────────────────────────────────

    /// Walk the closed-trade log backwards for (ticker, direction), counting
    /// losses until the streak breaks.
    pub fn consecutive_losses(&self, ticker: &str, direction: TradeDirection) -> u32 {
        let file = self.inner.read();
        let mut streak = 0;
        for trade in file.trades.iter().rev() {
            if trade.ticker != ticker || trade.direction != direction || !trade.status.is_closed() {
                continue;
            }
            match trade.pnl_points {
                Some(p) if p < 0.0 => streak += 1,
                _ => break,
            }
        }
        streak
    }

    // ── Refresh passes ──────────────────────────────────────────────────

    /// Recompute unrealized P&L for every pending trade.
    pub fn update_unrealized(&self, prices: &HashMap<String, f64>) {
        let mut file = self.inner.write();
        for trade in file.trades.iter_mut().filter(|t| t.status == TradeStatus::Pending) {
            let Some(&price) = prices.get(&trade.ticker) else { continue };
            if price <= 0.0 {
                continue;
            }
            let points = trade.points(price);
            trade.unrealized_pnl_pct = Some(100.0 * points / trade.entry_price.max(0.01));
            trade.unrealized_pnl_total = Some(points * trade.shares as f64);
        }
    }

    /// Promote pending trades whose live price crossed a level. Exits record
    /// the observed price, never an invented fill. Returns the trades closed
    /// by this pass.
    pub fn check_outcomes(&self, prices: &HashMap<String, f64>) -> Vec<PaperTrade> {
        let now = Utc::now();
        let mut closed = Vec::new();
        let mut file = self.inner.write();

        for trade in file.trades.iter_mut().filter(|t| t.status == TradeStatus::Pending) {
            let Some(&price) = prices.get(&trade.ticker) else { continue };
            if price <= 0.0 {
                continue;
            }

            let status = match trade.direction {
                TradeDirection::Long => {
                    if price <= trade.stop {
                        Some(TradeStatus::LossStop)
                    } else if price >= trade.target2 {
                        Some(TradeStatus::WinT2)
                    } else if price >= trade.target1 {
                        Some(TradeStatus::WinT1)
                    } else {
                        None
                    }
                }
                TradeDirection::Short => {
                    if price >= trade.stop {
                        Some(TradeStatus::LossStop)
                    } else if price <= trade.target2 {
                        Some(TradeStatus::WinT2)
                    } else if price <= trade.target1 {
                        Some(TradeStatus::WinT1)
                    } else {
                        None
                    }
                }
            };

            if let Some(status) = status {
                trade.apply_close(status, price, now);
                info!(
                    id = %trade.id,
                    ticker = %trade.ticker,
                    status = %status,
                    exit = price,
                    pnl_pct = trade.pnl_pct.unwrap_or(0.0),
                    "paper trade closed"
                );
                closed.push(trade.clone());
            }
        }

        drop(file);
        if !closed.is_empty() {
            self.persist();
        }
        closed
    }

    /// 15:55 ET force-close: every pending trade on an intraday horizon is
    /// closed at the current price with status `closed-eod`. Win/loss falls
    /// out of the P&L sign at stat time.
    pub fn close_intraday(&self, prices: &HashMap<String, f64>) -> Vec<PaperTrade> {
        let now = Utc::now();
        let mut closed = Vec::new();
        let mut file = self.inner.write();

        for trade in file
            .trades
            .iter_mut()
            .filter(|t| t.status == TradeStatus::Pending && t.horizon.is_intraday())
        {
            let exit = prices.get(&trade.ticker).copied().unwrap_or(trade.entry_price);
            trade.apply_close(TradeStatus::ClosedEod, exit, now);
            info!(id = %trade.id, ticker = %trade.ticker, exit, "intraday trade force-closed");
            closed.push(trade.clone());
        }

        drop(file);
        if !closed.is_empty() {
            self.persist();
        }
        closed
    }

    /// Manual close from the API.
    pub fn close_manual(&self, id: &str, price: f64) -> Option<PaperTrade> {
        let now = Utc::now();
        let mut file = self.inner.write();
        let trade = file
            .trades
            .iter_mut()
            .find(|t| t.id == id && t.status == TradeStatus::Pending)?;
        trade.apply_close(TradeStatus::ClosedManual, price, now);
        let closed = trade.clone();
        drop(file);
        self.persist();
        Some(closed)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn trades(&self) -> Vec<PaperTrade> {
        self.inner.read().trades.clone()
    }

    pub fn pending(&self) -> Vec<PaperTrade> {
        self.inner
            .read()
            .trades
            .iter()
            .filter(|t| t.status == TradeStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn setups(&self) -> Vec<SetupRecord> {
        self.inner.read().setups.clone()
    }

    /// Aggregate stats, optionally restricted to one signal version.
    pub fn stats(&self, version: Option<&str>) -> JournalStats {
        let file = self.inner.read();
        let mut stats = JournalStats {
            best_pct: f64::NEG_INFINITY,
            worst_pct: f64::INFINITY,
            ..Default::default()
        };

        for trade in file
            .trades
            .iter()
            .filter(|t| t.status.is_closed())
            .filter(|t| version.map(|v| t.signal_version == v).unwrap_or(true))
        {
            let pnl_pct = trade.pnl_pct.unwrap_or(0.0);
            let pnl_dollars = trade.pnl_total.unwrap_or(0.0);
            let won = trade.pnl_points.unwrap_or(0.0) > 0.0;

            stats.total_trades += 1;
            if won {
                stats.wins += 1;
            } else {
                stats.losses += 1;
            }
            stats.pnl_points += trade.pnl_points.unwrap_or(0.0);
            stats.pnl_dollars += pnl_dollars;
            stats.best_pct = stats.best_pct.max(pnl_pct);
            stats.worst_pct = stats.worst_pct.min(pnl_pct);

            match trade.direction {
                TradeDirection::Long => {
                    stats.long_trades += 1;
                    if won {
                        stats.long_wins += 1;
                    }
                }
                TradeDirection::Short => {
                    stats.short_trades += 1;
                    if won {
                        stats.short_wins += 1;
                    }
                }
            }

            let ticker_entry = stats.by_ticker.entry(trade.ticker.clone()).or_default();
            ticker_entry.trades += 1;
            if won {
                ticker_entry.wins += 1;
            }
            ticker_entry.pnl_total += pnl_dollars;

            if let Some(exit) = trade.exit_time {
                let day = exit.format("%Y-%m-%d").to_string();
                *stats.by_day.entry(day).or_insert(0.0) += pnl_dollars;
            }
        }

        if stats.total_trades > 0 {
            stats.win_rate = stats.wins as f64 / stats.total_trades as f64;
        } else {
            stats.best_pct = 0.0;
            stats.worst_pct = 0.0;
        }
        stats
    }

    /// Per-version stats for the A/B surface.
    pub fn stats_by_version(&self) -> HashMap<String, JournalStats> {
        let versions: std::collections::HashSet<String> = self
            .inner
            .read()
            .trades
            .iter()
            .map(|t| t.signal_version.clone())
            .collect();
        versions
            .into_iter()
            .map(|v| {
                let s = self.stats(Some(&v));
                (v, s)
            })
            .collect()
    }
}

// =============================================================================
// Load-time migration
// =============================================================================

/// Best-effort repair of older records. Returns true when anything changed.
fn migrate(trade: &mut PaperTrade) -> bool {
    if !trade.status.is_closed() {
        return false;
    }
    let mut changed = false;

    // Missing exit price: reconstruct from the outcome's level.
    if trade.exit_price.is_none() {
        let exit = match trade.status {
            TradeStatus::WinT1 => Some(trade.target1),
            TradeStatus::WinT2 => Some(trade.target2),
            TradeStatus::LossStop => Some(trade.stop),
            _ => None,
        };
        if let Some(exit) = exit {
            trade.exit_price = Some(exit);
            changed = true;
        }
    }

    // Missing points: from pct, else from exit price.
    if trade.pnl_points.is_none() {
        if let Some(pct) = trade.pnl_pct {
            trade.pnl_points = Some(pct / 100.0 * trade.entry_price);
            changed = true;
        } else if let Some(exit) = trade.exit_price {
            let points = match trade.direction {
                TradeDirection::Long => exit - trade.entry_price,
                TradeDirection::Short => trade.entry_price - exit,
            };
            trade.pnl_points = Some(points);
            changed = true;
        }
    }

    if trade.pnl_pct.is_none() {
        if let Some(points) = trade.pnl_points {
            if trade.entry_price > 0.0 {
                trade.pnl_pct = Some(100.0 * points / trade.entry_price);
                changed = true;
            }
        }
    }

    if trade.pnl_total.is_none() {
        if let Some(points) = trade.pnl_points {
            trade.pnl_total = Some(points * trade.shares as f64);
            changed = true;
        }
    }

    changed
}
