// =============================================================================
// Engine Configuration — hot-reloadable settings with atomic save
// =============================================================================
//
// Central configuration hub for the Meridian engine. Every tunable parameter
// lives here so the engine can be reconfigured at runtime without a restart.
//
// All fields carry `#[serde(default)]` so that adding new fields never breaks
// loading an older config file. Persistence goes through the shared atomic
// tmp + rename helper.
// =============================================================================

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::persist;
use crate::types::canonical_ticker;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_watchlist() -> Vec<String> {
    vec![
        "SPY".to_string(),
        "QQQ".to_string(),
        "NVDA".to_string(),
        "TSLA".to_string(),
        "AAPL".to_string(),
    ]
}

fn default_daily_call_limit() -> u64 {
    15_000
}

fn default_budget_ceiling() -> f64 {
    0.90
}

fn default_paper_cooldown_minutes() -> i64 {
    30
}

fn default_risk_budget_usd() -> f64 {
    2_000.0
}

fn default_max_consecutive_losses() -> u32 {
    3
}

fn default_auto_trade_min_confidence() -> u8 {
    70
}

fn default_discovery_ttl_minutes() -> i64 {
    120
}

fn default_discovery_sweep_minutes() -> u64 {
    15
}

fn default_scanner_defer_secs() -> u64 {
    60
}

fn default_runner_cooldown_minutes() -> i64 {
    10
}

fn default_alert_cooldown_minutes() -> i64 {
    15
}

fn default_data_dir() -> String {
    "data".to_string()
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level runtime configuration for the Meridian engine.
///
/// Every field has a serde default so older JSON files missing new fields
/// still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tickers the engine watches and scores on every cycle.
    #[serde(default = "default_watchlist")]
    pub watchlist: Vec<String>,

    /// Daily external-call budget shared across all providers.
    #[serde(default = "default_daily_call_limit")]
    pub daily_call_limit: u64,

    /// Fraction of the daily budget at which cycles start skipping.
    #[serde(default = "default_budget_ceiling")]
    pub budget_ceiling: f64,

    /// Cooldown between paper entries on the same (ticker, direction).
    #[serde(default = "default_paper_cooldown_minutes")]
    pub paper_cooldown_minutes: i64,

    /// Fixed notional risk budget per paper trade, in dollars.
    #[serde(default = "default_risk_budget_usd")]
    pub risk_budget_usd: f64,

    /// Consecutive losses on a (ticker, direction) that block auto-entry.
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,

    /// Minimum blended confidence for a discovery to auto-open a paper trade.
    #[serde(default = "default_auto_trade_min_confidence")]
    pub auto_trade_min_confidence: u8,

    /// Lifetime of a discovery entry and its tick subscription.
    #[serde(default = "default_discovery_ttl_minutes")]
    pub discovery_ttl_minutes: i64,

    /// Cadence of the expired-discovery sweep.
    #[serde(default = "default_discovery_sweep_minutes")]
    pub discovery_sweep_minutes: u64,

    /// Delay between a HOT cycle finishing and the market scanner running,
    /// letting the provider's rate window reset.
    #[serde(default = "default_scanner_defer_secs")]
    pub scanner_defer_secs: u64,

    /// Per-ticker cooldown for the volatility runner.
    #[serde(default = "default_runner_cooldown_minutes")]
    pub runner_cooldown_minutes: i64,

    /// Per-key cooldown for deduplicated alerts.
    #[serde(default = "default_alert_cooldown_minutes")]
    pub alert_cooldown_minutes: i64,

    /// Directory holding all persisted JSON artifacts.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            watchlist: default_watchlist(),
            daily_call_limit: default_daily_call_limit(),
            budget_ceiling: default_budget_ceiling(),
            paper_cooldown_minutes: default_paper_cooldown_minutes(),
            risk_budget_usd: default_risk_budget_usd(),
            max_consecutive_losses: default_max_consecutive_losses(),
            auto_trade_min_confidence: default_auto_trade_min_confidence(),
            discovery_ttl_minutes: default_discovery_ttl_minutes(),
            discovery_sweep_minutes: default_discovery_sweep_minutes(),
            scanner_defer_secs: default_scanner_defer_secs(),
            runner_cooldown_minutes: default_runner_cooldown_minutes(),
            alert_cooldown_minutes: default_alert_cooldown_minutes(),
            data_dir: default_data_dir(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// Returns an error when the file is missing or malformed so the caller
    /// can fall back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: Self = persist::read_json(path)?;

        info!(
            path = %path.display(),
            watchlist = ?config.watchlist,
            daily_call_limit = config.daily_call_limit,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        persist::write_json_atomic(path, self)?;
        info!(path = %path.display(), "engine config saved");
        Ok(())
    }

    /// Replace the watchlist from a comma-separated env string, dropping
    /// anything that is not a valid equity symbol.
    pub fn apply_ticker_env(&mut self, raw: &str) {
        let tickers: Vec<String> = raw.split(',').filter_map(canonical_ticker).collect();
        if !tickers.is_empty() {
            self.watchlist = tickers;
        }
    }

    /// Path to a named artifact inside the data directory.
    pub fn data_path(&self, file: &str) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join(file)
    }
}
