// =============================================================================
// Signal version configuration — live A/B weight sets
// =============================================================================
//
// Weight sets are named versions so two scoring configurations can run
// head-to-head without a code change: the active version drives trading, the
// rest are shadow-scored on the same inputs. Each version carries a base
// weight table, optional horizon profiles (scalp/day/swing), optional
// per-ticker overrides layered on top, and optional gating thresholds.
//
// A missing or malformed `data/signal-versions.json` falls back to the
// built-in defaults and logs once at startup.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::persist;

/// Direction thresholds for one version. The bearish side needs a wider
/// spread in a ranging tape, where bear signals have no historical edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gating {
    #[serde(default = "default_bull_threshold")]
    pub bull_threshold: f64,
    #[serde(default = "default_bear_threshold")]
    pub bear_threshold: f64,
    #[serde(default = "default_ranging_bear_threshold")]
    pub ranging_bear_threshold: f64,
}

fn default_bull_threshold() -> f64 {
    2.0
}
fn default_bear_threshold() -> f64 {
    2.0
}
fn default_ranging_bear_threshold() -> f64 {
    5.0
}

impl Default for Gating {
    fn default() -> Self {
        Self {
            bull_threshold: default_bull_threshold(),
            bear_threshold: default_bear_threshold(),
            ranging_bear_threshold: default_ranging_bear_threshold(),
        }
    }
}

/// One named weight set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionDef {
    pub label: String,
    /// Base weight per signal name.
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    /// Optional horizon profiles overriding the base table.
    #[serde(default)]
    pub weights_scalp: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub weights_day: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub weights_swing: Option<HashMap<String, f64>>,
    /// Per-ticker weight overrides, layered over everything else.
    #[serde(default)]
    pub ticker_overrides: Option<HashMap<String, HashMap<String, f64>>>,
    #[serde(default)]
    pub gating: Option<Gating>,
}

impl VersionDef {
    /// Resolve the weight for one signal: ticker override beats horizon
    /// profile beats base table beats the built-in 1.0.
    pub fn weight_for(&self, signal: &str, ticker: &str, profile: &str) -> f64 {
        if let Some(overrides) = &self.ticker_overrides {
            if let Some(per_ticker) = overrides.get(ticker) {
                if let Some(&w) = per_ticker.get(signal) {
                    return w;
                }
            }
        }

        let profile_table = match profile {
            "scalp" => self.weights_scalp.as_ref(),
            "day" => self.weights_day.as_ref(),
            "swing" => self.weights_swing.as_ref(),
            _ => None,
        };
        if let Some(table) = profile_table {
            if let Some(&w) = table.get(signal) {
                return w;
            }
        }

        self.weights.get(signal).copied().unwrap_or(1.0)
    }

    pub fn gating(&self) -> Gating {
        self.gating.clone().unwrap_or_default()
    }
}

/// The full version registry: one active key plus any number of shadows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalVersions {
    pub active_version: String,
    pub versions: HashMap<String, VersionDef>,
}

impl Default for SignalVersions {
    fn default() -> Self {
        let mut versions = HashMap::new();
        versions.insert("v3".to_string(), builtin_v3());
        versions.insert("v2-legacy".to_string(), builtin_v2());
        Self {
            active_version: "v3".to_string(),
            versions,
        }
    }
}

impl SignalVersions {
    /// Load from disk, falling back to built-ins on a missing/bad file.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("no signal-version file — using built-in weight sets");
            return Self::default();
        }
        match persist::read_json::<Self>(path) {
            Ok(loaded) if loaded.versions.contains_key(&loaded.active_version) => {
                info!(
                    active = %loaded.active_version,
                    versions = loaded.versions.len(),
                    "signal versions loaded"
                );
                loaded
            }
            Ok(loaded) => {
                warn!(
                    active = %loaded.active_version,
                    "active signal version missing from file — using built-ins"
                );
                Self::default()
            }
            Err(e) => {
                warn!(error = %e, "malformed signal-version file — using built-ins");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        persist::write_json_atomic(path, self)
    }

    /// The active weight set. The registry guarantees the key exists.
    pub fn active(&self) -> &VersionDef {
        self.versions
            .get(&self.active_version)
            .expect("active version validated at load")
    }

    /// Every non-active version, for shadow scoring.
    pub fn shadows(&self) -> impl Iterator<Item = (&String, &VersionDef)> {
        self.versions.iter().filter(move |(k, _)| **k != self.active_version)
    }

    /// Nudge base weights toward classifier-suggested importances. Gated by
    /// operator confirmation at the API layer; here we just apply.
    pub fn absorb_suggested_weights(&mut self, suggestions: &HashMap<String, f64>, blend: f64) {
        let blend = blend.clamp(0.0, 1.0);
        let active_key = self.active_version.clone();
        if let Some(def) = self.versions.get_mut(&active_key) {
            for (name, &suggested) in suggestions {
                let entry = def.weights.entry(name.clone()).or_insert(1.0);
                *entry = *entry * (1.0 - blend) + suggested * blend;
            }
        }
    }
}

// =============================================================================
// Built-in weight sets
// =============================================================================

fn base_weights() -> HashMap<String, f64> {
    let table: [(&str, f64); 45] = [
        // Momentum / trend
        ("rsi_oversold", 3.0),
        ("rsi_overbought", 3.0),
        ("rsi_continuation", 2.0),
        ("rsi_bearish", 1.5),
        ("ema_alignment_bull", 2.5),
        ("ema_alignment_bear", 2.5),
        ("macd_positive", 1.5),
        ("macd_negative", 1.5),
        ("macd_momentum_bull", 1.0),
        ("macd_momentum_bear", 1.0),
        ("bb_dip_buy", 2.0),
        ("bb_fade_sell", 2.0),
        ("adx_trend_confirm", 1.5),
        ("pattern_bull", 2.0),
        ("pattern_bear", 2.0),
        ("divergence_bull", 2.5),
        ("divergence_bear", 2.5),
        ("vwap_reclaim", 1.5),
        ("vwap_lost", 1.5),
        ("fib_golden_pocket", 1.5),
        ("pivot_support", 1.0),
        ("pivot_resistance", 1.0),
        ("volume_climax_bull", 2.0),
        ("volume_climax_bear", 2.0),
        // Options flow
        ("call_premium_dominant", 2.5),
        ("put_premium_dominant", 2.5),
        ("sweep_aggression_bull", 2.0),
        ("sweep_aggression_bear", 2.0),
        ("nope_extreme", 1.5),
        ("max_pain_magnet", 1.0),
        ("gex_wall_support", 1.5),
        ("gex_wall_ceiling", 1.5),
        ("oi_call_build", 1.5),
        ("oi_put_build", 1.5),
        ("iv_skew_lean", 1.5),
        // Dark pool & tape
        ("dark_pool_accumulation", 2.5),
        ("dark_pool_distribution", 2.5),
        ("tape_imbalance_bull", 2.0),
        ("tape_imbalance_bear", 2.0),
        ("block_trades_bull", 1.5),
        ("block_trades_bear", 1.5),
        // Catalyst / context
        ("short_squeeze_setup", 2.5),
        ("insider_buying", 1.5),
        ("earnings_beat_gap_up", 3.0),
        ("earnings_miss_gap_down", 3.0),
    ];
    table.iter().map(|&(k, v)| (k.to_string(), v)).collect()
}

fn builtin_v3() -> VersionDef {
    let mut scalp = HashMap::new();
    // Scalps live and die on tape and flow; slow trend carries less.
    scalp.insert("tape_imbalance_bull".to_string(), 3.0);
    scalp.insert("tape_imbalance_bear".to_string(), 3.0);
    scalp.insert("sweep_aggression_bull".to_string(), 2.5);
    scalp.insert("sweep_aggression_bear".to_string(), 2.5);
    scalp.insert("ema_alignment_bull".to_string(), 1.5);
    scalp.insert("ema_alignment_bear".to_string(), 1.5);

    let mut swing = HashMap::new();
    // Swings lean on structure and positioning, not the intraday tape.
    swing.insert("tape_imbalance_bull".to_string(), 0.5);
    swing.insert("tape_imbalance_bear".to_string(), 0.5);
    swing.insert("divergence_bull".to_string(), 3.0);
    swing.insert("divergence_bear".to_string(), 3.0);
    swing.insert("oi_call_build".to_string(), 2.0);
    swing.insert("oi_put_build".to_string(), 2.0);

    VersionDef {
        label: "v3 flow-weighted".to_string(),
        weights: base_weights(),
        weights_scalp: Some(scalp),
        weights_day: None,
        weights_swing: Some(swing),
        ticker_overrides: None,
        gating: Some(Gating::default()),
    }
}

fn builtin_v2() -> VersionDef {
    let mut weights = base_weights();
    // The legacy set trusted pure TA more and flow less.
    weights.insert("ema_alignment_bull".to_string(), 3.0);
    weights.insert("ema_alignment_bear".to_string(), 3.0);
    weights.insert("call_premium_dominant".to_string(), 1.5);
    weights.insert("put_premium_dominant".to_string(), 1.5);
    weights.insert("dark_pool_accumulation".to_string(), 1.5);
    weights.insert("dark_pool_distribution".to_string(), 1.5);

    VersionDef {
        label: "v2 ta-weighted (legacy)".to_string(),
        weights,
        weights_scalp: None,
        weights_day: None,
        weights_swing: None,
        ticker_overrides: None,
        gating: Some(Gating::default()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_is_consistent() {
        let reg = SignalVersions::default();
        assert!(reg.versions.contains_key(&reg.active_version));
        assert_eq!(reg.shadows().count(), reg.versions.len() - 1);
        assert!(reg.active().weights.len() > 30);
    }

    #[test]
    fn weight_resolution_order() {
        let mut def = VersionDef {
            label: "test".into(),
            ..Default::default()
        };
        def.weights.insert("rsi_oversold".into(), 3.0);
        let mut scalp = HashMap::new();
        scalp.insert("rsi_oversold".to_string(), 1.0);
        def.weights_scalp = Some(scalp);
        let mut per_ticker = HashMap::new();
        let mut nvda = HashMap::new();
        nvda.insert("rsi_oversold".to_string(), 5.0);
        per_ticker.insert("NVDA".to_string(), nvda);
        def.ticker_overrides = Some(per_ticker);

        // Ticker override wins.
        assert_eq!(def.weight_for("rsi_oversold", "NVDA", "scalp"), 5.0);
        // Horizon profile beats base.
        assert_eq!(def.weight_for("rsi_oversold", "SPY", "scalp"), 1.0);
        // Base table.
        assert_eq!(def.weight_for("rsi_oversold", "SPY", "day"), 3.0);
        // Unknown signal defaults to 1.0.
        assert_eq!(def.weight_for("unheard_of", "SPY", "day"), 1.0);
    }

    #[test]
    fn gating_defaults() {
        let g = Gating::default();
        assert_eq!(g.bull_threshold, 2.0);
        assert_eq!(g.bear_threshold, 2.0);
        assert_eq!(g.ranging_bear_threshold, 5.0);
    }

    #[test]
    fn load_missing_file_gives_builtin() {
        let reg = SignalVersions::load_or_default("/nonexistent/path/versions.json");
        assert_eq!(reg.active_version, "v3");
    }

    #[test]
    fn load_rejects_dangling_active_key() {
        let path = std::env::temp_dir().join(format!(
            "meridian-versions-dangling-{}.json",
            std::process::id()
        ));
        let bad = r#"{ "active_version": "missing", "versions": {} }"#;
        std::fs::write(&path, bad).unwrap();
        let reg = SignalVersions::load_or_default(&path);
        assert_eq!(reg.active_version, "v3");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn roundtrip() {
        let path = std::env::temp_dir().join(format!(
            "meridian-versions-roundtrip-{}.json",
            std::process::id()
        ));
        let reg = SignalVersions::default();
        reg.save(&path).unwrap();
        let back = SignalVersions::load_or_default(&path);
        assert_eq!(back.active_version, reg.active_version);
        assert_eq!(back.versions.len(), reg.versions.len());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn absorb_suggested_weights_blends() {
        let mut reg = SignalVersions::default();
        let before = reg.active().weight_for("rsi_oversold", "SPY", "day");
        let mut suggestions = HashMap::new();
        suggestions.insert("rsi_oversold".to_string(), 1.0);
        reg.absorb_suggested_weights(&suggestions, 0.5);
        let after = reg.active().weight_for("rsi_oversold", "SPY", "day");
        assert!((after - (before * 0.5 + 0.5)).abs() < 1e-10);
    }
}
