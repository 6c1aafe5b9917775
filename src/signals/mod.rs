// =============================================================================
// Signal pipeline — weighted catalogue, setups, features, versioned scoring
// =============================================================================

pub mod catalog;
pub mod engine;
pub mod features;
pub mod setups;
pub mod versions;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use engine::SignalEngine;

use crate::regime::RegimeState;
use crate::state::{MarketFacts, TickerFacts};
use crate::sources::tick_stream::TickSummary;
use crate::types::{Session, SignalDirection};

/// Hard ceiling on any published confidence.
pub const MAX_CONFIDENCE: u8 = 95;
/// Ceiling when no setup matched — weighted context alone carries no edge.
pub const NO_SETUP_CONFIDENCE_CAP: u8 = 55;

/// Everything one scoring pass reads. Session and regime are explicit
/// parameters so scoring stays idempotent — no hidden wall-clock reads.
pub struct ScoringContext<'a> {
    pub ticker: &'a str,
    pub facts: &'a TickerFacts,
    pub market: &'a MarketFacts,
    pub regime: &'a RegimeState,
    pub session: Session,
    pub tick: Option<&'a TickSummary>,
}

/// Raw output of one catalogue evaluator, before weighting.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub direction: SignalDirection,
    /// [0, 1] — multiplied into the resolved weight by the engine.
    pub strength: f64,
    pub detail: String,
}

/// One indicator that fired during a scoring pass, in evaluation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalHit {
    pub name: String,
    pub direction: SignalDirection,
    /// Effective weight after session/regime/override adjustments. Zero for
    /// purely informational entries.
    pub weight: f64,
    pub detail: String,
}

/// What an older weight set would have said about the same inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowScore {
    pub direction: SignalDirection,
    pub confidence: u8,
    pub bull_weight: f64,
    pub bear_weight: f64,
}

/// The engine's full output for one ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalScore {
    pub ticker: String,
    pub direction: SignalDirection,
    /// Integer percentage in [0, 95].
    pub confidence: u8,
    pub bull_weight: f64,
    pub bear_weight: f64,
    pub spread: f64,
    pub signals: Vec<SignalHit>,
    /// The 25-entry numeric feature vector, in catalogue order.
    pub features: Vec<f64>,
    #[serde(default)]
    pub shadow_scores: HashMap<String, ShadowScore>,
    #[serde(default)]
    pub matched_setups: Vec<String>,
    pub session: Session,
    pub signal_version: String,
    pub at: DateTime<Utc>,
}
