// =============================================================================
// ML Calibrator — two classifiers, one cumulative dataset, one blend rule
// =============================================================================
//
// Two independently trained binary classifiers share the 25-dim feature
// vector: `day` (labels from intraday trades) and `swing` (overnight and
// multi-day). Training fires when a horizon has >= 30 labeled samples and
// its count is a multiple of 10; a nightly pass at 17:00 ET retrains both
// from the persisted cumulative dataset, which is the source of truth across
// restarts and is capped at 50 000 most-recent samples.
//
// Ensemble: blended = round(t*(1-a) + p*a), with a growing with the sample
// count and capped below 0.5 so the rule engine always keeps the majority.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ml::model::LogisticModel;
use crate::persist;
use crate::signals::features::FEATURE_NAMES;

/// Minimum labeled samples before a horizon trains at all.
pub const MIN_TRAINING_SAMPLES: usize = 30;
/// Incremental training fires when the count hits a multiple of this.
const TRAIN_EVERY: usize = 10;
/// Cumulative dataset cap — most recent kept.
const MAX_SAMPLES: usize = 50_000;

/// One labeled outcome, persisted in `data/ml-training-cumulative.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSample {
    pub features: Vec<f64>,
    /// 1 = win, 0 = loss.
    pub label: u8,
    /// The technical confidence when the setup was taken.
    pub confidence: u8,
    pub pnl_pct: f64,
    /// "day" or "swing" — which classifier this sample feeds.
    pub horizon: String,
    pub at: DateTime<Utc>,
}

/// Ensemble output for one score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BlendedConfidence {
    pub technical_confidence: u8,
    /// Absent while the relevant classifier is untrained.
    pub ml_confidence: Option<u8>,
    pub blended_confidence: u8,
}

/// Dashboard status block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlStatus {
    pub day_samples: usize,
    pub swing_samples: usize,
    pub day_trained: bool,
    pub swing_trained: bool,
    pub last_trained_at: Option<DateTime<Utc>>,
    pub alpha_day: f64,
    pub alpha_swing: f64,
    pub dataset_len: usize,
}

pub struct MlCalibrator {
    day_model: RwLock<Option<LogisticModel>>,
    swing_model: RwLock<Option<LogisticModel>>,
    dataset: RwLock<Vec<TrainingSample>>,
    dataset_path: PathBuf,
    last_trained_at: RwLock<Option<DateTime<Utc>>>,
}

impl MlCalibrator {
    /// Load the cumulative dataset from disk (empty on first run) and train
    /// immediately if enough labels are already banked.
    pub fn load(dataset_path: PathBuf) -> Self {
        let dataset: Vec<TrainingSample> = persist::read_json_or_default(&dataset_path);
        if !dataset.is_empty() {
            info!(samples = dataset.len(), "ML training dataset restored");
        }

        let calibrator = Self {
            day_model: RwLock::new(None),
            swing_model: RwLock::new(None),
            dataset: RwLock::new(dataset),
            dataset_path,
            last_trained_at: RwLock::new(None),
        };
        calibrator.retrain_all();
        calibrator
    }

    // ── Sample intake ───────────────────────────────────────────────────

    /// Append a labeled sample, write the dataset through, and train when
    /// the gate conditions are met.
    pub fn add_sample(&self, sample: TrainingSample) {
        let horizon = sample.horizon.clone();
        let horizon_count;
        {
            let mut dataset = self.dataset.write();
            dataset.push(sample);
            if dataset.len() > MAX_SAMPLES {
                let excess = dataset.len() - MAX_SAMPLES;
                dataset.drain(..excess);
            }
            horizon_count = dataset.iter().filter(|s| s.horizon == horizon).count();
        }

        self.persist_dataset();

        if horizon_count >= MIN_TRAINING_SAMPLES && horizon_count % TRAIN_EVERY == 0 {
            self.train_horizon(&horizon);
        }
    }

    /// Nightly full retrain from the cumulative dataset.
    pub fn retrain_all(&self) {
        self.train_horizon("day");
        self.train_horizon("swing");
    }

    fn train_horizon(&self, horizon: &str) {
        let samples: Vec<(Vec<f64>, f64)> = self
            .dataset
            .read()
            .iter()
            .filter(|s| s.horizon == horizon)
            .map(|s| (s.features.clone(), s.label as f64))
            .collect();

        if samples.len() < MIN_TRAINING_SAMPLES {
            debug!(horizon, count = samples.len(), "below training minimum — skipped");
            return;
        }

        match LogisticModel::train(&samples) {
            Some(model) => {
                info!(horizon, samples = samples.len(), "classifier trained");
                match horizon {
                    "day" => *self.day_model.write() = Some(model),
                    "swing" => *self.swing_model.write() = Some(model),
                    other => warn!(horizon = other, "unknown training horizon — dropped"),
                }
                *self.last_trained_at.write() = Some(Utc::now());
            }
            None => warn!(horizon, "training produced no model (degenerate inputs)"),
        }
    }

    fn persist_dataset(&self) {
        let dataset = self.dataset.read().clone();
        if let Err(e) = persist::write_json_atomic(&self.dataset_path, &dataset) {
            warn!(error = %e, "failed to persist ML dataset");
        }
    }

    // ── Ensemble ────────────────────────────────────────────────────────

    /// Blend the engine's technical confidence with the classifier's
    /// predicted win probability for the given horizon profile.
    pub fn blend(&self, technical_confidence: u8, features: &[f64], profile: &str) -> BlendedConfidence {
        let (model_guard, samples) = if profile == "swing" {
            (self.swing_model.read(), self.horizon_samples("swing"))
        } else {
            (self.day_model.read(), self.horizon_samples("day"))
        };

        let Some(model) = model_guard.as_ref() else {
            return BlendedConfidence {
                technical_confidence,
                ml_confidence: None,
                blended_confidence: technical_confidence,
            };
        };

        let Some(p) = model.predict(features) else {
            return BlendedConfidence {
                technical_confidence,
                ml_confidence: None,
                blended_confidence: technical_confidence,
            };
        };

        let ml_pct = (p * 100.0).round().clamp(0.0, 100.0);
        let alpha = Self::alpha(samples);
        let blended = (technical_confidence as f64 * (1.0 - alpha) + ml_pct * alpha)
            .round()
            .clamp(0.0, 95.0) as u8;

        BlendedConfidence {
            technical_confidence,
            ml_confidence: Some(ml_pct as u8),
            blended_confidence: blended,
        }
    }

    /// Blend weight: grows with labeled-sample count, capped below 0.5 so
    /// the rule engine always keeps the majority.
    pub fn alpha(samples: usize) -> f64 {
        (0.10 + samples as f64 / 2_000.0 * 0.35).min(0.45)
    }

    // ── Introspection ───────────────────────────────────────────────────

    fn horizon_samples(&self, horizon: &str) -> usize {
        self.dataset.read().iter().filter(|s| s.horizon == horizon).count()
    }

    pub fn status(&self) -> MlStatus {
        let day = self.horizon_samples("day");
        let swing = self.horizon_samples("swing");
        MlStatus {
            day_samples: day,
            swing_samples: swing,
            day_trained: self.day_model.read().is_some(),
            swing_trained: self.swing_model.read().is_some(),
            last_trained_at: *self.last_trained_at.read(),
            alpha_day: Self::alpha(day),
            alpha_swing: Self::alpha(swing),
            dataset_len: self.dataset.read().len(),
        }
    }

    /// Per-feature importances from the day model, keyed by feature name.
    /// The signal engine absorbs these only behind operator confirmation.
    pub fn suggested_weights(&self) -> Option<HashMap<String, f64>> {
        let guard = self.day_model.read();
        let model = guard.as_ref()?;
        let importances = model.importances();
        Some(
            FEATURE_NAMES
                .iter()
                .zip(importances)
                .map(|(name, imp)| (name.to_string(), imp))
                .collect(),
        )
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::features::FEATURE_COUNT;

    fn tmp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("meridian-ml-{tag}-{}.json", std::process::id()))
    }

    fn sample(horizon: &str, win: bool) -> TrainingSample {
        let mut features = vec![0.0; FEATURE_COUNT];
        features[0] = if win { 0.8 } else { 0.2 };
        features[2] = if win { 1.0 } else { -1.0 };
        TrainingSample {
            features,
            label: win as u8,
            confidence: 60,
            pnl_pct: if win { 1.5 } else { -1.0 },
            horizon: horizon.to_string(),
            at: Utc::now(),
        }
    }

    #[test]
    fn no_training_below_minimum() {
        let path = tmp_path("below-min");
        let cal = MlCalibrator::load(path.clone());
        for i in 0..(MIN_TRAINING_SAMPLES - 1) {
            cal.add_sample(sample("day", i % 2 == 0));
        }
        assert!(!cal.status().day_trained);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn trains_at_gate() {
        let path = tmp_path("at-gate");
        let cal = MlCalibrator::load(path.clone());
        // 30 samples: >= minimum and a multiple of 10.
        for i in 0..30 {
            cal.add_sample(sample("day", i % 2 == 0));
        }
        assert!(cal.status().day_trained);
        assert!(!cal.status().swing_trained);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn blend_without_model_passes_through() {
        let path = tmp_path("no-model");
        let cal = MlCalibrator::load(path.clone());
        let features = vec![0.0; FEATURE_COUNT];
        let blend = cal.blend(62, &features, "day");
        assert_eq!(blend.technical_confidence, 62);
        assert!(blend.ml_confidence.is_none());
        assert_eq!(blend.blended_confidence, 62);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn blend_moves_toward_model() {
        let path = tmp_path("blend");
        let cal = MlCalibrator::load(path.clone());
        for i in 0..40 {
            cal.add_sample(sample("day", i % 2 == 0));
        }
        assert!(cal.status().day_trained);

        // A feature vector the model learned to call a winner.
        let winner = sample("day", true).features;
        let blend = cal.blend(50, &winner, "day");
        let ml = blend.ml_confidence.unwrap();
        assert!(ml > 50, "model should call this a winner, got {ml}");
        assert!(blend.blended_confidence > 50);
        assert!(blend.blended_confidence <= 95);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn alpha_grows_and_caps() {
        assert!(MlCalibrator::alpha(0) < MlCalibrator::alpha(500));
        assert!(MlCalibrator::alpha(500) < MlCalibrator::alpha(1500));
        assert!(MlCalibrator::alpha(100_000) < 0.5);
        assert_eq!(MlCalibrator::alpha(100_000), 0.45);
    }

    #[test]
    fn dataset_persists_across_restart() {
        let path = tmp_path("restart");
        {
            let cal = MlCalibrator::load(path.clone());
            for i in 0..12 {
                cal.add_sample(sample("swing", i % 2 == 0));
            }
        }
        let cal = MlCalibrator::load(path.clone());
        assert_eq!(cal.status().swing_samples, 12);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn suggested_weights_keyed_by_feature() {
        let path = tmp_path("suggest");
        let cal = MlCalibrator::load(path.clone());
        assert!(cal.suggested_weights().is_none());
        for i in 0..30 {
            cal.add_sample(sample("day", i % 2 == 0));
        }
        let weights = cal.suggested_weights().unwrap();
        assert_eq!(weights.len(), FEATURE_COUNT);
        assert!(weights.contains_key("rsi"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn dataset_capped_at_most_recent() {
        // Use a small local check of the drain logic rather than 50k pushes.
        let path = tmp_path("cap");
        let cal = MlCalibrator::load(path.clone());
        {
            let mut ds = cal.dataset.write();
            for i in 0..(MAX_SAMPLES + 25) {
                let mut s = sample("day", i % 2 == 0);
                s.pnl_pct = i as f64;
                ds.push(s);
            }
            let excess = ds.len() - MAX_SAMPLES;
            ds.drain(..excess);
            assert_eq!(ds.len(), MAX_SAMPLES);
            assert_eq!(ds.last().unwrap().pnl_pct, (MAX_SAMPLES + 24) as f64);
        }
        let _ = std::fs::remove_file(&path);
    }
}
