// =============================================================================
// ML calibration — logistic classifiers blended with the rule engine
// =============================================================================

pub mod calibrator;
pub mod model;

pub use calibrator::{BlendedConfidence, MlCalibrator, MlStatus, TrainingSample};
pub use model::LogisticModel;
