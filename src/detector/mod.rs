//! Anomaly detection strategies.
//!
//! A detector looks at the reading window after each sample and decides
//! whether the latest reading is anomalous. The shutoff state machine only
//! consumes the verdict, so strategies are interchangeable at configuration
//! time.

/// Prediction-error strategy and its pluggable predictor.
pub mod model;
/// Static threshold strategy.
pub mod threshold;

use std::fmt::Debug;
use std::sync::Arc;

use serde::Serialize;

use crate::config::DetectorConfig;
use crate::reading::ReadingHistory;

pub use model::{ModelDetector, MovingAveragePredictor, Predictor, StandardScaler};
pub use threshold::ThresholdDetector;

/// Outcome of evaluating one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Verdict {
    /// Whether the latest reading is anomalous.
    pub anomalous: bool,
    /// The reading that was judged.
    pub observed: f64,
    /// Predicted value, for strategies that predict.
    pub predicted: Option<f64>,
}

impl Verdict {
    /// A non-anomalous verdict without prediction.
    #[must_use]
    pub const fn normal(observed: f64) -> Self {
        Self {
            anomalous: false,
            observed,
            predicted: None,
        }
    }
}

/// Judges the latest reading of a history window.
pub trait AnomalyDetector: Send + Sync + Debug {
    /// Evaluate the window. An empty window is never anomalous.
    fn evaluate(&self, history: &ReadingHistory) -> Verdict;

    /// Short strategy name for logs.
    fn name(&self) -> &'static str;
}

/// Build the detector selected by `cfg`.
///
/// The model strategy uses `predictor` when supplied and falls back to
/// [`MovingAveragePredictor`] otherwise.
#[must_use]
pub fn build_detector(cfg: &DetectorConfig, predictor: Option<Arc<dyn Predictor>>) -> Box<dyn AnomalyDetector> {
    match *cfg {
        DetectorConfig::Threshold { threshold } => Box::new(ThresholdDetector::new(threshold)),
        DetectorConfig::Model {
            anomaly_error_threshold,
            scaler,
        } => {
            let predictor = predictor.unwrap_or_else(|| Arc::new(MovingAveragePredictor));
            Box::new(ModelDetector::new(predictor, scaler, anomaly_error_threshold))
        }
    }
}
