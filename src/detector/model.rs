//! Prediction-error anomaly detection.
//!
//! The window is standardised, handed to a [`Predictor`], and the prediction
//! is mapped back to litres. A reading is anomalous when it is further than
//! `anomaly_error_threshold` from the prediction. Until the window is full
//! the detector always reports normal.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::reading::ReadingHistory;

use super::{AnomalyDetector, Verdict};

/// Predicts the next standardised value from a standardised window.
///
/// Implemented for any `Fn(&[f64]) -> f64`, so a trained model can be plugged
/// in as a closure.
pub trait Predictor: Send + Sync {
    /// Predict the next value. `window` is ordered oldest first.
    fn predict(&self, window: &[f64]) -> f64;
}

impl<F> Predictor for F
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn predict(&self, window: &[f64]) -> f64 {
        self(window)
    }
}

/// Predicts the mean of the window.
#[derive(Debug, Clone, Copy, Default)]
pub struct MovingAveragePredictor;

impl Predictor for MovingAveragePredictor {
    fn predict(&self, window: &[f64]) -> f64 {
        if window.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = window.len() as f64;
        window.iter().sum::<f64>() / n
    }
}

/// Standard score transform (`(x - mean) / std`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    /// Mean of the fitted data.
    pub mean: f64,
    /// Population standard deviation of the fitted data.
    pub std: f64,
}

impl Default for StandardScaler {
    /// Fitted on the bounds of the normal usage range, `[0.4, 1.0]`.
    fn default() -> Self {
        Self { mean: 0.7, std: 0.3 }
    }
}

impl StandardScaler {
    /// Fit on sample data. Constant or empty data yields a unit deviation.
    #[must_use]
    pub fn fit(data: &[f64]) -> Self {
        if data.is_empty() {
            return Self { mean: 0.0, std: 1.0 };
        }
        #[allow(clippy::cast_precision_loss)]
        let n = data.len() as f64;
        let mean = data.iter().sum::<f64>() / n;
        let var = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        Self {
            mean,
            std: if std > 0.0 { std } else { 1.0 },
        }
    }

    /// Scale a raw value.
    #[must_use]
    pub fn transform(&self, x: f64) -> f64 {
        (x - self.mean) / self.std
    }

    /// Map a scaled value back to litres.
    #[must_use]
    pub fn inverse(&self, z: f64) -> f64 {
        z * self.std + self.mean
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        if self.std.is_finite() && self.std > 0.0 && self.mean.is_finite() {
            Ok(())
        } else {
            Err(ValidationError::DegenerateScaler { std: self.std })
        }
    }
}

/// Anomaly detector driven by a next-value predictor.
#[derive(Clone)]
pub struct ModelDetector {
    predictor: Arc<dyn Predictor>,
    scaler: StandardScaler,
    error_threshold: f64,
}

impl fmt::Debug for ModelDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDetector")
            .field("scaler", &self.scaler)
            .field("error_threshold", &self.error_threshold)
            .finish_non_exhaustive()
    }
}

impl ModelDetector {
    /// Flags a reading when it misses the prediction by more than `error_threshold`.
    #[must_use]
    pub fn new(predictor: Arc<dyn Predictor>, scaler: StandardScaler, error_threshold: f64) -> Self {
        Self {
            predictor,
            scaler,
            error_threshold,
        }
    }
}

impl AnomalyDetector for ModelDetector {
    fn evaluate(&self, history: &ReadingHistory) -> Verdict {
        let Some(actual) = history.latest() else {
            return Verdict::normal(0.0);
        };
        if !history.is_full() {
            return Verdict::normal(actual);
        }

        let scaled: Vec<f64> = history.iter().map(|x| self.scaler.transform(x)).collect();
        let predicted = self.scaler.inverse(self.predictor.predict(&scaled));
        let error = (predicted - actual).abs();

        Verdict {
            anomalous: error > self.error_threshold,
            observed: actual,
            predicted: Some(predicted),
        }
    }

    fn name(&self) -> &'static str {
        "model"
    }
}
