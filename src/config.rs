//! Meter configuration.
//!
//! A `MeterConfig` selects a deployment profile: tick cadence, window size,
//! usage ranges, detector strategy, and shutoff timing. Every field has a
//! default matching the reference deployment, so a JSON file only needs to
//! name what it changes.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detector::StandardScaler;
use crate::error::{MeterResult, ValidationError};

/// Highest rounding precision accepted for generated readings.
pub const MAX_READING_PRECISION: u32 = 6;

/// Inclusive range of usage values, in litres per tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageRange {
    /// Lower bound.
    pub low: f64,
    /// Upper bound.
    pub high: f64,
}

impl UsageRange {
    /// Creates a range without validating it.
    #[must_use]
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Returns true if `value` lies inside the range.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }

    fn validate(&self, field: &str) -> Result<(), ValidationError> {
        let ok = self.low.is_finite() && self.high.is_finite() && self.low >= 0.0 && self.low < self.high;
        if ok {
            Ok(())
        } else {
            Err(ValidationError::InvalidRange {
                field: field.to_string(),
                low: self.low,
                high: self.high,
            })
        }
    }
}

/// Usage range produced while a leak is simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeakProfile {
    /// Mild leak, `[2.0, 3.0]` litres.
    Minimal,
    /// Full leak, `[2.0, 8.0]` litres.
    #[default]
    Full,
}

impl LeakProfile {
    /// The usage range this profile samples from.
    #[must_use]
    pub const fn range(self) -> UsageRange {
        match self {
            Self::Minimal => UsageRange::new(2.0, 3.0),
            Self::Full => UsageRange::new(2.0, 8.0),
        }
    }
}

impl FromStr for LeakProfile {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "full" => Ok(Self::Full),
            other => Err(ValidationError::MalformedConfig {
                message: format!("unknown leak profile '{other}' (expected minimal|full)"),
            }),
        }
    }
}

/// Anomaly detector strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorConfig {
    /// Latest reading compared against a fixed threshold.
    Threshold {
        /// Readings strictly above this value are anomalous.
        threshold: f64,
    },
    /// Prediction-error comparison over a full window.
    Model {
        /// Absolute prediction errors strictly above this value are anomalous.
        anomaly_error_threshold: f64,
        /// Standardisation applied to the window before prediction.
        #[serde(default)]
        scaler: StandardScaler,
    },
}

impl DetectorConfig {
    /// Default static-threshold strategy (`1.5` litres).
    pub const DEFAULT_THRESHOLD: f64 = 1.5;
    /// Default prediction-error threshold (`0.5` litres).
    pub const DEFAULT_ERROR_THRESHOLD: f64 = 0.5;

    /// Default model strategy.
    #[must_use]
    pub fn model() -> Self {
        Self::Model {
            anomaly_error_threshold: Self::DEFAULT_ERROR_THRESHOLD,
            scaler: StandardScaler::default(),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let (field, value) = match self {
            Self::Threshold { threshold } => ("threshold", *threshold),
            Self::Model {
                anomaly_error_threshold,
                scaler,
            } => {
                scaler.validate()?;
                ("anomaly_error_threshold", *anomaly_error_threshold)
            }
        };
        if !value.is_finite() || value < 0.0 {
            return Err(ValidationError::InvalidThreshold {
                field: field.to_string(),
                value,
            });
        }
        Ok(())
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::Threshold {
            threshold: Self::DEFAULT_THRESHOLD,
        }
    }
}

/// Full meter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Length of one tick (one simulated minute), in milliseconds.
    pub tick_interval_ms: u64,
    /// Capacity of the reading history window.
    pub window_size: usize,
    /// Usage range while no leak is simulated.
    pub normal_range: UsageRange,
    /// Usage range while a leak is simulated.
    pub leak_profile: LeakProfile,
    /// Anomaly detector strategy.
    pub detector: DetectorConfig,
    /// Consecutive anomalous ticks that open a grace period.
    pub trigger_threshold: u32,
    /// Grace-period check-ins before automatic shutoff.
    pub countdown_length: u32,
    /// Decimal places generated readings are rounded to.
    pub reading_precision: u32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
            window_size: 10,
            normal_range: UsageRange::new(0.4, 1.0),
            leak_profile: LeakProfile::Full,
            detector: DetectorConfig::default(),
            trigger_threshold: 5,
            countdown_length: 2,
            reading_precision: 2,
        }
    }
}

impl MeterConfig {
    /// Tick interval as a `Duration`.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Leak usage range of the selected profile.
    #[must_use]
    pub const fn leak_range(&self) -> UsageRange {
        self.leak_profile.range()
    }

    /// Worst-case number of ticks from the first anomalous reading to an
    /// automatic shutoff.
    #[must_use]
    pub const fn max_response_ticks(&self) -> u32 {
        self.trigger_threshold + self.countdown_length
    }

    /// Validate the configuration.
    ///
    /// This must be called before constructing a `Meter`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tick_interval_ms == 0 {
            return Err(ValidationError::ZeroTickInterval);
        }
        if self.window_size == 0 {
            return Err(ValidationError::EmptyWindow);
        }
        if self.trigger_threshold == 0 {
            return Err(ValidationError::ZeroCount {
                field: "trigger_threshold".to_string(),
            });
        }
        if self.countdown_length == 0 {
            return Err(ValidationError::ZeroCount {
                field: "countdown_length".to_string(),
            });
        }
        if self.reading_precision > MAX_READING_PRECISION {
            return Err(ValidationError::PrecisionTooHigh {
                precision: self.reading_precision,
                max: MAX_READING_PRECISION,
            });
        }
        self.normal_range.validate("normal_range")?;
        self.leak_range().validate("leak_range")?;
        self.detector.validate()
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> MeterResult<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ValidationError::MalformedConfig {
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> MeterResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ValidationError::MalformedConfig {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        MeterConfig::default().validate().unwrap();
    }

    #[test]
    fn reject_zero_limits() {
        let mut c = MeterConfig::default();
        c.window_size = 0;
        assert!(matches!(c.validate(), Err(ValidationError::EmptyWindow)));

        let mut c = MeterConfig::default();
        c.tick_interval_ms = 0;
        assert!(matches!(c.validate(), Err(ValidationError::ZeroTickInterval)));

        let mut c = MeterConfig::default();
        c.trigger_threshold = 0;
        assert!(c.validate().is_err());

        let mut c = MeterConfig::default();
        c.countdown_length = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn reject_inverted_range_and_negative_threshold() {
        let mut c = MeterConfig::default();
        c.normal_range = UsageRange::new(1.0, 0.4);
        assert!(matches!(c.validate(), Err(ValidationError::InvalidRange { .. })));

        let mut c = MeterConfig::default();
        c.detector = DetectorConfig::Threshold { threshold: -1.0 };
        assert!(matches!(c.validate(), Err(ValidationError::InvalidThreshold { .. })));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{
            "tick_interval_ms": 100,
            "leak_profile": "minimal",
            "detector": {"kind": "model", "anomaly_error_threshold": 0.8}
        }"#;
        let cfg = MeterConfig::from_json_str(json).unwrap();
        assert_eq!(cfg.tick_interval_ms, 100);
        assert_eq!(cfg.window_size, 10);
        assert_eq!(cfg.leak_range(), UsageRange::new(2.0, 3.0));
        match cfg.detector {
            DetectorConfig::Model { anomaly_error_threshold, scaler } => {
                assert!((anomaly_error_threshold - 0.8).abs() < f64::EPSILON);
                assert_eq!(scaler, StandardScaler::default());
            }
            other => panic!("expected model detector, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_validation_error() {
        let err = MeterConfig::from_json_str("{not json").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn leak_profile_from_str() {
        assert_eq!("Minimal".parse::<LeakProfile>().unwrap(), LeakProfile::Minimal);
        assert_eq!(" full ".parse::<LeakProfile>().unwrap(), LeakProfile::Full);
        assert!("huge".parse::<LeakProfile>().is_err());
    }

    #[test]
    fn worst_case_response_ticks() {
        assert_eq!(MeterConfig::default().max_response_ticks(), 7);
    }
}
