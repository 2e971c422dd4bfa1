use crate::reading::ReadingHistory;

use super::{AnomalyDetector, Verdict};

/// Flags readings strictly above a fixed threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdDetector {
    threshold: f64,
}

impl ThresholdDetector {
    /// Detector flagging readings above `threshold` litres.
    #[must_use]
    pub const fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl AnomalyDetector for ThresholdDetector {
    fn evaluate(&self, history: &ReadingHistory) -> Verdict {
        let Some(latest) = history.latest() else {
            return Verdict::normal(0.0);
        };
        Verdict {
            anomalous: latest > self.threshold,
            observed: latest,
            predicted: None,
        }
    }

    fn name(&self) -> &'static str {
        "threshold"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(values: &[f64]) -> ReadingHistory {
        let mut h = ReadingHistory::with_capacity(10);
        for v in values {
            h.push(*v);
        }
        h
    }

    #[test]
    fn only_latest_reading_counts() {
        let d = ThresholdDetector::new(1.5);
        assert!(d.evaluate(&history(&[0.5, 2.0])).anomalous);
        assert!(!d.evaluate(&history(&[2.0, 0.5])).anomalous);
    }

    #[test]
    fn threshold_is_exclusive() {
        let d = ThresholdDetector::new(1.5);
        assert!(!d.evaluate(&history(&[1.5])).anomalous);
        assert!(d.evaluate(&history(&[1.51])).anomalous);
    }

    #[test]
    fn empty_window_is_normal() {
        assert!(!ThresholdDetector::new(1.5).evaluate(&history(&[])).anomalous);
    }
}
