//! Shared simulation state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reading::ReadingHistory;

/// Shutoff state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No anomaly pending.
    Normal,
    /// Consecutive anomalous readings are being counted.
    AnomalyAccumulating,
    /// Countdown before automatic shutoff.
    GracePeriod,
    /// Supply is cut; only a resume leaves this phase.
    ShutOff,
}

impl Phase {
    /// Snake-case name used in logs and status output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::AnomalyAccumulating => "anomaly_accumulating",
            Self::GracePeriod => "grace_period",
            Self::ShutOff => "shut_off",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Countdown opened once the anomaly counter reaches the trigger threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePeriod {
    /// Check-ins left before shutoff.
    pub attempts_remaining: u32,
    /// When the countdown started.
    pub started_at: DateTime<Utc>,
}

/// State shared by the sampler loop, the command channel and the bridge.
///
/// Every field is only touched while the owning `Meter` lock is held.
#[derive(Debug, Clone)]
pub struct SimulationState {
    /// Leak simulation toggle.
    pub leak_mode: bool,
    /// Supply cut; forces zero readings.
    pub water_shutoff: bool,
    /// Consecutive anomalous readings.
    pub consecutive_anomaly_count: u32,
    /// Recent readings, oldest first.
    pub reading_history: ReadingHistory,
    /// Current phase of the shutoff state machine.
    pub phase: Phase,
    /// Open countdown, present only in `Phase::GracePeriod`.
    pub grace: Option<GracePeriod>,
}

impl SimulationState {
    /// Fresh state with an empty window of `window_size` readings.
    #[must_use]
    pub fn new(window_size: usize) -> Self {
        Self {
            leak_mode: false,
            water_shutoff: false,
            consecutive_anomaly_count: 0,
            reading_history: ReadingHistory::with_capacity(window_size),
            phase: Phase::Normal,
            grace: None,
        }
    }

    /// Externally visible view of the state.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            leak_mode: self.leak_mode,
            water_shutoff: self.water_shutoff,
            consecutive_anomaly_count: self.consecutive_anomaly_count,
            phase: self.phase,
        }
    }
}

/// Copy of the fields exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Leak simulation active.
    pub leak_mode: bool,
    /// Supply cut.
    pub water_shutoff: bool,
    /// Consecutive anomalous readings.
    pub consecutive_anomaly_count: u32,
    /// Lifecycle phase.
    pub phase: Phase,
}
