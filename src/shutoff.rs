//! Leak shutoff state machine.
//!
//! Transitions are plain functions over `SimulationState`; the caller holds
//! the meter lock for the whole call, so each transition is atomic with
//! respect to commands and bridge events.
//!
//! ```text
//! Normal --anomalous--> AnomalyAccumulating --count == trigger--> GracePeriod
//!   ^                          |                                    |   |
//!   +------- normal tick ------+<------- leak cleared / shut off ---+   |
//!                                                                       v
//! ShutOff <--------- countdown exhausted with leak still active --------+
//!    |
//!    +--- resume ---> Normal
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::MeterConfig;
use crate::state::{GracePeriod, Phase, SimulationState};

/// Timing parameters of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutoffPolicy {
    /// Consecutive anomalous ticks that open a grace period.
    pub trigger_threshold: u32,
    /// Check-ins before automatic shutoff.
    pub countdown_length: u32,
}

impl Default for ShutoffPolicy {
    fn default() -> Self {
        Self {
            trigger_threshold: 5,
            countdown_length: 2,
        }
    }
}

impl From<&MeterConfig> for ShutoffPolicy {
    fn from(cfg: &MeterConfig) -> Self {
        Self {
            trigger_threshold: cfg.trigger_threshold,
            countdown_length: cfg.countdown_length,
        }
    }
}

/// What a single step did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    /// Nothing changed phase.
    Steady,
    /// An anomalous reading was counted.
    AnomalyCounted {
        /// Counter after the increment.
        count: u32,
    },
    /// A normal reading cleared pending anomalies.
    Cleared,
    /// The trigger threshold was reached; countdown started.
    GraceOpened {
        /// Check-ins in the countdown.
        attempts: u32,
    },
    /// A check-in found the leak still active.
    Waiting {
        /// Check-ins left.
        attempts_remaining: u32,
    },
    /// The leak was resolved during the countdown.
    Resolved,
    /// The countdown ran out and the supply was cut.
    AutoShutoff,
}

impl ShutoffPolicy {
    /// Apply a detector verdict for a freshly sampled reading.
    ///
    /// Must not be called while a grace period is open; use [`Self::check_in`].
    pub fn on_verdict(&self, state: &mut SimulationState, anomalous: bool, now: DateTime<Utc>) -> Transition {
        debug_assert!(state.phase != Phase::GracePeriod, "verdict applied during grace period");

        if state.water_shutoff {
            state.consecutive_anomaly_count = 0;
            state.phase = Phase::ShutOff;
            return Transition::Steady;
        }

        if !anomalous {
            let was_counting = state.consecutive_anomaly_count > 0;
            state.consecutive_anomaly_count = 0;
            state.phase = Phase::Normal;
            return if was_counting {
                Transition::Cleared
            } else {
                Transition::Steady
            };
        }

        state.consecutive_anomaly_count = state.consecutive_anomaly_count.saturating_add(1);
        if state.consecutive_anomaly_count >= self.trigger_threshold {
            state.phase = Phase::GracePeriod;
            state.grace = Some(GracePeriod {
                attempts_remaining: self.countdown_length,
                started_at: now,
            });
            Transition::GraceOpened {
                attempts: self.countdown_length,
            }
        } else {
            state.phase = Phase::AnomalyAccumulating;
            Transition::AnomalyCounted {
                count: state.consecutive_anomaly_count,
            }
        }
    }

    /// One grace-period check-in.
    ///
    /// Resolves the countdown if the supply is already cut or the leak was
    /// cleared; otherwise consumes one attempt and cuts the supply once none
    /// are left.
    pub fn check_in(&self, state: &mut SimulationState) -> Transition {
        let Some(mut grace) = state.grace.take() else {
            return Transition::Steady;
        };

        if state.water_shutoff || !state.leak_mode {
            state.consecutive_anomaly_count = 0;
            state.phase = if state.water_shutoff { Phase::ShutOff } else { Phase::Normal };
            return Transition::Resolved;
        }

        grace.attempts_remaining = grace.attempts_remaining.saturating_sub(1);
        if grace.attempts_remaining > 0 {
            state.grace = Some(grace);
            return Transition::Waiting {
                attempts_remaining: grace.attempts_remaining,
            };
        }

        state.water_shutoff = true;
        state.consecutive_anomaly_count = 0;
        state.phase = Phase::ShutOff;
        Transition::AutoShutoff
    }
}

/// Start simulating a leak.
pub fn simulate_leak(state: &mut SimulationState) {
    state.leak_mode = true;
}

/// Stop simulating a leak and drop pending anomalies.
///
/// An open grace period stays open and resolves at its next check-in.
pub fn stop_leak(state: &mut SimulationState) {
    state.leak_mode = false;
    state.consecutive_anomaly_count = 0;
    if state.phase == Phase::AnomalyAccumulating {
        state.phase = Phase::Normal;
    }
}

/// Clear the leak flag without touching the counter (bridge writes).
pub fn clear_leak_flag(state: &mut SimulationState) {
    state.leak_mode = false;
}

/// Cut the supply immediately, bypassing any grace period.
pub fn force_shutoff(state: &mut SimulationState) {
    state.water_shutoff = true;
    state.consecutive_anomaly_count = 0;
    state.grace = None;
    state.phase = Phase::ShutOff;
}

/// Restore the supply and return to `Normal`.
pub fn resume(state: &mut SimulationState) {
    state.water_shutoff = false;
    state.consecutive_anomaly_count = 0;
    state.grace = None;
    state.phase = Phase::Normal;
}
