//! Command channel vocabulary.
//!
//! Commands arrive as short text lines. Parsing is case-insensitive and
//! ignores surrounding whitespace; anything unrecognised becomes
//! [`Command::Unknown`] and leaves the state untouched.

use std::fmt;

use crate::shutoff;
use crate::state::SimulationState;

/// Response sent for unrecognised input.
pub const UNKNOWN_RESPONSE: &str = "Unknown command.";

/// A parsed command-channel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `make a leak`
    SimulateLeak,
    /// `stop leak`
    StopLeak,
    /// `stop water`
    ForceShutoff,
    /// `start water`
    Resume,
    /// `status`
    Status,
    /// Anything else, normalised.
    Unknown(String),
}

impl Command {
    /// Recognised commands in wire order.
    pub const KNOWN: [Self; 5] = [
        Self::SimulateLeak,
        Self::StopLeak,
        Self::ForceShutoff,
        Self::Resume,
        Self::Status,
    ];

    /// Parse one line of input.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "make a leak" => Self::SimulateLeak,
            "stop leak" => Self::StopLeak,
            "stop water" => Self::ForceShutoff,
            "start water" => Self::Resume,
            "status" => Self::Status,
            _ => Self::Unknown(normalized),
        }
    }

    /// Wire text of a recognised command.
    #[must_use]
    pub const fn wire(&self) -> Option<&'static str> {
        match self {
            Self::SimulateLeak => Some("make a leak"),
            Self::StopLeak => Some("stop leak"),
            Self::ForceShutoff => Some("stop water"),
            Self::Resume => Some("start water"),
            Self::Status => Some("status"),
            Self::Unknown(_) => None,
        }
    }

    /// Returns true if applying this command may change the state.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        !matches!(self, Self::Status | Self::Unknown(_))
    }

    /// Apply the command and build the single-line response.
    ///
    /// The caller must hold the state lock.
    pub fn apply(&self, state: &mut SimulationState) -> String {
        match self {
            Self::SimulateLeak => {
                shutoff::simulate_leak(state);
                "Leak simulation activated!".to_string()
            }
            Self::StopLeak => {
                shutoff::stop_leak(state);
                "Leak simulation deactivated!".to_string()
            }
            Self::ForceShutoff => {
                shutoff::force_shutoff(state);
                "Water manually shut off!".to_string()
            }
            Self::Resume => {
                shutoff::resume(state);
                "Water resumed!".to_string()
            }
            Self::Status => format!(
                "Status - Leak: {}, Shutoff: {}, Counter: {}",
                state.leak_mode, state.water_shutoff, state.consecutive_anomaly_count
            ),
            Self::Unknown(_) => UNKNOWN_RESPONSE.to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.wire() {
            Some(w) => f.write_str(w),
            None => f.write_str("unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Phase;

    #[test]
    fn parse_is_case_and_whitespace_insensitive() {
        assert_eq!(Command::parse("  MAKE A LEAK \n"), Command::SimulateLeak);
        assert_eq!(Command::parse("Stop Leak"), Command::StopLeak);
        assert_eq!(Command::parse("stop water\r\n"), Command::ForceShutoff);
        assert_eq!(Command::parse("start water"), Command::Resume);
        assert_eq!(Command::parse("STATUS"), Command::Status);
        assert_eq!(Command::parse("reboot"), Command::Unknown("reboot".to_string()));
        assert_eq!(Command::parse("make  a leak"), Command::Unknown("make  a leak".to_string()));
    }

    #[test]
    fn wire_round_trips_known_commands() {
        for cmd in Command::KNOWN {
            let wire = cmd.wire().unwrap();
            assert_eq!(Command::parse(wire), cmd);
        }
    }

    #[test]
    fn unknown_never_mutates() {
        let mut s = SimulationState::new(10);
        s.leak_mode = true;
        s.consecutive_anomaly_count = 3;
        let before = s.snapshot();
        assert_eq!(Command::parse("reboot").apply(&mut s), UNKNOWN_RESPONSE);
        assert_eq!(s.snapshot(), before);
    }

    #[test]
    fn command_effects() {
        let mut s = SimulationState::new(10);

        Command::SimulateLeak.apply(&mut s);
        assert!(s.leak_mode);

        s.consecutive_anomaly_count = 4;
        s.phase = Phase::AnomalyAccumulating;
        Command::StopLeak.apply(&mut s);
        assert!(!s.leak_mode);
        assert_eq!(s.consecutive_anomaly_count, 0);
        assert_eq!(s.phase, Phase::Normal);

        Command::ForceShutoff.apply(&mut s);
        assert!(s.water_shutoff);
        assert_eq!(s.phase, Phase::ShutOff);

        s.consecutive_anomaly_count = 2;
        Command::Resume.apply(&mut s);
        assert!(!s.water_shutoff);
        assert_eq!(s.consecutive_anomaly_count, 0);
    }

    #[test]
    fn status_reports_flags_and_counter() {
        let mut s = SimulationState::new(10);
        s.leak_mode = true;
        s.consecutive_anomaly_count = 2;
        let before = s.snapshot();
        let out = Command::Status.apply(&mut s);
        assert_eq!(out, "Status - Leak: true, Shutoff: false, Counter: 2");
        assert_eq!(s.snapshot(), before);
    }
}
