//! Meter coordinator.
//!
//! `Meter` owns the simulation state behind a single mutex. One tick samples
//! a reading, appends it to the window, runs the detector and advances the
//! shutoff state machine without releasing the lock, so commands and bridge
//! events are serialised before or after a tick, never inside it.

/// Sampling loop thread.
pub mod runtime;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::RngCore;
use serde::Serialize;

use crate::bridge::{BridgeEvent, BridgeFlag};
use crate::command::Command;
use crate::config::MeterConfig;
use crate::detector::{build_detector, AnomalyDetector, Predictor, Verdict};
use crate::error::{MeterResult, ValidationError};
use crate::reading::Reading;
use crate::sampler::UsageSampler;
use crate::shutoff::{self, ShutoffPolicy, Transition};
use crate::state::{Phase, SimulationState, StatusSnapshot};

pub use runtime::{MeterRuntime, TickSink};

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TickOutcome {
    /// Reading taken this tick; `None` for grace-period check-ins.
    pub reading: Option<Reading>,
    /// Detector verdict for the reading.
    pub verdict: Option<Verdict>,
    /// State machine step taken.
    pub transition: Transition,
    /// State after the tick.
    pub snapshot: StatusSnapshot,
}

struct Core {
    state: SimulationState,
    sampler: UsageSampler,
}

/// The simulated water meter.
pub struct Meter {
    core: Mutex<Core>,
    detector: Box<dyn AnomalyDetector>,
    policy: ShutoffPolicy,
    config: MeterConfig,
}

impl std::fmt::Debug for Meter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Meter")
            .field("detector", &self.detector)
            .field("policy", &self.policy)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Meter`].
pub struct MeterBuilder {
    config: MeterConfig,
    sampler: Option<UsageSampler>,
    predictor: Option<Arc<dyn Predictor>>,
}

impl MeterBuilder {
    /// Seed the usage sampler for reproducible runs.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.sampler = Some(UsageSampler::seeded(&self.config, seed));
        self
    }

    /// Use a caller-provided random source.
    #[must_use]
    pub fn rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.sampler = Some(UsageSampler::with_rng(&self.config, rng));
        self
    }

    /// Predictor used by the model detector.
    #[must_use]
    pub fn predictor(mut self, predictor: Arc<dyn Predictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// Validate the configuration and build the meter.
    pub fn build(self) -> MeterResult<Meter> {
        self.config.validate()?;
        let sampler = self.sampler.unwrap_or_else(|| UsageSampler::new(&self.config));
        let detector = build_detector(&self.config.detector, self.predictor);
        tracing::debug!(
            detector = detector.name(),
            window = self.config.window_size,
            trigger = self.config.trigger_threshold,
            countdown = self.config.countdown_length,
            "meter built"
        );
        Ok(Meter {
            core: Mutex::new(Core {
                state: SimulationState::new(self.config.window_size),
                sampler,
            }),
            detector,
            policy: ShutoffPolicy::from(&self.config),
            config: self.config,
        })
    }
}

impl Meter {
    /// Meter with an entropy-seeded sampler.
    pub fn new(config: MeterConfig) -> MeterResult<Self> {
        Self::builder(config).build()
    }

    /// Start a builder for a seeded or custom-predictor meter.
    #[must_use]
    pub fn builder(config: MeterConfig) -> MeterBuilder {
        MeterBuilder {
            config,
            sampler: None,
            predictor: None,
        }
    }

    /// Configuration the meter was built with.
    #[must_use]
    pub const fn config(&self) -> &MeterConfig {
        &self.config
    }

    /// Counter and countdown thresholds in use.
    #[must_use]
    pub const fn policy(&self) -> ShutoffPolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        // State stays consistent across a panic: every transition writes
        // complete values before returning.
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one tick: a grace-period check-in if a countdown is open,
    /// otherwise sample, record, detect and count.
    pub fn tick(&self) -> TickOutcome {
        let mut guard = self.lock();
        let core = &mut *guard;
        if core.state.phase == Phase::GracePeriod {
            return self.check_in_locked(&mut core.state);
        }
        let reading = core.sampler.sample(core.state.leak_mode, core.state.water_shutoff);
        self.observe_locked(&mut core.state, reading)
    }

    /// Run one tick with an externally supplied reading instead of a sample.
    ///
    /// A shut-off meter records `0.0` whatever the value. While a grace
    /// period is open the value is discarded and the tick is a check-in.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidReading`] for a negative or
    /// non-finite value; the state is left untouched.
    pub fn observe(&self, value: f64) -> MeterResult<TickOutcome> {
        if !value.is_finite() || value < 0.0 {
            tracing::warn!(value, "rejected invalid usage reading");
            return Err(ValidationError::InvalidReading { value }.into());
        }
        let mut guard = self.lock();
        let state = &mut guard.state;
        if state.phase == Phase::GracePeriod {
            return Ok(self.check_in_locked(state));
        }
        let reading = if state.water_shutoff {
            Reading::zero()
        } else {
            Reading::now(value)
        };
        Ok(self.observe_locked(state, reading))
    }

    fn observe_locked(&self, state: &mut SimulationState, reading: Reading) -> TickOutcome {
        state.reading_history.push(reading.value);
        let verdict = self.detector.evaluate(&state.reading_history);
        let transition = self.policy.on_verdict(state, verdict.anomalous, reading.timestamp);

        tracing::debug!(
            usage = reading.value,
            anomalous = verdict.anomalous,
            predicted = verdict.predicted,
            leak_mode = state.leak_mode,
            water_shutoff = state.water_shutoff,
            "reading"
        );
        log_transition(transition, state);

        TickOutcome {
            reading: Some(reading),
            verdict: Some(verdict),
            transition,
            snapshot: state.snapshot(),
        }
    }

    fn check_in_locked(&self, state: &mut SimulationState) -> TickOutcome {
        let transition = self.policy.check_in(state);
        log_transition(transition, state);
        TickOutcome {
            reading: None,
            verdict: None,
            transition,
            snapshot: state.snapshot(),
        }
    }

    /// Apply a command and return its response line.
    pub fn apply_command(&self, command: &Command) -> String {
        let mut guard = self.lock();
        let response = command.apply(&mut guard.state);
        if command.is_mutation() {
            tracing::info!(command = %command, phase = %guard.state.phase, "command applied");
        } else if let Command::Unknown(raw) = command {
            tracing::debug!(input = %raw, "unknown command");
        } else {
            tracing::debug!("status requested");
        }
        response
    }

    /// Parse one line of input and apply it.
    pub fn handle_line(&self, line: &str) -> String {
        self.apply_command(&Command::parse(line))
    }

    /// Apply a flag change pushed by the external state bridge.
    pub fn apply_bridge_event(&self, event: BridgeEvent) -> StatusSnapshot {
        let mut guard = self.lock();
        let state = &mut guard.state;
        match (event.flag, event.active) {
            (BridgeFlag::Leak, true) => shutoff::simulate_leak(state),
            (BridgeFlag::Leak, false) => shutoff::clear_leak_flag(state),
            (BridgeFlag::Shutoff, true) => shutoff::force_shutoff(state),
            (BridgeFlag::Shutoff, false) => shutoff::resume(state),
        }
        tracing::info!(flag = ?event.flag, active = event.active, phase = %state.phase, "bridge update applied");
        state.snapshot()
    }

    /// Current flags, counter and phase.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().state.snapshot()
    }

    /// Copy of the reading window, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<f64> {
        self.lock().state.reading_history.to_vec()
    }
}

fn log_transition(transition: Transition, state: &SimulationState) {
    match transition {
        Transition::Steady => {}
        Transition::AnomalyCounted { count } => tracing::info!(count, "anomalous usage"),
        Transition::Cleared => tracing::info!("usage back to normal"),
        Transition::GraceOpened { attempts } => {
            tracing::warn!(attempts, "leak detected, waiting for response before shutoff");
        }
        Transition::Waiting { attempts_remaining } => {
            tracing::info!(attempts_remaining, "leak still active, waiting");
        }
        Transition::Resolved => {
            tracing::info!(water_shutoff = state.water_shutoff, "leak resolved during grace period");
        }
        Transition::AutoShutoff => tracing::warn!("auto-shutoff: water stopped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meter() -> Meter {
        let mut cfg = MeterConfig::default();
        cfg.tick_interval_ms = 1;
        Meter::builder(cfg).seed(11).build().unwrap()
    }

    #[test]
    fn build_rejects_invalid_config() {
        let mut cfg = MeterConfig::default();
        cfg.window_size = 0;
        assert!(Meter::new(cfg).unwrap_err().is_validation());
    }

    #[test]
    fn normal_ticks_stay_normal() {
        let m = meter();
        for _ in 0..50 {
            let out = m.tick();
            assert_eq!(out.transition, Transition::Steady);
            assert_eq!(out.snapshot.phase, Phase::Normal);
        }
        assert_eq!(m.history().len(), 10);
    }

    #[test]
    fn leak_reaches_shutoff_within_bound() {
        let m = meter();
        m.handle_line("make a leak");
        let bound = m.config().max_response_ticks();
        let mut ticks = 0;
        while !m.snapshot().water_shutoff {
            m.tick();
            ticks += 1;
            assert!(ticks <= bound, "no shutoff after {ticks} ticks");
        }
        assert_eq!(ticks, bound);
        assert!(m.tick().reading.is_some_and(|r| r.value == 0.0));
    }

    #[test]
    fn observe_forces_zero_while_shut_off() {
        let m = meter();
        m.handle_line("stop water");
        let out = m.observe(4.2).unwrap();
        assert_eq!(out.reading.map(|r| r.value), Some(0.0));
        assert_eq!(m.history(), vec![0.0]);
    }

    #[test]
    fn observe_rejects_negative_and_non_finite_values() {
        let m = meter();
        m.handle_line("make a leak");
        for bad in [-3.0, f64::NAN, f64::INFINITY] {
            let err = m.observe(bad).unwrap_err();
            assert!(err.is_validation(), "{bad} accepted");
        }
        assert!(m.history().is_empty());
        assert_eq!(m.snapshot().consecutive_anomaly_count, 0);

        // Also rejected while shut off, where a valid value would read as zero.
        m.handle_line("stop water");
        assert!(m.observe(-0.5).is_err());
        assert!(m.history().is_empty());
    }

    #[test]
    fn custom_rng_drives_sampler() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let build = || {
            Meter::builder(MeterConfig::default())
                .rng(StdRng::seed_from_u64(99))
                .build()
                .unwrap()
        };
        let (a, b) = (build(), build());
        for _ in 0..10 {
            a.tick();
            b.tick();
        }
        assert_eq!(a.history(), b.history());
        let normal = a.config().normal_range;
        assert!(a.history().iter().all(|v| normal.contains(*v)));
    }

    #[test]
    fn policy_follows_config() {
        let mut cfg = MeterConfig::default();
        cfg.trigger_threshold = 3;
        cfg.countdown_length = 4;
        let m = Meter::new(cfg).unwrap();
        assert_eq!(m.policy().trigger_threshold, 3);
        assert_eq!(m.policy().countdown_length, 4);
    }

    #[test]
    fn bridge_events_map_to_state_changes() {
        let m = meter();
        let s = m.apply_bridge_event(BridgeEvent::new(BridgeFlag::Leak, true));
        assert!(s.leak_mode);
        let s = m.apply_bridge_event(BridgeEvent::new(BridgeFlag::Shutoff, true));
        assert!(s.water_shutoff);
        assert_eq!(s.phase, Phase::ShutOff);
        let s = m.apply_bridge_event(BridgeEvent::new(BridgeFlag::Shutoff, false));
        assert!(!s.water_shutoff);
        assert_eq!(s.phase, Phase::Normal);
        let s = m.apply_bridge_event(BridgeEvent::new(BridgeFlag::Leak, false));
        assert!(!s.leak_mode);
    }
}
