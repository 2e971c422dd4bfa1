//! Usage sampler.
//!
//! Produces one reading per tick from the current leak/shutoff flags. The
//! random source is injected so tests can seed it.

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::config::{MeterConfig, UsageRange};
use crate::reading::Reading;

/// Generates usage readings for the simulated meter.
pub struct UsageSampler {
    rng: Box<dyn RngCore + Send>,
    normal: UsageRange,
    leak: UsageRange,
    precision: u32,
}

impl std::fmt::Debug for UsageSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageSampler")
            .field("normal", &self.normal)
            .field("leak", &self.leak)
            .field("precision", &self.precision)
            .finish_non_exhaustive()
    }
}

impl UsageSampler {
    /// Sampler seeded from OS entropy.
    #[must_use]
    pub fn new(cfg: &MeterConfig) -> Self {
        Self::with_rng(cfg, StdRng::from_entropy())
    }

    /// Deterministic sampler for reproducible runs.
    #[must_use]
    pub fn seeded(cfg: &MeterConfig, seed: u64) -> Self {
        Self::with_rng(cfg, StdRng::seed_from_u64(seed))
    }

    /// Sampler using a caller-provided random source.
    #[must_use]
    pub fn with_rng(cfg: &MeterConfig, rng: impl RngCore + Send + 'static) -> Self {
        Self {
            rng: Box::new(rng),
            normal: cfg.normal_range,
            leak: cfg.leak_range(),
            precision: cfg.reading_precision,
        }
    }

    /// Produce the next reading for the given flags.
    ///
    /// Shutoff wins over leak mode: a shut-off meter always reads `0.0`.
    pub fn sample(&mut self, leak_mode: bool, water_shutoff: bool) -> Reading {
        if water_shutoff {
            return Reading::zero();
        }
        let range = if leak_mode { self.leak } else { self.normal };
        let raw = self.rng.gen_range(range.low..=range.high);
        Reading::now(round_to(raw, self.precision))
    }

    /// Lazy, infinite sequence of readings for fixed flags.
    pub fn readings(&mut self, leak_mode: bool, water_shutoff: bool) -> impl Iterator<Item = Reading> + '_ {
        std::iter::repeat_with(move || self.sample(leak_mode, water_shutoff))
    }
}

fn round_to(value: f64, precision: u32) -> f64 {
    let scale = 10f64.powi(i32::try_from(precision).unwrap_or(i32::MAX));
    (value * scale).round() / scale
}
