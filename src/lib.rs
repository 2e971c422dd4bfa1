//! # AquaFlow - Simulated Water Meter with Leak Shutoff
//!
//! AquaFlow simulates a smart water meter. It samples usage at a fixed
//! interval, flags abnormal readings, and cuts the supply after a sustained
//! anomaly unless the leak is resolved during a short grace period. Remote
//! clients can simulate leaks and override the valve through a text command
//! channel while the sampling loop runs.
//!
//! ## Core Concepts
//!
//! - **Meter**: owns the shared simulation state behind one lock
//! - **Detector**: decides whether the latest reading is anomalous
//! - **Shutoff policy**: counts anomalies, runs the grace-period countdown
//! - **Command channel**: `make a leak`, `stop leak`, `stop water`, `start water`, `status`
//! - **Bridge**: out-of-process flag updates applied under the same lock
//!
//! ## Usage
//!
//! ```rust,ignore
//! use aquaflow::{Meter, MeterConfig};
//!
//! let meter = Meter::builder(MeterConfig::default()).seed(7).build()?;
//! meter.handle_line("make a leak");
//! for _ in 0..7 {
//!     meter.tick();
//! }
//! assert!(meter.snapshot().water_shutoff);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod client;
pub mod collaborator;
pub mod command;
pub mod config;
pub mod detector;
pub mod error;
pub mod meter;
pub mod reading;
pub mod sampler;
pub mod shutoff;
pub mod state;

/// TCP command channel (server mode).
#[cfg(feature = "transport-tcp")]
pub mod transport;

// Re-export primary types at crate root for convenience
pub use bridge::{BridgeEvent, BridgeFlag, BridgeSender, StateBridge};
pub use client::{send_command, CommandClient};
pub use collaborator::{IdentityProvider, RecordStore, Recorder, UsageRecord, UsageStatus};
pub use command::{Command, UNKNOWN_RESPONSE};
pub use config::{DetectorConfig, LeakProfile, MeterConfig, UsageRange};
pub use detector::{AnomalyDetector, Predictor, Verdict};
pub use error::{CollaboratorError, MeterError, MeterResult, TransportError, ValidationError};
pub use meter::{Meter, MeterBuilder, MeterRuntime, TickOutcome, TickSink};
pub use reading::{Reading, ReadingHistory};
pub use shutoff::{ShutoffPolicy, Transition};
pub use state::{Phase, SimulationState, StatusSnapshot};

#[cfg(feature = "transport-tcp")]
pub use transport::CommandServer;
