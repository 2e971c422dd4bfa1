//! Sampling loop.
//!
//! A dedicated thread ticks the meter at the configured interval and hands
//! every outcome to the registered sinks. Sinks run on the sampling thread
//! and must not block; slow work belongs on their own workers. A panicking
//! sink is logged and counted, and sampling carries on.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender};

use crate::error::{panic_message, MeterError, MeterResult};

use super::{Meter, TickOutcome};

/// Receives every tick outcome.
pub trait TickSink: Send {
    /// Called after each tick, outside the meter lock.
    fn on_tick(&self, outcome: &TickOutcome);
}

impl<F> TickSink for F
where
    F: Fn(&TickOutcome) + Send,
{
    fn on_tick(&self, outcome: &TickOutcome) {
        self(outcome);
    }
}

/// Handle to the running sampling loop.
#[derive(Debug)]
pub struct MeterRuntime {
    shutdown_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
    ticks: Arc<AtomicU64>,
    sink_failures: Arc<AtomicU64>,
}

impl MeterRuntime {
    /// Start ticking `meter` every `tick_interval`.
    pub fn start(meter: Arc<Meter>, sinks: Vec<Box<dyn TickSink>>) -> MeterResult<Self> {
        let interval = meter.config().tick_interval();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let ticks = Arc::new(AtomicU64::new(0));
        let sink_failures = Arc::new(AtomicU64::new(0));

        let counters = Counters {
            ticks: Arc::clone(&ticks),
            sink_failures: Arc::clone(&sink_failures),
        };
        let join = thread::Builder::new()
            .name("aquaflow-sampler".to_string())
            .spawn(move || sampling_loop(&meter, &sinks, interval, &counters, &shutdown_rx))
            .map_err(|e| MeterError::internal(format!("failed to spawn sampler thread: {e}")))?;

        tracing::info!(interval_ms = interval.as_millis() as u64, "sampling loop started");
        Ok(Self {
            shutdown_tx,
            join: Some(join),
            ticks,
            sink_failures,
        })
    }

    /// Ticks completed so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Sink calls that panicked.
    #[must_use]
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }

    /// Stop the loop after the current tick and wait for the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(handle) = self.join.take() {
            if let Err(payload) = handle.join() {
                tracing::error!(panic = %panic_message(payload.as_ref()), "sampling thread panicked");
            }
        }
    }
}

impl Drop for MeterRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Counters {
    ticks: Arc<AtomicU64>,
    sink_failures: Arc<AtomicU64>,
}

fn sampling_loop(
    meter: &Meter,
    sinks: &[Box<dyn TickSink>],
    interval: Duration,
    counters: &Counters,
    shutdown_rx: &Receiver<()>,
) {
    loop {
        let outcome = meter.tick();
        counters.ticks.fetch_add(1, Ordering::Relaxed);
        for (index, sink) in sinks.iter().enumerate() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| sink.on_tick(&outcome))) {
                counters.sink_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(sink = index, panic = %panic_message(payload.as_ref()), "tick sink panicked");
            }
        }

        let stop = select! {
            recv(shutdown_rx) -> _ => true,
            default(interval) => false,
        };
        if stop {
            break;
        }
    }
    tracing::info!("sampling loop stopped");
}
