//! External state bridge.
//!
//! An out-of-process feed (a document listener, a dashboard, a script) can
//! flip the leak and shutoff flags at any time. Events are pushed into a
//! bounded queue without blocking the producer and applied on a dedicated
//! worker thread under the meter lock.

use std::io::BufRead;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::error::{panic_message, CollaboratorError, MeterError, MeterResult};
use crate::meter::Meter;

/// Flag a bridge event targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeFlag {
    /// Leak simulation.
    #[serde(alias = "stop_leak")]
    Leak,
    /// Supply shutoff.
    #[serde(alias = "stop_water")]
    Shutoff,
}

/// A pushed flag change: `{"flag": "leak" | "shutoff", "active": bool}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeEvent {
    /// Target flag.
    pub flag: BridgeFlag,
    /// New value.
    #[serde(default)]
    pub active: bool,
}

impl BridgeEvent {
    /// Event setting `flag` to `active`.
    #[must_use]
    pub const fn new(flag: BridgeFlag, active: bool) -> Self {
        Self { flag, active }
    }

    /// Parse one JSON-encoded event.
    pub fn from_json(line: &str) -> Result<Self, CollaboratorError> {
        serde_json::from_str(line.trim()).map_err(|e| CollaboratorError::Bridge {
            message: format!("invalid bridge event: {e}"),
        })
    }
}

#[derive(Debug, Default)]
struct BridgeStats {
    applied: AtomicU64,
    dropped: AtomicU64,
}

/// Producer side of the bridge queue.
#[derive(Debug, Clone)]
pub struct BridgeSender {
    tx: Sender<BridgeEvent>,
    stats: Arc<BridgeStats>,
}

impl BridgeSender {
    /// Non-blocking enqueue. Returns false if the event was dropped.
    pub fn push(&self, event: BridgeEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(flag = ?event.flag, active = event.active, "bridge event dropped");
                false
            }
        }
    }
}

/// Worker applying bridge events to a meter.
#[derive(Debug)]
pub struct StateBridge {
    sender: BridgeSender,
    shutdown_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl StateBridge {
    /// Default queue capacity.
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Start the worker thread.
    pub fn start(meter: Arc<Meter>, capacity: usize) -> MeterResult<Self> {
        let (tx, rx) = bounded::<BridgeEvent>(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let stats = Arc::new(BridgeStats::default());

        let thread_stats = Arc::clone(&stats);
        let join = thread::Builder::new()
            .name("aquaflow-bridge".to_string())
            .spawn(move || worker_loop(&meter, &thread_stats, &rx, &shutdown_rx))
            .map_err(|e| MeterError::internal(format!("failed to spawn bridge worker: {e}")))?;

        Ok(Self {
            sender: BridgeSender { tx, stats },
            shutdown_tx,
            join: Some(join),
        })
    }

    /// A producer handle; clone freely.
    #[must_use]
    pub fn sender(&self) -> BridgeSender {
        self.sender.clone()
    }

    /// Events applied to the meter.
    #[must_use]
    pub fn applied(&self) -> u64 {
        self.sender.stats.applied.load(Ordering::Relaxed)
    }

    /// Events dropped on a full queue.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.sender.stats.dropped.load(Ordering::Relaxed)
    }

    /// Apply queued events, then stop the worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(handle) = self.join.take() {
            if let Err(payload) = handle.join() {
                tracing::error!(panic = %panic_message(payload.as_ref()), "bridge worker panicked");
            }
        }
    }
}

impl Drop for StateBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(meter: &Meter, stats: &BridgeStats, rx: &Receiver<BridgeEvent>, shutdown_rx: &Receiver<()>) {
    let apply = |event: BridgeEvent| {
        meter.apply_bridge_event(event);
        stats.applied.fetch_add(1, Ordering::Relaxed);
    };

    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(event) => apply(event),
                Err(_) => return,
            },
            recv(shutdown_rx) -> _ => {
                while let Ok(event) = rx.try_recv() {
                    apply(event);
                }
                return;
            }
        }
    }
}

/// Read JSON-line events from `reader` and push them until EOF.
///
/// Malformed lines are logged and skipped. Returns the number of events
/// accepted by the queue.
pub fn pump_json_lines(reader: impl BufRead, sender: &BridgeSender) -> u64 {
    let mut accepted = 0;
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "bridge feed read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match BridgeEvent::from_json(&line) {
            Ok(event) => {
                if sender.push(event) {
                    accepted += 1;
                }
            }
            Err(e) => tracing::warn!(error = %e, "skipping bridge line"),
        }
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeterConfig;

    #[test]
    fn parse_event_and_document_aliases() {
        assert_eq!(
            BridgeEvent::from_json(r#"{"flag": "leak", "active": true}"#).unwrap(),
            BridgeEvent::new(BridgeFlag::Leak, true)
        );
        assert_eq!(
            BridgeEvent::from_json(r#"{"flag": "stop_water", "active": true}"#).unwrap(),
            BridgeEvent::new(BridgeFlag::Shutoff, true)
        );
        assert_eq!(
            BridgeEvent::from_json(r#"{"flag": "stop_leak"}"#).unwrap(),
            BridgeEvent::new(BridgeFlag::Leak, false)
        );
        assert!(BridgeEvent::from_json(r#"{"flag": "valve"}"#).is_err());
    }

    #[test]
    fn worker_applies_pumped_events() {
        let meter = Arc::new(Meter::builder(MeterConfig::default()).seed(5).build().unwrap());
        let bridge = StateBridge::start(Arc::clone(&meter), 16).unwrap();

        let feed = "{\"flag\":\"leak\",\"active\":true}\nnot json\n\n{\"flag\":\"shutoff\",\"active\":true}\n";
        let accepted = pump_json_lines(feed.as_bytes(), &bridge.sender());
        assert_eq!(accepted, 2);

        bridge.shutdown();
        let s = meter.snapshot();
        assert!(s.leak_mode);
        assert!(s.water_shutoff);
    }
}
