//! Background record writer.
//!
//! The sampling thread hands each reading to the recorder with a
//! non-blocking `try_send`. The worker looks up the active user and writes
//! the record; a full queue, a missing user, or a failing collaborator only
//! bumps a counter and logs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};

use crate::error::{panic_message, MeterError, MeterResult};
use crate::meter::{TickOutcome, TickSink};
use crate::reading::Reading;
use crate::state::StatusSnapshot;

use super::{IdentityProvider, RecordStore, UsageRecord};

#[derive(Debug, Clone, Copy)]
struct Pending {
    reading: Reading,
    snapshot: StatusSnapshot,
}

/// Recorder counters.
#[derive(Debug, Default)]
pub struct RecorderStats {
    /// Records appended to the store.
    pub written: AtomicU64,
    /// Readings skipped because nobody was logged in.
    pub skipped_no_user: AtomicU64,
    /// Identity or store failures, panics included.
    pub failed: AtomicU64,
    /// Readings lost to a full queue.
    pub dropped: AtomicU64,
}

/// Producer handle; also a [`TickSink`] for the sampling loop.
#[derive(Debug, Clone)]
pub struct RecorderHandle {
    tx: Sender<Pending>,
    stats: Arc<RecorderStats>,
}

impl RecorderHandle {
    /// Queue a reading for persistence. Never blocks.
    pub fn submit(&self, reading: Reading, snapshot: StatusSnapshot) {
        match self.tx.try_send(Pending { reading, snapshot }) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(usage = reading.value, "record queue unavailable, reading not persisted");
            }
        }
    }
}

impl TickSink for RecorderHandle {
    fn on_tick(&self, outcome: &TickOutcome) {
        if let Some(reading) = outcome.reading {
            self.submit(reading, outcome.snapshot);
        }
    }
}

/// Owns the record writer thread.
#[derive(Debug)]
pub struct Recorder {
    handle: RecorderHandle,
    shutdown_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl Recorder {
    /// Default queue capacity.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Start the writer thread.
    pub fn start(
        store: Arc<dyn RecordStore>,
        identity: Arc<dyn IdentityProvider>,
        capacity: usize,
    ) -> MeterResult<Self> {
        let (tx, rx) = bounded::<Pending>(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let stats = Arc::new(RecorderStats::default());

        let thread_stats = Arc::clone(&stats);
        let join = thread::Builder::new()
            .name("aquaflow-recorder".to_string())
            .spawn(move || worker_loop(store.as_ref(), identity.as_ref(), &thread_stats, &rx, &shutdown_rx))
            .map_err(|e| MeterError::internal(format!("failed to spawn recorder worker: {e}")))?;

        Ok(Self {
            handle: RecorderHandle { tx, stats },
            shutdown_tx,
            join: Some(join),
        })
    }

    /// A producer handle; clone freely.
    #[must_use]
    pub fn handle(&self) -> RecorderHandle {
        self.handle.clone()
    }

    /// Live counters.
    #[must_use]
    pub fn stats(&self) -> &RecorderStats {
        &self.handle.stats
    }

    /// Write queued records, then stop the worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(handle) = self.join.take() {
            if let Err(payload) = handle.join() {
                tracing::error!(panic = %panic_message(payload.as_ref()), "recorder worker panicked");
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    store: &dyn RecordStore,
    identity: &dyn IdentityProvider,
    stats: &RecorderStats,
    rx: &Receiver<Pending>,
    shutdown_rx: &Receiver<()>,
) {
    let write = |pending: Pending| {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| persist(store, identity, stats, pending))) {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(panic = %panic_message(payload.as_ref()), "record collaborator panicked");
        }
    };

    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(pending) => write(pending),
                Err(_) => return,
            },
            recv(shutdown_rx) -> _ => {
                while let Ok(pending) = rx.try_recv() {
                    write(pending);
                }
                return;
            }
        }
    }
}

fn persist(store: &dyn RecordStore, identity: &dyn IdentityProvider, stats: &RecorderStats, pending: Pending) {
    let user = match identity.current_user() {
        Ok(Some(user)) => user,
        Ok(None) => {
            stats.skipped_no_user.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("no active user, skipping record");
            return;
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "identity lookup failed");
            return;
        }
    };

    let record = UsageRecord::new(user, &pending.reading, &pending.snapshot);
    match store.append(&record) {
        Ok(()) => {
            stats.written.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(user_id = %record.user_id, usage = record.usage_liters, "record saved");
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "record write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::{MemoryRecordStore, StaticIdentity};
    use crate::error::CollaboratorError;
    use crate::state::SimulationState;

    struct FailingStore;

    struct PanickingStore;

    impl RecordStore for PanickingStore {
        fn append(&self, _: &UsageRecord) -> Result<(), CollaboratorError> {
            panic!("store exploded");
        }
    }

    impl RecordStore for FailingStore {
        fn append(&self, _: &UsageRecord) -> Result<(), CollaboratorError> {
            Err(CollaboratorError::Unavailable { name: "db".to_string() })
        }
    }

    #[test]
    fn records_written_for_active_user() {
        let store = Arc::new(MemoryRecordStore::default());
        let rec = Recorder::start(store.clone(), Arc::new(StaticIdentity::new(Some("u1".into()))), 8).unwrap();
        let snap = SimulationState::new(10).snapshot();
        rec.handle().submit(Reading::now(0.5), snap);
        rec.handle().submit(Reading::now(0.6), snap);

        rec.shutdown();

        let written = store.records();
        assert_eq!(written.len(), 2);
        assert!(written.iter().all(|r| r.user_id == "u1"));
    }

    #[test]
    fn missing_user_and_failures_are_counted() {
        let snap = SimulationState::new(10).snapshot();

        let store = Arc::new(MemoryRecordStore::default());
        let rec = Recorder::start(store, Arc::new(StaticIdentity::new(None)), 8).unwrap();
        rec.handle().submit(Reading::now(0.5), snap);
        let stats = Arc::clone(&rec.handle.stats);
        rec.shutdown();
        assert_eq!(stats.skipped_no_user.load(Ordering::Relaxed), 1);

        let rec = Recorder::start(Arc::new(FailingStore), Arc::new(StaticIdentity::new(Some("u".into()))), 8).unwrap();
        rec.handle().submit(Reading::now(0.5), snap);
        let stats = Arc::clone(&rec.handle.stats);
        rec.shutdown();
        assert_eq!(stats.failed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.written.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn panicking_store_keeps_worker_alive() {
        let snap = SimulationState::new(10).snapshot();
        let identity = Arc::new(StaticIdentity::new(Some("u".into())));
        let rec = Recorder::start(Arc::new(PanickingStore), identity, 8).unwrap();
        rec.handle().submit(Reading::now(0.5), snap);
        rec.handle().submit(Reading::now(0.6), snap);
        let stats = Arc::clone(&rec.handle.stats);
        rec.shutdown();
        assert_eq!(stats.failed.load(Ordering::Relaxed), 2);
    }
}
