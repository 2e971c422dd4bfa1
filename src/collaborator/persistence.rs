use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::CollaboratorError;

use super::{RecordStore, UsageRecord};

/// Appends records as JSON lines to a file.
#[derive(Debug)]
pub struct JsonlRecordStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlRecordStore {
    /// Open (creating if needed) `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CollaboratorError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CollaboratorError::Persistence {
                message: format!("cannot open {}: {e}", path.display()),
            })?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// File the records are appended to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for JsonlRecordStore {
    fn append(&self, record: &UsageRecord) -> Result<(), CollaboratorError> {
        let line = serde_json::to_string(record).map_err(|e| CollaboratorError::Persistence {
            message: format!("failed to encode record: {e}"),
        })?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .map_err(|e| CollaboratorError::Persistence {
                message: format!("write to {} failed: {e}", self.path.display()),
            })
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<UsageRecord>>,
}

impl MemoryRecordStore {
    /// Copy of all stored records.
    #[must_use]
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl RecordStore for MemoryRecordStore {
    fn append(&self, record: &UsageRecord) -> Result<(), CollaboratorError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Reading;
    use crate::state::SimulationState;

    #[test]
    fn jsonl_store_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.jsonl");
        let snapshot = SimulationState::new(10).snapshot();

        let store = JsonlRecordStore::open(&path).unwrap();
        store.append(&UsageRecord::new("alice", &Reading::now(0.5), &snapshot)).unwrap();
        store.append(&UsageRecord::new("alice", &Reading::now(0.6), &snapshot)).unwrap();
        drop(store);

        let reopened = JsonlRecordStore::open(&path).unwrap();
        reopened.append(&UsageRecord::new("bob", &Reading::now(0.7), &snapshot)).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let records: Vec<UsageRecord> = raw.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].user_id, "bob");
        assert!((records[0].usage_liters - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn open_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = JsonlRecordStore::open(dir.path().join("missing").join("usage.jsonl")).unwrap_err();
        assert!(matches!(err, CollaboratorError::Persistence { .. }));
    }
}
