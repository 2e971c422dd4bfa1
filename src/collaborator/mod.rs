//! Ports to external collaborators.
//!
//! The meter writes usage records to a [`RecordStore`] on behalf of the user
//! reported by an [`IdentityProvider`]. Both are owned by other systems;
//! their failures are logged and never interrupt sampling.

/// Current-user lookup.
pub mod identity;
/// Record storage backends.
pub mod persistence;
/// Background record writer.
pub mod recorder;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CollaboratorError;
use crate::reading::Reading;
use crate::state::StatusSnapshot;

pub use identity::{FileIdentity, StaticIdentity};
pub use persistence::{JsonlRecordStore, MemoryRecordStore};
pub use recorder::{Recorder, RecorderHandle, RecorderStats};

/// Usage classification stored with each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    #[allow(missing_docs)]
    LeakDetected,
    #[allow(missing_docs)]
    Normal,
}

/// One persisted reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Unique record id.
    pub record_id: Uuid,
    /// User the reading is filed under.
    pub user_id: String,
    /// When the reading was taken.
    pub timestamp: DateTime<Utc>,
    /// Volume in litres.
    pub usage_liters: f64,
    /// `leak_detected` while leaking or shut off, else `normal`.
    pub status: UsageStatus,
    /// True while the supply is cut.
    pub auto_block: bool,
}

impl UsageRecord {
    /// Build a record from a reading and the state right after it.
    #[must_use]
    pub fn new(user_id: impl Into<String>, reading: &Reading, snapshot: &StatusSnapshot) -> Self {
        let status = if snapshot.leak_mode || snapshot.water_shutoff {
            UsageStatus::LeakDetected
        } else {
            UsageStatus::Normal
        };
        Self {
            record_id: Uuid::new_v4(),
            user_id: user_id.into(),
            timestamp: reading.timestamp,
            usage_liters: reading.value,
            status,
            auto_block: snapshot.water_shutoff,
        }
    }
}

/// Durable sink for usage records.
pub trait RecordStore: Send + Sync {
    /// Store one record.
    fn append(&self, record: &UsageRecord) -> Result<(), CollaboratorError>;
}

/// Source of the currently active user.
pub trait IdentityProvider: Send + Sync {
    /// The active user id, or `None` when nobody is logged in.
    fn current_user(&self) -> Result<Option<String>, CollaboratorError>;
}
