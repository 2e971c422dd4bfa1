//! Usage readings and the bounded history window.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single timestamped usage value, in litres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// When the reading was taken.
    pub timestamp: DateTime<Utc>,
    /// Volume used during the tick.
    pub value: f64,
}

impl Reading {
    /// Creates a reading stamped with the current time.
    #[must_use]
    pub fn now(value: f64) -> Self {
        Self::at(Utc::now(), value)
    }

    /// Creates a reading with an explicit timestamp.
    #[must_use]
    pub fn at(timestamp: DateTime<Utc>, value: f64) -> Self {
        debug_assert!(value >= 0.0 && value.is_finite(), "usage must be a non-negative number");
        Self { timestamp, value }
    }

    /// A zero reading, produced while the supply is shut off.
    #[must_use]
    pub fn zero() -> Self {
        Self::now(0.0)
    }
}

/// Bounded FIFO window of recent usage values.
///
/// Pushing into a full window evicts the oldest value.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingHistory {
    values: VecDeque<f64>,
    capacity: usize,
}

impl ReadingHistory {
    /// Creates an empty window holding at most `capacity` values.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "window capacity must be positive");
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a value, evicting the oldest one when full.
    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Most recent value.
    #[must_use]
    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Number of values held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no value has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Maximum number of values held.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true once the window holds `capacity` values.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    /// Values from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    /// Copy of the window, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }
}
