//! Source partitions, source offsets and the stores that track them.
//!
//! A connector identifies every upstream item it reads from with a
//! [`SourcePartition`] and records how far it has read with a
//! [`SourceOffset`]. Both are single-entry mappings whose key is fixed per
//! connector (for Jenkins: `{"jobName": ..}` and `{"buildNumber": ..}`).
//!
//! # Architecture
//!
//! ```text
//!   poll task ──get_offset / cache──► ReadYourWritesOffsets (per task)
//!                                         │ one bulk read at start
//!                                         ▼
//!   sink ack ──stage──► OffsetWriter ──flush──► SqliteOffsetStore
//! ```
//!
//! The durable store only ever returns flushed values. Offsets the current
//! process produced but has not flushed yet are visible to the producing
//! task through its [`ReadYourWritesOffsets`] cache.

use anyhow::Result;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;
use std::fmt;

mod read_your_writes;
mod storage;
mod writer;

pub use read_your_writes::ReadYourWritesOffsets;
pub use storage::SqliteOffsetStore;
pub use writer::OffsetWriter;

/// Identity of one upstream item, e.g. `{"jobName": "Accumulo-Master"}`.
///
/// Two partitions are equal iff both key and value are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourcePartition {
    pub key: String,
    pub value: String,
}

impl SourcePartition {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for SourcePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}={}}}", self.key, self.value)
    }
}

impl Serialize for SourcePartition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.key, &self.value)?;
        map.end()
    }
}

/// Last position read for a partition, e.g. `{"buildNumber": 42}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceOffset {
    pub key: String,
    pub value: i64,
}

impl SourceOffset {
    pub fn new(key: impl Into<String>, value: i64) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

impl fmt::Display for SourceOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}={}}}", self.key, self.value)
    }
}

impl Serialize for SourceOffset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.key, &self.value)?;
        map.end()
    }
}

/// Builds partitions that all share one fixed key.
///
/// Each task owns its own factory; nothing is cached across tasks.
#[derive(Clone, Debug)]
pub struct Partitions {
    key: String,
}

impl Partitions {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the partition for `value` under this factory's key.
    pub fn of(&self, value: impl Into<String>) -> SourcePartition {
        SourcePartition::new(self.key.clone(), value)
    }
}

/// Read path into a durable offset store.
///
/// Implementations return only values that have been flushed; partitions
/// without a flushed offset are simply missing from the result.
pub trait OffsetReader: Send + Sync {
    fn offsets(&self, partitions: &[SourcePartition])
        -> Result<HashMap<SourcePartition, SourceOffset>>;
}
