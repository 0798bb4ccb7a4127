//! Record sinks - where produced records go.

use crate::record::SourceRecord;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

/// Destination for source records.
///
/// `send` returns once the sink has accepted the record; only then may the
/// record's offset be committed.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn send(&self, record: &SourceRecord) -> Result<()>;
}

/// Sink that keeps every record in memory.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<SourceRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all records received so far.
    pub fn records(&self) -> Vec<SourceRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn send(&self, record: &SourceRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
