use crate::offsets::{SourceOffset, SourcePartition};
use serde::Serialize;

mod validation;

pub use validation::{is_valid_topic_name, validate_and_prepare, ValidationError, MAX_TOPIC_LEN};

/// SourceRecord is one output event handed to a sink.
///
/// It carries the partition/offset pair the record was produced from so the
/// offset can be committed once the sink has accepted the record.
#[derive(Clone, Debug, Serialize)]
pub struct SourceRecord {
    /// UUIDv7 identifier (time-ordered)
    /// Auto-generated by `validate_and_prepare` if empty
    #[serde(rename = "recordId")]
    pub record_id: String,

    /// Destination topic (e.g., "jenkins.connector.topic")
    /// Lowercase with optional dot separators
    pub topic: String,

    /// Upstream item this record was read from
    pub partition: SourcePartition,

    /// Position of this record within its partition
    pub offset: SourceOffset,

    /// Record key, the partition value
    pub key: String,

    /// Unix epoch milliseconds (production time)
    pub timestamp: i64,

    /// Raw upstream body, passed through uninterpreted
    pub payload: String,
}

impl SourceRecord {
    /// Validates the record and fills in a missing record id.
    pub fn validate_and_prepare(&mut self) -> Result<(), ValidationError> {
        validation::validate_and_prepare(self)
    }

    /// Identity of the upstream item/position pair, stable across retries.
    ///
    /// Format: `{partition value}-{offset value}`
    pub fn dedup_id(&self) -> String {
        format!("{}-{}", self.partition.value, self.offset.value)
    }
}
