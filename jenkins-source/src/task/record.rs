use buildstream::offsets::{SourceOffset, SourcePartition};
use buildstream::record::{SourceRecord, ValidationError};
use chrono::Utc;

/// Offset key under which build numbers are recorded
pub const BUILD_NUMBER: &str = "buildNumber";

/// Assembles the record for one detected build.
///
/// The record key is the job identity and the payload is the build detail
/// body, unmodified.
pub fn build_record(
    topic: &str,
    partition: &SourcePartition,
    build_number: i64,
    detail: String,
) -> Result<SourceRecord, ValidationError> {
    let mut record = SourceRecord {
        record_id: uuid::Uuid::now_v7().to_string(),
        topic: topic.to_string(),
        partition: partition.clone(),
        offset: SourceOffset::new(BUILD_NUMBER, build_number),
        key: partition.value.clone(),
        timestamp: Utc::now().timestamp_millis(),
        payload: detail,
    };
    record.validate_and_prepare()?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_record() {
        let partition = SourcePartition::new("jobName", "demo");
        let detail = r#"{"number":42,"result":"SUCCESS"}"#.to_string();

        let record = build_record("jenkins.connector.topic", &partition, 42, detail.clone()).unwrap();

        assert_eq!(record.topic, "jenkins.connector.topic");
        assert_eq!(record.partition, partition);
        assert_eq!(record.offset, SourceOffset::new("buildNumber", 42));
        assert_eq!(record.key, "demo");
        assert_eq!(record.payload, detail);
        assert!(uuid::Uuid::parse_str(&record.record_id).is_ok());
        assert!(record.timestamp > 0);
    }

    #[test]
    fn test_empty_detail_is_rejected() {
        let partition = SourcePartition::new("jobName", "demo");
        assert_eq!(
            build_record("jenkins.connector.topic", &partition, 1, String::new()).unwrap_err(),
            ValidationError::EmptyPayload
        );
    }
}
