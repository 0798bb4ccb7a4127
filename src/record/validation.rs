use super::SourceRecord;
use std::fmt;
use uuid::Uuid;

/// Validation errors for SourceRecord
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingTopic,
    MissingKey,
    EmptyPayload,
    InvalidTopicFormat(String),
    InvalidTimestamp(i64),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingTopic => write!(f, "topic is required"),
            ValidationError::MissingKey => write!(f, "key is required"),
            ValidationError::EmptyPayload => write!(f, "payload must not be empty"),
            ValidationError::InvalidTopicFormat(s) => {
                write!(f, "invalid topic format '{}': must be dot-separated subject tokens", s)
            }
            ValidationError::InvalidTimestamp(ts) => {
                write!(f, "timestamp must be positive, got {}", ts)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validates and prepares a SourceRecord for a sink.
///
/// Validation rules:
/// - Required fields: topic, key, payload
/// - Topic format: see [`is_valid_topic_name`] (e.g., "jenkins.builds")
/// - Timestamp: must be positive (Unix epoch milliseconds)
/// - RecordId: auto-generated UUIDv7 if empty
pub fn validate_and_prepare(record: &mut SourceRecord) -> Result<(), ValidationError> {
    if record.topic.is_empty() {
        return Err(ValidationError::MissingTopic);
    }
    if record.key.is_empty() {
        return Err(ValidationError::MissingKey);
    }
    if record.payload.is_empty() {
        return Err(ValidationError::EmptyPayload);
    }

    if !is_valid_topic_name(&record.topic) {
        return Err(ValidationError::InvalidTopicFormat(record.topic.clone()));
    }

    if record.timestamp <= 0 {
        return Err(ValidationError::InvalidTimestamp(record.timestamp));
    }

    if record.record_id.is_empty() {
        record.record_id = Uuid::now_v7().to_string();
    }

    Ok(())
}

/// Longest accepted topic name
pub const MAX_TOPIC_LEN: usize = 249;

/// Validates a topic name.
///
/// A topic is appended to the sink's subject prefix (`<prefix>.<topic>`), so
/// every dot-separated token must be a usable NATS subject token: non-empty,
/// ASCII letters, digits, `_` or `-`. Wildcards (`*`, `>`) and whitespace
/// are rejected.
pub fn is_valid_topic_name(topic: &str) -> bool {
    if topic.is_empty() || topic.len() > MAX_TOPIC_LEN {
        return false;
    }

    topic.split('.').all(|token| {
        !token.is_empty()
            && token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    })
}
