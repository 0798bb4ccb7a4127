use super::NatsConfig;
use crate::record::SourceRecord;
use crate::sink::RecordSink;
use anyhow::{Context, Result};
use async_nats::jetstream;
use async_nats::HeaderMap;
use async_trait::async_trait;
use tracing::debug;

/// Record publisher for NATS JetStream
#[derive(Clone)]
pub struct RecordPublisher {
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl RecordPublisher {
    /// Create a new record publisher
    pub fn new(jetstream: jetstream::Context, config: NatsConfig) -> Self {
        Self { jetstream, config }
    }

    /// Publish a single record to NATS
    ///
    /// Subject format: {subject_prefix}.{topic}
    /// Payload: JSON-serialized SourceRecord
    /// Header `Nats-Msg-Id`: {partition value}-{offset value}, so JetStream
    /// drops a redelivered build within the duplicate window
    pub async fn publish(&self, record: &SourceRecord) -> Result<()> {
        let subject = self.config.subject_for(&record.topic);
        let payload =
            serde_json::to_vec(record).context("Failed to serialize record to JSON")?;

        let mut headers = HeaderMap::new();
        headers.insert("Nats-Msg-Id", record.dedup_id().as_str());

        debug!(
            record_id = %record.record_id,
            partition = %record.partition,
            offset = %record.offset,
            subject = %subject,
            "Publishing record to NATS"
        );

        self.jetstream
            .publish_with_headers(subject.clone(), headers, payload.into())
            .await
            .context(format!("Failed to publish record to subject '{}'", subject))?
            .await
            .context("Failed to await publish ack")?;

        Ok(())
    }
}

#[async_trait]
impl RecordSink for RecordPublisher {
    async fn send(&self, record: &SourceRecord) -> Result<()> {
        self.publish(record).await
    }
}
