use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

/// JetStream connection and stream settings
#[derive(Clone, Debug, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    /// Records are published to `{subject_prefix}.{topic}`
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: i64,
    /// JetStream duplicate window (seconds) used for `Nats-Msg-Id` dedup
    #[serde(default = "default_duplicate_window_secs")]
    pub duplicate_window_secs: u64,
}

fn default_url() -> String {
    std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string())
}

fn default_stream_name() -> String {
    "BUILDSTREAM".to_string()
}

fn default_subject_prefix() -> String {
    "buildstream".to_string()
}

fn default_max_age_days() -> u64 {
    7
}

fn default_max_bytes() -> i64 {
    10 * 1024 * 1024 * 1024 // 10GB
}

fn default_duplicate_window_secs() -> u64 {
    24 * 60 * 60
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            stream_name: default_stream_name(),
            subject_prefix: default_subject_prefix(),
            max_age_days: default_max_age_days(),
            max_bytes: default_max_bytes(),
            duplicate_window_secs: default_duplicate_window_secs(),
        }
    }
}

impl NatsConfig {
    /// Subject a record for `topic` is published to.
    pub fn subject_for(&self, topic: &str) -> String {
        format!("{}.{}", self.subject_prefix, topic)
    }

    /// Subjects captured by the stream.
    pub fn stream_subjects(&self) -> Vec<String> {
        vec![format!("{}.>", self.subject_prefix)]
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days * 24 * 60 * 60)
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_secs(self.duplicate_window_secs)
    }
}

/// Connected NATS client plus the JetStream context records go through.
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsClient {
    /// Connects and makes sure the record stream exists.
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to NATS");

        let client = async_nats::connect(&config.url)
            .await
            .with_context(|| format!("Failed to connect to NATS at {}", config.url))?;
        let jetstream = jetstream::new(client.clone());

        ensure_stream(&jetstream, &config).await?;

        Ok(Self {
            client,
            jetstream,
            config,
        })
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }
}

/// Creates the record stream unless it already exists.
///
/// An existing stream keeps its settings. Its duplicate window bounds how
/// long the broker drops a redelivered build.
async fn ensure_stream(jetstream: &jetstream::Context, config: &NatsConfig) -> Result<()> {
    let mut stream = jetstream
        .get_or_create_stream(stream::Config {
            name: config.stream_name.clone(),
            subjects: config.stream_subjects(),
            max_age: config.max_age(),
            max_bytes: config.max_bytes,
            duplicate_window: config.duplicate_window(),
            storage: stream::StorageType::File,
            retention: stream::RetentionPolicy::Limits,
            ..Default::default()
        })
        .await
        .with_context(|| format!("Failed to ensure JetStream stream '{}'", config.stream_name))?;

    let info = stream
        .info()
        .await
        .context("Failed to read JetStream stream info")?;
    if info.config.duplicate_window != config.duplicate_window() {
        warn!(
            stream = %config.stream_name,
            configured_secs = config.duplicate_window_secs,
            actual_secs = info.config.duplicate_window.as_secs(),
            "Existing stream has a different duplicate window"
        );
    }

    info!(
        stream = %config.stream_name,
        subjects = ?info.config.subjects,
        messages = info.state.messages,
        "JetStream stream ready"
    );
    Ok(())
}
