//! Per-task worker.
//!
//! Drives one [`JenkinsSourceTask`]: polls it, hands every record to the
//! sink and stages the record's offset once the sink accepted it.

use crate::task::JenkinsSourceTask;
use anyhow::Result;
use buildstream::offsets::OffsetWriter;
use buildstream::record::SourceRecord;
use buildstream::sink::RecordSink;
use buildstream::stop::StopSignal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Status information for one task.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TaskStatus {
    pub task_id: String,
    /// Number of jobs assigned to the task
    pub job_count: usize,
    /// Total number of completed poll cycles
    pub poll_count: u64,
    /// Records accepted by the sink
    pub records_emitted: u64,
    /// Completion time of the last poll cycle
    pub last_poll: Option<DateTime<Utc>>,
    /// Last delivery error (if any)
    pub last_error: Option<String>,
    /// Total number of records the sink did not accept
    pub error_count: u64,
}

/// Bounded retry for sink delivery.
#[derive(Clone, Copy, Debug)]
pub struct SendRetry {
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled for every further one
    pub initial_backoff: Duration,
}

impl Default for SendRetry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// Runs one task until its stop signal fires.
pub struct SourceWorker {
    task: JenkinsSourceTask,
    sink: Arc<dyn RecordSink>,
    offsets: Arc<OffsetWriter>,
    retry: SendRetry,
    stop: StopSignal,
    status: Arc<tokio::sync::Mutex<TaskStatus>>,
}

impl SourceWorker {
    /// Creates a worker for `task`.
    ///
    /// `stop` should observe the same handle as the task's own signal; it
    /// cuts delivery retries short on shutdown.
    pub fn new(
        task: JenkinsSourceTask,
        sink: Arc<dyn RecordSink>,
        offsets: Arc<OffsetWriter>,
        retry: SendRetry,
        stop: StopSignal,
    ) -> Self {
        let status = TaskStatus {
            task_id: task.task_id().to_string(),
            job_count: task.job_count(),
            ..TaskStatus::default()
        };
        Self {
            task,
            sink,
            offsets,
            retry,
            stop,
            status: Arc::new(tokio::sync::Mutex::new(status)),
        }
    }

    /// Returns a clone of the status tracker for external monitoring.
    pub fn status(&self) -> Arc<tokio::sync::Mutex<TaskStatus>> {
        Arc::clone(&self.status)
    }

    /// Starts the worker loop (non-blocking).
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Polls until the task is stopped.
    pub async fn run(mut self) {
        let task_id = self.task.task_id().to_string();
        info!(task_id = %task_id, jobs = self.task.job_count(), "Starting source worker");

        while let Some(records) = self.task.poll().await {
            let mut emitted = 0u64;
            let mut failed = 0u64;
            let mut last_error = None;

            for record in &records {
                match self.deliver(record).await {
                    Ok(()) => {
                        self.offsets
                            .stage(record.partition.clone(), record.offset.clone());
                        emitted += 1;
                    }
                    Err(e) => {
                        error!(
                            task_id = %task_id,
                            job = %record.partition.value,
                            build = record.offset.value,
                            error = %e,
                            "Failed to deliver record, offset not committed"
                        );
                        failed += 1;
                        last_error = Some(e.to_string());
                    }
                }
            }

            let mut status = self.status.lock().await;
            status.poll_count += 1;
            status.records_emitted += emitted;
            status.error_count += failed;
            status.last_poll = Some(Utc::now());
            if last_error.is_some() {
                status.last_error = last_error;
            }
        }

        info!(task_id = %task_id, "Source worker stopped");
    }

    /// Sends one record, retrying with exponential backoff.
    async fn deliver(&mut self, record: &SourceRecord) -> Result<()> {
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 1;

        loop {
            match self.sink.send(record).await {
                Ok(()) => {
                    debug!(
                        job = %record.partition.value,
                        build = record.offset.value,
                        record_id = %record.record_id,
                        "Record delivered"
                    );
                    return Ok(());
                }
                Err(e) if attempt >= self.retry.max_attempts => return Err(e),
                Err(e) => {
                    warn!(
                        job = %record.partition.value,
                        attempt = attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Record delivery failed, will retry"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.stop.stopped() => {
                    anyhow::bail!("Stopped while retrying delivery");
                }
            }
            backoff *= 2;
            attempt += 1;
        }
    }
}
