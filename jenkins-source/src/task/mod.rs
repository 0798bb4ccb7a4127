//! Poll task: one per work assignment.
//!
//! Each cycle walks the assigned jobs in order:
//! 1. fetch the job resource and decode it
//! 2. compare its last build with the last known offset ([`detect`])
//! 3. fetch the build detail of a new build
//! 4. build the record and cache its offset
//!
//! Any failure before step 4 leaves the offset untouched, so the same build
//! is tried again on the next cycle.

mod detector;
mod record;

pub use detector::{detect, Change};
pub use record::{build_record, BUILD_NUMBER};

use crate::config::{
    DetailFailurePolicy, TaskProps, DETAIL_FAILURE_POLICY, POLL_INTERVAL_MS, TOPIC,
};
use crate::jenkins::{job_identity, BuildRef, JenkinsGateway, JobBuilds};
use crate::partitioner::WorkAssignment;
use anyhow::{anyhow, Context, Result};
use buildstream::offsets::{
    OffsetReader, Partitions, ReadYourWritesOffsets, SourceOffset, SourcePartition,
};
use buildstream::record::SourceRecord;
use buildstream::stop::StopSignal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Partition key under which jobs are tracked
pub const JOB_NAME: &str = "jobName";

/// Typed view of the task configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSettings {
    pub topic: String,
    pub poll_interval: Duration,
    pub detail_failure_policy: DetailFailurePolicy,
    pub assignment: WorkAssignment,
}

impl TaskSettings {
    pub fn from_props(props: &TaskProps) -> Result<Self> {
        let topic = props
            .get(TOPIC)
            .cloned()
            .ok_or_else(|| anyhow!("Task configuration has no '{}'", TOPIC))?;

        let poll_interval_ms: u64 = props
            .get(POLL_INTERVAL_MS)
            .ok_or_else(|| anyhow!("Task configuration has no '{}'", POLL_INTERVAL_MS))?
            .parse()
            .with_context(|| format!("Invalid '{}'", POLL_INTERVAL_MS))?;

        let detail_failure_policy = match props.get(DETAIL_FAILURE_POLICY) {
            Some(policy) => policy.parse()?,
            None => DetailFailurePolicy::default(),
        };

        let assignment = WorkAssignment::from_task_props(props)?;

        Ok(Self {
            topic,
            poll_interval: Duration::from_millis(poll_interval_ms),
            detail_failure_policy,
            assignment,
        })
    }
}

/// Consecutive failed detail fetches for one build
#[derive(Debug, Clone, Copy)]
struct DetailFailures {
    build_number: i64,
    attempts: u32,
}

/// Polls the jobs of one work assignment.
///
/// # Lifecycle
/// 1. [`start`](Self::start) decodes the assignment and loads the offsets
///    of every assigned job with one bulk read
/// 2. the owner calls [`poll`](Self::poll) in a loop; each call waits until
///    the next cycle is due and returns that cycle's records
/// 3. once the stop signal fires, `poll` returns `None`
///
/// Offsets are cached in the task as soon as a record is built. Committing
/// them durably is up to the owner, after the sink has accepted the record.
pub struct JenkinsSourceTask {
    task_id: String,
    settings: TaskSettings,
    /// (job locator, partition) in assignment order
    jobs: Vec<(String, SourcePartition)>,
    gateway: Arc<dyn JenkinsGateway>,
    offsets: ReadYourWritesOffsets,
    stop: StopSignal,
    /// Completion time of the last cycle; `None` until the first cycle ran
    last_cycle: Option<Instant>,
    detail_failures: HashMap<SourcePartition, DetailFailures>,
    cycles: u64,
}

impl JenkinsSourceTask {
    /// Starts a task from its configuration.
    ///
    /// # Arguments
    /// * `task_id` - Identifier used in logs and status
    /// * `props` - Task configuration produced by the connector
    /// * `gateway` - Jenkins access, shared between tasks
    /// * `reader` - Read path into the durable offset store
    /// * `stop` - Signal ending the task
    pub fn start(
        task_id: impl Into<String>,
        props: &TaskProps,
        gateway: Arc<dyn JenkinsGateway>,
        reader: &dyn OffsetReader,
        stop: StopSignal,
    ) -> Result<Self> {
        let task_id = task_id.into();
        let settings = TaskSettings::from_props(props).context("Invalid task configuration")?;

        let partitions = Partitions::new(JOB_NAME);
        let jobs: Vec<(String, SourcePartition)> = settings
            .assignment
            .locators()
            .iter()
            .map(|locator| (locator.clone(), partitions.of(job_identity(locator))))
            .collect();

        let assigned: Vec<SourcePartition> = jobs.iter().map(|(_, p)| p.clone()).collect();
        let offsets = ReadYourWritesOffsets::load(reader, &assigned)?;

        info!(
            task_id = %task_id,
            jobs = jobs.len(),
            interval_ms = settings.poll_interval.as_millis() as u64,
            policy = %settings.detail_failure_policy,
            "Jenkins source task started"
        );

        Ok(Self {
            task_id,
            settings,
            jobs,
            gateway,
            offsets,
            stop,
            last_cycle: None,
            detail_failures: HashMap::new(),
            cycles: 0,
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn partitions(&self) -> impl Iterator<Item = &SourcePartition> {
        self.jobs.iter().map(|(_, p)| p)
    }

    /// Last known offset of a job, including offsets cached by this task.
    pub fn offset(&self, partition: &SourcePartition) -> Option<&SourceOffset> {
        self.offsets.get_offset(partition)
    }

    /// Number of cycles completed so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Waits until the next cycle is due, then runs it.
    ///
    /// The first call runs a cycle immediately. Returns `None` once the stop
    /// signal has fired; a stop during the wait ends it early.
    pub async fn poll(&mut self) -> Option<Vec<SourceRecord>> {
        loop {
            if self.stop.is_stopped() {
                debug!(task_id = %self.task_id, "Stop requested, ending poll");
                return None;
            }

            if let Some(last_cycle) = self.last_cycle {
                // An interval past the clock's range means no further cycle
                let Some(due) = last_cycle.checked_add(self.settings.poll_interval) else {
                    debug!(task_id = %self.task_id, "Next cycle never due, waiting for stop");
                    self.stop.stopped().await;
                    continue;
                };
                let now = Instant::now();
                if due > now {
                    let wait = due - now;
                    debug!(
                        task_id = %self.task_id,
                        wait_ms = wait.as_millis() as u64,
                        "Waiting before next cycle"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep_until(due) => {}
                        _ = self.stop.stopped() => {}
                    }
                    continue;
                }
            }

            return Some(self.poll_cycle().await);
        }
    }

    /// Runs one cycle over every assigned job.
    ///
    /// Per-job failures are logged and skipped. A stop request is checked
    /// before each job; the records collected until then are returned.
    pub async fn poll_cycle(&mut self) -> Vec<SourceRecord> {
        let mut records = Vec::new();

        for i in 0..self.jobs.len() {
            if self.stop.is_stopped() {
                debug!(task_id = %self.task_id, "Stop requested, cutting cycle short");
                break;
            }

            let (locator, partition) = self.jobs[i].clone();
            if let Some(record) = self.poll_job(&locator, &partition).await {
                records.push(record);
            }
        }

        self.last_cycle = Some(Instant::now());
        self.cycles += 1;

        info!(
            task_id = %self.task_id,
            cycle = self.cycles,
            records = records.len(),
            "Poll cycle complete"
        );
        records
    }

    async fn poll_job(&mut self, locator: &str, partition: &SourcePartition) -> Option<SourceRecord> {
        let body = match self.gateway.fetch_job_builds(locator).await {
            Ok(body) => body,
            Err(e) => {
                warn!(job = %partition.value, error = %e, "Failed to fetch job, skipping this cycle");
                return None;
            }
        };
        trace!(job = %partition.value, body = %body, "Job resource");

        let snapshot = match JobBuilds::from_json(&body) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(job = %partition.value, error = %e, "Malformed job resource, skipping this cycle");
                return None;
            }
        };

        let build = match detect(&snapshot, self.offsets.get_offset(partition)) {
            Change::NeverBuilt => {
                debug!(job = %partition.value, "Job has no builds");
                return None;
            }
            Change::AlreadyEmitted(number) => {
                trace!(job = %partition.value, build = number, "Last build already emitted");
                return None;
            }
            Change::NewBuild(build) => build,
        };

        debug!(
            job = %partition.value,
            build = build.number,
            known = ?self.offsets.get_offset(partition).map(|o| o.value),
            "New build"
        );

        let detail = match self.gateway.fetch_build_detail(&build.url).await {
            Ok(detail) if !detail.trim().is_empty() => detail,
            Ok(_) => {
                self.on_detail_failure(partition, &build, "empty build detail");
                return None;
            }
            Err(e) => {
                self.on_detail_failure(partition, &build, &e.to_string());
                return None;
            }
        };

        match build_record(&self.settings.topic, partition, build.number, detail) {
            Ok(record) => {
                self.detail_failures.remove(partition);
                self.offsets.cache(partition.clone(), record.offset.clone());
                Some(record)
            }
            Err(e) => {
                self.on_detail_failure(partition, &build, &e.to_string());
                None
            }
        }
    }

    /// Counts a failed detail fetch and applies the failure policy.
    fn on_detail_failure(&mut self, partition: &SourcePartition, build: &BuildRef, error: &str) {
        let failures = self
            .detail_failures
            .entry(partition.clone())
            .or_insert(DetailFailures {
                build_number: build.number,
                attempts: 0,
            });
        if failures.build_number != build.number {
            *failures = DetailFailures {
                build_number: build.number,
                attempts: 0,
            };
        }
        failures.attempts += 1;
        let attempts = failures.attempts;

        match self.settings.detail_failure_policy {
            DetailFailurePolicy::SkipAfter(limit) if attempts >= limit => {
                warn!(
                    job = %partition.value,
                    build = build.number,
                    attempts = attempts,
                    error = %error,
                    "Build detail keeps failing, skipping build"
                );
                self.detail_failures.remove(partition);
                self.offsets
                    .cache(partition.clone(), SourceOffset::new(BUILD_NUMBER, build.number));
            }
            _ => {
                warn!(
                    job = %partition.value,
                    build = build.number,
                    attempts = attempts,
                    error = %error,
                    "Failed to fetch build detail, will retry next cycle"
                );
            }
        }
    }
}
