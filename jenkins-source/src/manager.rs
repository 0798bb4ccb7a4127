//! Connector manager - Orchestrates task lifecycle.
//!
//! Computes task configurations from the connector, starts one worker per
//! configuration, flushes committed offsets in the background and
//! rebalances when the Jenkins job list changes.

use crate::config::TaskProps;
use crate::connector::JenkinsSourceConnector;
use crate::task::JenkinsSourceTask;
use crate::worker::{SendRetry, SourceWorker, TaskStatus};
use anyhow::{Context, Result};
use buildstream::config::OffsetConfig;
use buildstream::offsets::{OffsetWriter, SqliteOffsetStore};
use buildstream::sink::RecordSink;
use buildstream::stop::{stop_pair, StopHandle};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{error, info, warn};

/// Status per task id
pub type StatusMap = Arc<tokio::sync::Mutex<BTreeMap<String, Arc<tokio::sync::Mutex<TaskStatus>>>>>;

/// One running worker
struct RunningTask {
    task_id: String,
    stop: StopHandle,
    handle: JoinHandle<()>,
}

/// Current task generation
#[derive(Default)]
struct TaskSet {
    configs: Vec<TaskProps>,
    tasks: Vec<RunningTask>,
}

/// Everything needed to (re)start tasks, shared with the rebalance loop.
#[derive(Clone)]
struct TaskRuntime {
    connector: Arc<JenkinsSourceConnector>,
    store: Arc<SqliteOffsetStore>,
    writer: Arc<OffsetWriter>,
    sink: Arc<dyn RecordSink>,
    retry: SendRetry,
    task_set: Arc<tokio::sync::Mutex<TaskSet>>,
    status_map: StatusMap,
}

/// Connector manager - Orchestrates all task workers.
///
/// # Responsibilities
/// - Compute task configurations and start a worker for each
/// - Flush committed offsets on an interval
/// - Restart tasks when the job assignment changes
/// - Track status for all tasks
/// - Graceful shutdown
pub struct ConnectorManager {
    runtime: TaskRuntime,
    flush_interval: Duration,
    rebalance_interval: Duration,
    flush_stop: StopHandle,
    flush_loop: Option<JoinHandle<()>>,
    rebalance_stop: StopHandle,
    rebalance_loop: Option<JoinHandle<()>>,
}

impl ConnectorManager {
    /// Creates a new connector manager.
    ///
    /// # Arguments
    /// * `connector` - Started connector
    /// * `store` - Durable offset store for this connector
    /// * `sink` - Destination for produced records
    /// * `offsets` - Flush settings
    pub fn new(
        connector: Arc<JenkinsSourceConnector>,
        store: Arc<SqliteOffsetStore>,
        sink: Arc<dyn RecordSink>,
        offsets: &OffsetConfig,
    ) -> Self {
        let writer = Arc::new(OffsetWriter::new(Arc::clone(&store), offsets.flush_timeout()));
        let retry = SendRetry {
            max_attempts: connector.config().send_max_attempts,
            initial_backoff: connector.config().send_backoff(),
        };
        let rebalance_interval = connector.config().rebalance_interval();
        let (flush_stop, _) = stop_pair();
        let (rebalance_stop, _) = stop_pair();

        Self {
            runtime: TaskRuntime {
                connector,
                store,
                writer,
                sink,
                retry,
                task_set: Arc::new(tokio::sync::Mutex::new(TaskSet::default())),
                status_map: Arc::new(tokio::sync::Mutex::new(BTreeMap::new())),
            },
            flush_interval: offsets.flush_interval(),
            rebalance_interval,
            flush_stop,
            flush_loop: None,
            rebalance_stop,
            rebalance_loop: None,
        }
    }

    /// Returns a clone of the status map for external monitoring.
    pub fn status_map(&self) -> StatusMap {
        Arc::clone(&self.runtime.status_map)
    }

    pub fn offset_writer(&self) -> Arc<OffsetWriter> {
        Arc::clone(&self.runtime.writer)
    }

    /// Starts the manager.
    ///
    /// Starts a worker per task configuration, the offset flush loop and,
    /// when the rebalance interval is non-zero, the rebalance loop.
    ///
    /// # Returns
    /// Number of tasks started
    pub async fn start(&mut self) -> Result<usize> {
        info!(connector = %self.runtime.connector.name(), "Starting connector manager");

        let max_tasks = self.runtime.connector.config().max_tasks;
        let configs = self
            .runtime
            .connector
            .task_configs(max_tasks)
            .await
            .context("Failed to compute initial task configs")?;

        if configs.is_empty() {
            warn!("Jenkins has no jobs, no tasks started");
        }
        let started = self.runtime.replace_tasks(configs).await?;

        self.flush_loop = Some(tokio::spawn(
            Arc::clone(&self.runtime.writer)
                .run_flush_loop(self.flush_interval, self.flush_stop.signal()),
        ));

        if !self.rebalance_interval.is_zero() {
            let runtime = self.runtime.clone();
            let interval_period = self.rebalance_interval;
            let mut stop = self.rebalance_stop.signal();

            self.rebalance_loop = Some(tokio::spawn(async move {
                let mut interval = time::interval(interval_period);
                interval.tick().await; // consume immediate first tick

                loop {
                    tokio::select! {
                        _ = interval.tick() => {}
                        _ = stop.stopped() => break,
                    }
                    if let Err(e) = runtime.rebalance().await {
                        warn!(error = %e, "Rebalance failed, keeping current tasks");
                    }
                }
            }));
        }

        Ok(started)
    }

    /// Re-reads the job list and restarts tasks if the assignment changed.
    ///
    /// # Returns
    /// `true` if tasks were restarted
    pub async fn rebalance(&self) -> Result<bool> {
        self.runtime.rebalance().await
    }

    /// Number of running tasks.
    pub async fn task_count(&self) -> usize {
        self.runtime.task_set.lock().await.tasks.len()
    }

    /// Shuts down all tasks gracefully.
    ///
    /// Order matters: the rebalance loop goes first so it cannot start new
    /// tasks, then every task finishes its current cycle, then the flush
    /// loop performs a final flush of everything the tasks committed.
    pub async fn shutdown(&mut self) {
        info!("Shutting down connector manager");

        self.rebalance_stop.stop();
        if let Some(handle) = self.rebalance_loop.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Rebalance loop failed");
            }
        }

        let stopped = self.runtime.stop_tasks().await;
        info!(task_count = stopped, "All tasks stopped");

        self.flush_stop.stop();
        if let Some(handle) = self.flush_loop.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Offset flush loop failed");
            }
        }

        info!("Connector manager stopped");
    }
}

impl Drop for ConnectorManager {
    fn drop(&mut self) {
        self.rebalance_stop.stop();
        self.flush_stop.stop();
        // Best-effort stop of task workers (try_lock since Drop is sync)
        if let Ok(task_set) = self.runtime.task_set.try_lock() {
            for task in &task_set.tasks {
                task.stop.stop();
            }
        }
    }
}

impl TaskRuntime {
    async fn rebalance(&self) -> Result<bool> {
        let max_tasks = self.connector.config().max_tasks;
        let configs = self.connector.task_configs(max_tasks).await?;

        if self.task_set.lock().await.configs == configs {
            return Ok(false);
        }

        info!(tasks = configs.len(), "Job assignment changed, restarting tasks");
        self.replace_tasks(configs).await?;
        Ok(true)
    }

    /// Stops the current generation and starts one task per config.
    ///
    /// Offsets staged by the old generation are flushed first so the new
    /// tasks load them from the store.
    async fn replace_tasks(&self, configs: Vec<TaskProps>) -> Result<usize> {
        self.stop_tasks().await;
        if let Err(e) = self.writer.flush().await {
            warn!(error = %e, "Offset flush before task restart failed");
        }

        let mut tasks: Vec<RunningTask> = Vec::with_capacity(configs.len());
        let mut statuses = BTreeMap::new();

        for (i, props) in configs.iter().enumerate() {
            let task_id = format!("{}-{}", self.connector.name(), i);
            let (stop, signal) = stop_pair();

            let task = match JenkinsSourceTask::start(
                task_id.clone(),
                props,
                self.connector.gateway(),
                self.store.as_ref(),
                signal.clone(),
            ) {
                Ok(task) => task,
                Err(e) => {
                    self.abandon_generation(tasks).await;
                    return Err(e.context(format!("Failed to start task {}", task_id)));
                }
            };

            let worker = SourceWorker::new(
                task,
                Arc::clone(&self.sink),
                Arc::clone(&self.writer),
                self.retry,
                signal,
            );
            statuses.insert(task_id.clone(), worker.status());
            tasks.push(RunningTask {
                task_id,
                stop,
                handle: worker.start(),
            });
        }

        let started = tasks.len();
        {
            let mut task_set = self.task_set.lock().await;
            task_set.configs = configs;
            task_set.tasks = tasks;
        }
        *self.status_map.lock().await = statuses;

        info!(task_count = started, "Tasks started");
        Ok(started)
    }

    /// Stops the partially started generation and forgets the assignment, so
    /// the next rebalance starts tasks again whatever the job list says.
    async fn abandon_generation(&self, started: Vec<RunningTask>) {
        for task in &started {
            task.stop.stop();
        }
        for task in started {
            if let Err(e) = task.handle.await {
                error!(task_id = %task.task_id, error = %e, "Task worker failed");
            }
        }

        self.task_set.lock().await.configs.clear();
        self.status_map.lock().await.clear();
        warn!("Task restart failed, no tasks running until the next rebalance");
    }

    /// Stops all running tasks and waits for them.
    ///
    /// # Returns
    /// Number of tasks stopped
    async fn stop_tasks(&self) -> usize {
        let tasks = std::mem::take(&mut self.task_set.lock().await.tasks);
        for task in &tasks {
            task.stop.stop();
        }

        let count = tasks.len();
        for task in tasks {
            if let Err(e) = task.handle.await {
                error!(task_id = %task.task_id, error = %e, "Task worker failed");
            }
        }
        count
    }
}
