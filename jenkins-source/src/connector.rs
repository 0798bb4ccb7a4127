use crate::config::{ConnectorConfig, JenkinsSourceConfig, TaskProps};
use crate::jenkins::{JenkinsGateway, JobList};
use crate::partitioner::build_assignments;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Splits the Jenkins job list into task configurations.
///
/// # Lifecycle
/// 1. [`start`](Self::start) validates the configuration and probes the
///    jobs resource; any failure is fatal
/// 2. [`task_configs`](Self::task_configs) is called at start-up and on
///    every rebalance
pub struct JenkinsSourceConnector {
    config: ConnectorConfig,
    gateway: Arc<dyn JenkinsGateway>,
}

impl JenkinsSourceConnector {
    pub async fn start(
        config: &JenkinsSourceConfig,
        gateway: Arc<dyn JenkinsGateway>,
    ) -> Result<Self> {
        debug!("Starting the Jenkins connector");
        config.validate().context("Invalid connector configuration")?;

        // Fail fast on an unreachable server
        gateway.fetch_job_list().await.with_context(|| {
            format!(
                "Unable to reach Jenkins jobs resource {}",
                config.jenkins.jobs_resource()
            )
        })?;

        info!(
            connector = %config.connector.name,
            jenkins = %config.jenkins.base_url,
            "Jenkins connector started"
        );

        Ok(Self {
            config: config.connector.clone(),
            gateway,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn gateway(&self) -> Arc<dyn JenkinsGateway> {
        Arc::clone(&self.gateway)
    }

    /// Returns at most `max_tasks` task configurations, one per assignment.
    ///
    /// No jobs yields no configurations. Jobs without a URL are skipped.
    pub async fn task_configs(&self, max_tasks: usize) -> Result<Vec<TaskProps>> {
        debug!(max_tasks = max_tasks, "Calculating task configs");

        let body = self
            .gateway
            .fetch_job_list()
            .await
            .context("Failed to fetch Jenkins job list")?;
        let list = JobList::from_json(&body)?;

        let jobs: Vec<_> = list
            .jobs
            .into_iter()
            .filter(|job| {
                if job.url.trim().is_empty() {
                    warn!(job = %job.name, "Job has no URL, skipping");
                    return false;
                }
                true
            })
            .collect();

        let base = self.config.task_base_props();
        let configs: Vec<TaskProps> = build_assignments(&jobs, max_tasks, |job| job.url.clone())
            .iter()
            .map(|assignment| assignment.to_task_props(&base))
            .collect();

        info!(
            jobs = jobs.len(),
            tasks = configs.len(),
            "Calculated task configs"
        );
        Ok(configs)
    }
}
