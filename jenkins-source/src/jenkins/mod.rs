//! Jenkins REST API access.

mod client;
pub mod model;

pub use client::HttpJenkinsGateway;
pub use model::{job_identity, BuildRef, JobBuilds, JobList, JobSummary};

use anyhow::Result;
use async_trait::async_trait;

/// Read-only view of a Jenkins server.
///
/// Each call is a single GET returning the raw response body. Implementations
/// do not retry; the poll cycle decides what a failure means.
#[async_trait]
pub trait JenkinsGateway: Send + Sync {
    /// Fetches the all-jobs resource.
    async fn fetch_job_list(&self) -> Result<String>;

    /// Fetches the job resource for `job_url` (name plus `lastBuild`).
    async fn fetch_job_builds(&self, job_url: &str) -> Result<String>;

    /// Fetches the build resource for `build_url`. The body is opaque.
    async fn fetch_build_detail(&self, build_url: &str) -> Result<String>;
}

/// JSON API resource of a job or build locator.
///
/// `http://ci/job/demo/` → `http://ci/job/demo/api/json`
pub fn api_resource(locator: &str) -> String {
    if locator.ends_with('/') {
        format!("{}api/json", locator)
    } else {
        format!("{}/api/json", locator)
    }
}
