use super::{api_resource, JenkinsGateway};
use crate::config::JenkinsConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use tracing::trace;

/// HTTP gateway to the Jenkins REST API.
///
/// Every request carries the configured timeouts and, when credentials are
/// set, a Basic `Authorization` header.
pub struct HttpJenkinsGateway {
    http_client: Client,
    jobs_resource: String,
}

impl HttpJenkinsGateway {
    /// Builds a gateway from configuration.
    ///
    /// Fails when only one of username and password/token is set.
    pub fn new(config: &JenkinsConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some((username, password)) = config.credentials()? {
            let mut value = HeaderValue::from_str(&basic_auth_value(username, password))
                .context("Invalid characters in Jenkins credentials")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        // reqwest 0.11 has no separate read timeout; the read timeout bounds
        // the whole request instead.
        let http_client = Client::builder()
            .user_agent("buildstream-jenkins-source/0.1")
            .default_headers(headers)
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            jobs_resource: config.jobs_resource(),
        })
    }

    pub fn jobs_resource(&self) -> &str {
        &self.jobs_resource
    }

    async fn get(&self, url: &str) -> Result<String> {
        trace!(url = %url, "GET");
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to GET {}", url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Jenkins returned {} for {}", status, url));
        }

        response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {}", url))
    }
}

/// `Basic base64(username:password)`
fn basic_auth_value(username: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{}:{}", username, password)))
}

#[async_trait]
impl JenkinsGateway for HttpJenkinsGateway {
    async fn fetch_job_list(&self) -> Result<String> {
        self.get(&self.jobs_resource).await
    }

    async fn fetch_job_builds(&self, job_url: &str) -> Result<String> {
        self.get(&api_resource(job_url)).await
    }

    async fn fetch_build_detail(&self, build_url: &str) -> Result<String> {
        self.get(&api_resource(build_url)).await
    }
}
