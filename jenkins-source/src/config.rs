//! Connector configuration.
//!
//! Loaded from a TOML file; secrets can also come from the environment:
//! - `JENKINS_USERNAME`
//! - `JENKINS_PASSWORD_OR_API_TOKEN`

use anyhow::Result;
use buildstream::config::{load_config, ApiConfig, NatsConfig, OffsetConfig};
use buildstream::record::is_valid_topic_name;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Task configuration handed from the connector to one task.
pub type TaskProps = BTreeMap<String, String>;

/// Task config key holding the encoded work assignment
pub const JOB_URLS: &str = "job.urls";
/// Task config key holding the destination topic
pub const TOPIC: &str = "topic";
/// Task config key holding the poll interval in milliseconds
pub const POLL_INTERVAL_MS: &str = "poll.interval.ms";
/// Task config key holding the detail failure policy
pub const DETAIL_FAILURE_POLICY: &str = "detail.failure.policy";

/// Complete connector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct JenkinsSourceConfig {
    pub jenkins: JenkinsConfig,
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub offsets: OffsetConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Jenkins server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct JenkinsConfig {
    pub base_url: String,
    #[serde(default = "default_jobs_resource_path")]
    pub jobs_resource_path: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password_or_api_token: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_jobs_resource_path() -> String {
    "/api/json".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    500
}

fn default_read_timeout_ms() -> u64 {
    3000
}

/// Polling and task layout
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    /// Connector name, also the offset namespace
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How often the job list is re-read to detect new or removed jobs
    #[serde(default = "default_rebalance_interval_secs")]
    pub rebalance_interval_secs: u64,
    #[serde(default)]
    pub detail_failure_policy: DetailFailurePolicy,
    /// Attempts to hand one record to the sink before giving up
    #[serde(default = "default_send_max_attempts")]
    pub send_max_attempts: u32,
    /// Delay before the first resend, doubled on every further attempt
    #[serde(default = "default_send_backoff_ms")]
    pub send_backoff_ms: u64,
}

fn default_name() -> String {
    "jenkins".to_string()
}

fn default_topic() -> String {
    "jenkins.connector.topic".to_string()
}

fn default_max_tasks() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    60_000
}

fn default_rebalance_interval_secs() -> u64 {
    300
}

fn default_send_max_attempts() -> u32 {
    3
}

fn default_send_backoff_ms() -> u64 {
    1000
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            topic: default_topic(),
            max_tasks: default_max_tasks(),
            poll_interval_ms: default_poll_interval_ms(),
            rebalance_interval_secs: default_rebalance_interval_secs(),
            detail_failure_policy: DetailFailurePolicy::default(),
            send_max_attempts: default_send_max_attempts(),
            send_backoff_ms: default_send_backoff_ms(),
        }
    }
}

/// What to do with a build whose detail resource keeps failing.
///
/// In TOML: `"retry_forever"` or `{ skip_after = 5 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailFailurePolicy {
    /// Retry the build on every cycle until the detail fetch succeeds
    #[default]
    RetryForever,
    /// Give up on the build after this many consecutive failed cycles
    SkipAfter(u32),
}

impl fmt::Display for DetailFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetailFailurePolicy::RetryForever => write!(f, "retry_forever"),
            DetailFailurePolicy::SkipAfter(attempts) => write!(f, "skip_after:{}", attempts),
        }
    }
}

impl FromStr for DetailFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "retry_forever" {
            return Ok(DetailFailurePolicy::RetryForever);
        }
        s.strip_prefix("skip_after:")
            .and_then(|n| n.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .map(DetailFailurePolicy::SkipAfter)
            .ok_or_else(|| ConfigError::InvalidFailurePolicy(s.to_string()))
    }
}

/// Configuration errors (fatal at start-up)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidBaseUrl(String),
    IncompleteCredentials,
    InvalidTopic(String),
    InvalidMaxTasks,
    InvalidPollInterval,
    InvalidFailurePolicy(String),
    InvalidSendAttempts,
    /// `offsets.flush_interval_ms` or `offsets.flush_timeout_ms` is zero
    InvalidOffsetFlush(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidBaseUrl(url) => {
                write!(f, "Invalid Jenkins base URL '{}': must be an http(s) URL", url)
            }
            ConfigError::IncompleteCredentials => write!(
                f,
                "Jenkins username and password (or API token) must be set together"
            ),
            ConfigError::InvalidTopic(topic) => write!(
                f,
                "Invalid topic '{}': must be dot-separated letters, digits, '_' or '-'",
                topic
            ),
            ConfigError::InvalidMaxTasks => write!(f, "max_tasks must be at least 1"),
            ConfigError::InvalidPollInterval => write!(f, "poll_interval_ms must be positive"),
            ConfigError::InvalidFailurePolicy(policy) => {
                write!(f, "Invalid detail failure policy '{}'", policy)
            }
            ConfigError::InvalidSendAttempts => write!(f, "send_max_attempts must be at least 1"),
            ConfigError::InvalidOffsetFlush(field) => write!(f, "offsets.{} must be positive", field),
        }
    }
}

impl std::error::Error for ConfigError {}

impl JenkinsSourceConfig {
    /// Loads configuration from a TOML file and applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config: JenkinsSourceConfig = load_config(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Non-empty `JENKINS_USERNAME` / `JENKINS_PASSWORD_OR_API_TOKEN` win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(username) = std::env::var("JENKINS_USERNAME") {
            if !username.is_empty() {
                self.jenkins.username = username;
            }
        }
        if let Ok(password) = std::env::var("JENKINS_PASSWORD_OR_API_TOKEN") {
            if !password.is_empty() {
                self.jenkins.password_or_api_token = password;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.jenkins.validate()?;
        self.connector.validate()?;
        validate_offsets(&self.offsets)
    }
}

/// A zero flush interval or timeout would leave committed offsets unflushed.
fn validate_offsets(offsets: &OffsetConfig) -> Result<(), ConfigError> {
    if offsets.flush_interval_ms == 0 {
        return Err(ConfigError::InvalidOffsetFlush("flush_interval_ms"));
    }
    if offsets.flush_timeout_ms == 0 {
        return Err(ConfigError::InvalidOffsetFlush("flush_timeout_ms"));
    }
    Ok(())
}

impl JenkinsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidBaseUrl(self.base_url.clone()))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::InvalidBaseUrl(self.base_url.clone()));
        }
        self.credentials().map(|_| ())
    }

    /// Full URL of the all-jobs resource.
    pub fn jobs_resource(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if self.jobs_resource_path.starts_with('/') {
            format!("{}{}", base, self.jobs_resource_path)
        } else {
            format!("{}/{}", base, self.jobs_resource_path)
        }
    }

    /// Returns `(username, password)` when authentication is configured.
    pub fn credentials(&self) -> Result<Option<(&str, &str)>, ConfigError> {
        match (
            self.username.is_empty(),
            self.password_or_api_token.is_empty(),
        ) {
            (true, true) => Ok(None),
            (false, false) => Ok(Some((&self.username, &self.password_or_api_token))),
            _ => Err(ConfigError::IncompleteCredentials),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl ConnectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_topic_name(&self.topic) {
            return Err(ConfigError::InvalidTopic(self.topic.clone()));
        }
        if self.max_tasks == 0 {
            return Err(ConfigError::InvalidMaxTasks);
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        if let DetailFailurePolicy::SkipAfter(0) = self.detail_failure_policy {
            return Err(ConfigError::InvalidFailurePolicy(
                self.detail_failure_policy.to_string(),
            ));
        }
        if self.send_max_attempts == 0 {
            return Err(ConfigError::InvalidSendAttempts);
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_interval_secs)
    }

    pub fn send_backoff(&self) -> Duration {
        Duration::from_millis(self.send_backoff_ms)
    }

    /// Settings forwarded to every task; the assignment is added per task.
    pub fn task_base_props(&self) -> TaskProps {
        TaskProps::from([
            (TOPIC.to_string(), self.topic.clone()),
            (POLL_INTERVAL_MS.to_string(), self.poll_interval_ms.to_string()),
            (
                DETAIL_FAILURE_POLICY.to_string(),
                self.detail_failure_policy.to_string(),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Serialize all env-var-mutating tests
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn minimal() -> JenkinsSourceConfig {
        toml::from_str(
            r#"
            [jenkins]
            base_url = "http://localhost:8080"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = minimal();
        assert_eq!(config.jenkins.jobs_resource_path, "/api/json");
        assert_eq!(config.jenkins.connect_timeout(), Duration::from_millis(500));
        assert_eq!(config.jenkins.read_timeout(), Duration::from_millis(3000));
        assert_eq!(config.connector.name, "jenkins");
        assert_eq!(config.connector.topic, "jenkins.connector.topic");
        assert_eq!(config.connector.max_tasks, 1);
        assert_eq!(config.connector.poll_interval(), Duration::from_secs(60));
        assert_eq!(
            config.connector.detail_failure_policy,
            DetailFailurePolicy::RetryForever
        );
        assert_eq!(config.offsets.flush_interval_ms, 1000);
        assert_eq!(config.nats.stream_name, "BUILDSTREAM");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let config: JenkinsSourceConfig = toml::from_str(
            r#"
            [jenkins]
            base_url = "https://builds.apache.org/"
            jobs_resource_path = "view/All/api/json"
            username = "bot"
            password_or_api_token = "token"
            connect_timeout_ms = 1000
            read_timeout_ms = 10000

            [connector]
            topic = "ci.builds"
            max_tasks = 4
            poll_interval_ms = 5000
            detail_failure_policy = { skip_after = 3 }

            [offsets]
            db_path = "/tmp/offsets.db"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.jenkins.jobs_resource(),
            "https://builds.apache.org/view/All/api/json"
        );
        assert_eq!(config.jenkins.credentials().unwrap(), Some(("bot", "token")));
        assert_eq!(config.connector.max_tasks, 4);
        assert_eq!(
            config.connector.detail_failure_policy,
            DetailFailurePolicy::SkipAfter(3)
        );
        assert_eq!(config.offsets.db_path, "/tmp/offsets.db");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_jobs_resource_default_path() {
        let config = minimal();
        assert_eq!(config.jenkins.jobs_resource(), "http://localhost:8080/api/json");
    }

    #[test]
    fn test_validation_errors() {
        let mut config = minimal();
        config.jenkins.base_url = "ftp://ci".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBaseUrl(_))));

        let mut config = minimal();
        config.jenkins.base_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBaseUrl(_))));

        let mut config = minimal();
        config.jenkins.username = "bot".to_string();
        assert_eq!(config.validate(), Err(ConfigError::IncompleteCredentials));

        let mut config = minimal();
        config.jenkins.password_or_api_token = "token".to_string();
        assert_eq!(config.validate(), Err(ConfigError::IncompleteCredentials));

        let mut config = minimal();
        config.connector.topic = "Jenkins Builds".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTopic(_))));

        let mut config = minimal();
        config.connector.max_tasks = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxTasks));

        let mut config = minimal();
        config.connector.poll_interval_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPollInterval));

        let mut config = minimal();
        config.offsets.flush_interval_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidOffsetFlush("flush_interval_ms"))
        );

        let mut config = minimal();
        config.offsets.flush_timeout_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidOffsetFlush("flush_timeout_ms"))
        );

        let mut config = minimal();
        config.connector.detail_failure_policy = DetailFailurePolicy::SkipAfter(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFailurePolicy(_))
        ));
    }

    #[test]
    fn test_failure_policy_string_form() {
        for policy in [
            DetailFailurePolicy::RetryForever,
            DetailFailurePolicy::SkipAfter(5),
        ] {
            assert_eq!(policy.to_string().parse::<DetailFailurePolicy>(), Ok(policy));
        }
        assert!("skip_after:0".parse::<DetailFailurePolicy>().is_err());
        assert!("sometimes".parse::<DetailFailurePolicy>().is_err());
    }

    #[test]
    fn test_task_base_props() {
        let props = ConnectorConfig::default().task_base_props();
        assert_eq!(props.get(TOPIC).map(String::as_str), Some("jenkins.connector.topic"));
        assert_eq!(props.get(POLL_INTERVAL_MS).map(String::as_str), Some("60000"));
        assert_eq!(
            props.get(DETAIL_FAILURE_POLICY).map(String::as_str),
            Some("retry_forever")
        );
        assert!(!props.contains_key(JOB_URLS));
    }

    #[test]
    fn test_load_with_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [jenkins]
            base_url = "http://localhost:8080"
            username = "from-file"
            "#
        )
        .unwrap();

        std::env::set_var("JENKINS_USERNAME", "from-env");
        std::env::set_var("JENKINS_PASSWORD_OR_API_TOKEN", "secret");

        let config = JenkinsSourceConfig::load(file.path()).unwrap();
        assert_eq!(config.jenkins.username, "from-env");
        assert_eq!(config.jenkins.password_or_api_token, "secret");

        std::env::remove_var("JENKINS_USERNAME");
        std::env::remove_var("JENKINS_PASSWORD_OR_API_TOKEN");
    }

    #[test]
    fn test_missing_jenkins_section_is_an_error() {
        let result: Result<JenkinsSourceConfig, _> = toml::from_str("[connector]\nmax_tasks = 2");
        assert!(result.is_err());
    }
}
