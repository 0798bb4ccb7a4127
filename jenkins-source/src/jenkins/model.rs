use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

/// All-jobs resource (`/api/json` on the Jenkins root).
#[derive(Debug, Clone, Deserialize)]
pub struct JobList {
    #[serde(default)]
    pub jobs: Vec<JobSummary>,
}

/// One entry of the all-jobs resource.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobSummary {
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// Job resource (`<job url>api/json`), reduced to what change detection needs.
#[derive(Debug, Clone, Deserialize)]
pub struct JobBuilds {
    #[serde(default)]
    pub name: String,
    /// Absent (or `null`) for a job that has never built
    #[serde(rename = "lastBuild", default)]
    pub last_build: Option<BuildRef>,
}

/// Build descriptor as it appears in `lastBuild`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuildRef {
    pub number: i64,
    pub url: String,
}

impl JobList {
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body).context("Failed to parse Jenkins job list")
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl JobBuilds {
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body).context("Failed to parse Jenkins job builds")
    }
}

/// Derives the job identity from a job URL.
///
/// `https://builds.apache.org/job/Accumulo-Master/` → `Accumulo-Master`.
/// The last non-empty path segment is percent-decoded (`+` decodes to a
/// space); a segment that does not decode to UTF-8 is returned as is.
pub fn job_identity(job_url: &str) -> String {
    let segment = job_url
        .split('/')
        .filter(|s| !s.is_empty())
        .last()
        .unwrap_or_default();

    match urlencoding::decode(&segment.replace('+', " ")) {
        Ok(decoded) => decoded.into_owned(),
        Err(e) => {
            warn!(
                segment = %segment,
                error = %e,
                "Unable to decode job name, using it as is"
            );
            segment.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_identity() {
        assert_eq!(
            job_identity("https://builds.apache.org/job/Accumulo-Master/"),
            "Accumulo-Master"
        );
        assert_eq!(job_identity("http://ci/job/demo"), "demo");
        assert_eq!(job_identity("http://ci/job/my%20job/"), "my job");
        assert_eq!(job_identity("http://ci/job/a+b/"), "a b");
        assert_eq!(job_identity(""), "");
    }

    #[test]
    fn test_job_identity_invalid_encoding_falls_back() {
        assert_eq!(job_identity("http://ci/job/bad%FF/"), "bad%FF");
    }

    #[test]
    fn test_parse_job_list_ignores_unknown_fields() {
        let list = JobList::from_json(
            r#"{
                "_class": "hudson.model.Hudson",
                "jobs": [
                    {"_class": "hudson.model.FreeStyleProject", "name": "A", "url": "http://ci/job/A/", "color": "blue"},
                    {"name": "B", "url": "http://ci/job/B/"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(list.jobs[0].name, "A");
        assert_eq!(list.jobs[1].url, "http://ci/job/B/");
    }

    #[test]
    fn test_parse_job_list_without_jobs() {
        let list = JobList::from_json(r#"{"mode": "NORMAL"}"#).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_parse_job_builds() {
        let builds = JobBuilds::from_json(
            r#"{"name": "demo", "lastBuild": {"_class": "x", "number": 42, "url": "http://ci/job/demo/42/"}}"#,
        )
        .unwrap();

        assert_eq!(builds.name, "demo");
        assert_eq!(
            builds.last_build,
            Some(BuildRef {
                number: 42,
                url: "http://ci/job/demo/42/".to_string()
            })
        );
    }

    #[test]
    fn test_parse_job_never_built() {
        let missing = JobBuilds::from_json(r#"{"name": "fresh"}"#).unwrap();
        let null = JobBuilds::from_json(r#"{"name": "fresh", "lastBuild": null}"#).unwrap();

        assert!(missing.last_build.is_none());
        assert!(null.last_build.is_none());
    }

    #[test]
    fn test_parse_malformed_body() {
        let err = JobBuilds::from_json("<html>login</html>").unwrap_err();
        assert!(err.to_string().contains("Failed to parse Jenkins job builds"));
    }
}
