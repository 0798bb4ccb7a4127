//! Jenkins source connector - turns Jenkins build completions into records.
//!
//! Polls a Jenkins server's REST API on a fixed interval and emits one
//! record per new build of every job, exactly once per build number.
//!
//! # Architecture
//!
//! ```text
//!            Jenkins REST API
//!                   ↑
//!          JenkinsGateway (GET)
//!                   ↑
//! ┌──────────────────────────────────────────┐
//! │  JenkinsSourceConnector                   │
//! │  - job list → balanced work assignments   │
//! └──────────────────────────────────────────┘
//!                   ↓ one per assignment
//! ┌──────────────────────────────────────────┐
//! │  JenkinsSourceTask + SourceWorker         │
//! │  - poll jobs, detect new builds           │
//! │  - read-your-writes offset cache          │
//! │  - deliver records, commit offsets        │
//! └──────────────────────────────────────────┘
//!          ↓                        ↓
//!     RecordSink             OffsetWriter → SQLite
//!   (NATS JetStream)
//! ```
//!
//! # Core Types
//!
//! - [`JenkinsGateway`] - Jenkins access (one GET per call, no retries)
//! - [`JenkinsSourceConnector`] - Validates config, computes task configs
//! - [`JenkinsSourceTask`] - Poll cycle for one work assignment
//! - [`ConnectorManager`] - Runs workers, flushes offsets, rebalances

pub mod api;
pub mod config;
pub mod connector;
pub mod jenkins;
pub mod manager;
pub mod partitioner;
pub mod task;
pub mod worker;

// Re-export public types
pub use config::{ConfigError, DetailFailurePolicy, JenkinsSourceConfig};
pub use connector::JenkinsSourceConnector;
pub use jenkins::{HttpJenkinsGateway, JenkinsGateway};
pub use manager::ConnectorManager;
pub use partitioner::{build_assignments, group_work, AssignmentError, WorkAssignment};
pub use task::JenkinsSourceTask;
pub use worker::{SourceWorker, TaskStatus};
