//! Splits the job list into per-task work assignments.

use crate::config::{TaskProps, JOB_URLS};
use std::fmt;

const DELIMITER: char = ',';

/// Splits `work` into `min(work.len(), max_tasks)` contiguous groups.
///
/// Order is preserved within and across groups and group sizes differ by at
/// most one; earlier groups take the extra elements. Empty input (or
/// `max_tasks == 0`) yields no groups.
pub fn group_work<T>(work: &[T], max_tasks: usize) -> Vec<&[T]> {
    if work.is_empty() || max_tasks == 0 {
        return Vec::new();
    }

    let groups = work.len().min(max_tasks);
    let base = work.len() / groups;
    let extra = work.len() % groups;

    let mut result = Vec::with_capacity(groups);
    let mut start = 0;
    for i in 0..groups {
        let size = base + usize::from(i < extra);
        result.push(&work[start..start + size]);
        start += size;
    }
    result
}

/// Groups `work` and extracts one locator per item, in group order.
pub fn build_assignments<T, F>(work: &[T], max_tasks: usize, locator: F) -> Vec<WorkAssignment>
where
    F: Fn(&T) -> String,
{
    group_work(work, max_tasks)
        .into_iter()
        .map(|group| WorkAssignment::new(group.iter().map(&locator).collect()))
        .collect()
}

/// Ordered job locators owned by one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkAssignment {
    locators: Vec<String>,
}

impl WorkAssignment {
    pub fn new(locators: Vec<String>) -> Self {
        Self { locators }
    }

    pub fn locators(&self) -> &[String] {
        &self.locators
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }

    /// Comma-joined list of percent-encoded locators.
    ///
    /// Encoding keeps a comma inside a locator from splitting it in two.
    pub fn encode(&self) -> String {
        self.locators
            .iter()
            .map(|l| urlencoding::encode(l).into_owned())
            .collect::<Vec<_>>()
            .join(&DELIMITER.to_string())
    }

    /// Inverse of [`encode`](Self::encode).
    ///
    /// Plain locators without `%` escapes decode to themselves, so a
    /// hand-written comma-separated list is accepted too.
    pub fn parse(encoded: &str) -> Result<Self, AssignmentError> {
        let mut locators = Vec::new();
        for (position, segment) in encoded.split(DELIMITER).enumerate() {
            let locator = urlencoding::decode(segment).map_err(|_| AssignmentError::InvalidEncoding {
                position,
                segment: segment.to_string(),
            })?;
            if locator.trim().is_empty() {
                return Err(AssignmentError::EmptyLocator { position });
            }
            locators.push(locator.into_owned());
        }
        Ok(Self { locators })
    }

    /// Task configuration: `base` plus this assignment under `job.urls`.
    pub fn to_task_props(&self, base: &TaskProps) -> TaskProps {
        let mut props = base.clone();
        props.insert(JOB_URLS.to_string(), self.encode());
        props
    }

    /// Reads the assignment back out of a task configuration.
    pub fn from_task_props(props: &TaskProps) -> Result<Self, AssignmentError> {
        let encoded = props
            .get(JOB_URLS)
            .ok_or(AssignmentError::Missing)?;
        Self::parse(encoded)
    }
}

/// Invalid `job.urls` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentError {
    Missing,
    EmptyLocator { position: usize },
    InvalidEncoding { position: usize, segment: String },
}

impl fmt::Display for AssignmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentError::Missing => write!(f, "Task configuration has no '{}'", JOB_URLS),
            AssignmentError::EmptyLocator { position } => {
                write!(f, "Empty job locator at position {}", position)
            }
            AssignmentError::InvalidEncoding { position, segment } => write!(
                f,
                "Job locator '{}' at position {} is not valid percent-encoded UTF-8",
                segment, position
            ),
        }
    }
}

impl std::error::Error for AssignmentError {}
