use crate::jenkins::{BuildRef, JobBuilds};
use buildstream::offsets::SourceOffset;

/// Outcome of comparing a job's last build with its last emitted offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// The job has no build history
    NeverBuilt,
    /// The last build was already emitted
    AlreadyEmitted(i64),
    /// The last build differs from the known offset (or none is known)
    NewBuild(BuildRef),
}

/// Decides whether `snapshot` holds a build that still has to be emitted.
///
/// Offsets are compared for equality only; a lower build number than the
/// known one (a recreated job) is a new build as well.
pub fn detect(snapshot: &JobBuilds, known: Option<&SourceOffset>) -> Change {
    let Some(last_build) = &snapshot.last_build else {
        return Change::NeverBuilt;
    };

    match known {
        Some(offset) if offset.value == last_build.number => Change::AlreadyEmitted(offset.value),
        _ => Change::NewBuild(last_build.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(last_build: Option<i64>) -> JobBuilds {
        JobBuilds {
            name: "demo".to_string(),
            last_build: last_build.map(|number| BuildRef {
                number,
                url: format!("http://ci/job/demo/{}/", number),
            }),
        }
    }

    fn offset(build: i64) -> SourceOffset {
        SourceOffset::new("buildNumber", build)
    }

    #[test]
    fn test_never_built() {
        assert_eq!(detect(&snapshot(None), None), Change::NeverBuilt);
        assert_eq!(detect(&snapshot(None), Some(&offset(3))), Change::NeverBuilt);
    }

    #[test]
    fn test_first_observation_is_new() {
        let change = detect(&snapshot(Some(42)), None);
        assert!(matches!(change, Change::NewBuild(BuildRef { number: 42, .. })));
    }

    #[test]
    fn test_same_build_already_emitted() {
        assert_eq!(
            detect(&snapshot(Some(42)), Some(&offset(42))),
            Change::AlreadyEmitted(42)
        );
    }

    #[test]
    fn test_any_other_build_is_new() {
        assert!(matches!(
            detect(&snapshot(Some(43)), Some(&offset(42))),
            Change::NewBuild(BuildRef { number: 43, .. })
        ));
        assert!(matches!(
            detect(&snapshot(Some(1)), Some(&offset(42))),
            Change::NewBuild(BuildRef { number: 1, .. })
        ));
    }
}
