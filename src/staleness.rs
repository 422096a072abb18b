//! Decides whether a task must run.
//!
//! Checks, in order: missing targets, dependencies rebuilt upstream during
//! this invocation, then stored signatures. A task with no prior record is
//! always stale.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use crate::logger::trace;
use crate::signature::{definition_signature, file_signature, TaskRecord};
use crate::task::{Task, TaskRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    TargetMissing(PathBuf),
    UpstreamExecuted { task: String, path: PathBuf },
    NoRecord,
    DefinitionChanged,
    DependencyMissing(PathBuf),
    DependencyChanged(PathBuf),
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::TargetMissing(path) => write!(f, "target {} is missing", path.display()),
            StaleReason::UpstreamExecuted { task, path } => {
                write!(f, "{} was rebuilt by '{}'", path.display(), task)
            }
            StaleReason::NoRecord => f.write_str("never run before"),
            StaleReason::DefinitionChanged => f.write_str("task definition changed"),
            StaleReason::DependencyMissing(path) => {
                write!(f, "dependency {} is missing", path.display())
            }
            StaleReason::DependencyChanged(path) => {
                write!(f, "dependency {} changed", path.display())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    UpToDate,
    Stale(StaleReason),
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        matches!(self, Staleness::Stale(_))
    }
}

/// Evaluates one task. `executed` holds the tasks that actually ran (not
/// skipped) earlier in this invocation; it must already contain every
/// upstream task that ran, which holds when tasks are evaluated in
/// dependency order.
pub fn evaluate(
    task: &Task,
    registry: &TaskRegistry,
    record: Option<&TaskRecord>,
    executed: &HashSet<String>,
) -> Staleness {
    if let Some(missing) = task.targets.iter().find(|target| !target.exists()) {
        return stale(task, StaleReason::TargetMissing(missing.clone()));
    }

    for dep in &task.file_deps {
        if let Some(producer) = registry.owner_of(dep) {
            if executed.contains(producer) {
                return stale(
                    task,
                    StaleReason::UpstreamExecuted {
                        task: producer.to_string(),
                        path: dep.clone(),
                    },
                );
            }
        }
    }

    let Some(record) = record else {
        return stale(task, StaleReason::NoRecord);
    };
    if record.definition != definition_signature(task) {
        return stale(task, StaleReason::DefinitionChanged);
    }

    for dep in &task.file_deps {
        let current = match file_signature(dep) {
            Ok(sig) => sig,
            Err(_) => return stale(task, StaleReason::DependencyMissing(dep.clone())),
        };
        if record.signature_of(dep) != Some(current.as_str()) {
            return stale(task, StaleReason::DependencyChanged(dep.clone()));
        }
    }

    trace!("'{}' is up to date", task.name);
    Staleness::UpToDate
}

fn stale(task: &Task, reason: StaleReason) -> Staleness {
    trace!("'{}' is stale: {}", task.name, reason);
    Staleness::Stale(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Command;
    use std::fs;
    use tempfile::tempdir;

    struct Fixture {
        _temp: tempfile::TempDir,
        registry: TaskRegistry,
        src: PathBuf,
        mid: PathBuf,
        out: PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = tempdir().expect("temp dir");
        let src = temp.path().join("src.txt");
        let mid = temp.path().join("mid.txt");
        let out = temp.path().join("out.txt");
        fs::write(&src, "source").expect("write src");

        let mut registry = TaskRegistry::new();
        registry
            .register(
                Task::new("first")
                    .action(Command::shell("cp src.txt mid.txt"))
                    .file_dep(&src)
                    .target(&mid),
            )
            .expect("first");
        registry
            .register(
                Task::new("second")
                    .action(Command::shell("cp mid.txt out.txt"))
                    .file_dep(&mid)
                    .target(&out),
            )
            .expect("second");
        Fixture {
            _temp: temp,
            registry,
            src,
            mid,
            out,
        }
    }

    #[test]
    fn missing_target_wins_over_everything() {
        let fx = fixture();
        let task = fx.registry.lookup("first").expect("task");
        let record = TaskRecord::capture(task);
        assert_eq!(
            evaluate(task, &fx.registry, Some(&record), &HashSet::new()),
            Staleness::Stale(StaleReason::TargetMissing(fx.mid.clone()))
        );
    }

    #[test]
    fn no_record_is_stale_and_matching_record_is_up_to_date() {
        let fx = fixture();
        fs::write(&fx.mid, "mid").expect("write target");
        let task = fx.registry.lookup("first").expect("task");
        assert_eq!(
            evaluate(task, &fx.registry, None, &HashSet::new()),
            Staleness::Stale(StaleReason::NoRecord)
        );
        let record = TaskRecord::capture(task);
        assert_eq!(
            evaluate(task, &fx.registry, Some(&record), &HashSet::new()),
            Staleness::UpToDate
        );
    }

    #[test]
    fn changed_dependency_is_stale() {
        let fx = fixture();
        fs::write(&fx.mid, "mid").expect("write target");
        let task = fx.registry.lookup("first").expect("task");
        let record = TaskRecord::capture(task);
        fs::write(&fx.src, "edited").expect("edit source");
        assert_eq!(
            evaluate(task, &fx.registry, Some(&record), &HashSet::new()),
            Staleness::Stale(StaleReason::DependencyChanged(fx.src.clone()))
        );
    }

    #[test]
    fn upstream_execution_propagates_even_when_inputs_match() {
        let fx = fixture();
        fs::write(&fx.mid, "mid").expect("write mid");
        fs::write(&fx.out, "out").expect("write out");
        let task = fx.registry.lookup("second").expect("task");
        let record = TaskRecord::capture(task);
        let executed: HashSet<String> = ["first".to_string()].into_iter().collect();
        assert_eq!(
            evaluate(task, &fx.registry, Some(&record), &executed),
            Staleness::Stale(StaleReason::UpstreamExecuted {
                task: "first".into(),
                path: fx.mid.clone(),
            })
        );
    }

    #[test]
    fn changed_definition_is_stale() {
        let fx = fixture();
        fs::write(&fx.mid, "mid").expect("write target");
        let task = fx.registry.lookup("first").expect("task");
        let mut record = TaskRecord::capture(task);
        record.definition = "old".into();
        assert_eq!(
            evaluate(task, &fx.registry, Some(&record), &HashSet::new()),
            Staleness::Stale(StaleReason::DefinitionChanged)
        );
    }

    #[test]
    fn deleted_dependency_is_stale() {
        let fx = fixture();
        fs::write(&fx.mid, "mid").expect("write target");
        let task = fx.registry.lookup("first").expect("task");
        let record = TaskRecord::capture(task);
        fs::remove_file(&fx.src).expect("remove source");
        assert_eq!(
            evaluate(task, &fx.registry, Some(&record), &HashSet::new()),
            Staleness::Stale(StaleReason::DependencyMissing(fx.src.clone()))
        );
    }
}
