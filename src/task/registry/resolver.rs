use indexmap::IndexSet;

use super::task_registry::TaskRegistry;
use crate::error::Error;
use crate::logger::trace;
use crate::task::model::leaf_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskLookup {
    Task(String),
    Family { base: String, members: Vec<String> },
    Purge(String),
    Ambiguous(Vec<String>),
    NotFound,
}

/// Names requested on the command line, split by what they refer to.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Selection {
    pub tasks: Vec<String>,
    pub purges: Vec<String>,
}

impl TaskRegistry {
    pub fn resolve_task(&self, identifier: &str) -> TaskLookup {
        let trimmed = identifier.trim();
        trace!("resolve_task: identifier='{}'", identifier);
        if trimmed.is_empty() {
            return TaskLookup::NotFound;
        }

        if self.contains_task(trimmed) {
            trace!("resolve_task: '{}' matched exact task", trimmed);
            return TaskLookup::Task(trimmed.to_string());
        }

        if let Some(family) = self.family(trimmed) {
            trace!(
                "resolve_task: '{}' matched family with {} member(s)",
                trimmed,
                family.members.len()
            );
            return TaskLookup::Family {
                base: trimmed.to_string(),
                members: family.members.clone(),
            };
        }

        if self.purge(trimmed).is_some() {
            return TaskLookup::Purge(trimmed.to_string());
        }

        if trimmed.contains(':') {
            trace!("resolve_task: qualified identifier '{}' not found", trimmed);
            return TaskLookup::NotFound;
        }

        let matches: Vec<String> = self
            .tasks_iter()
            .filter(|(name, task)| task.family.is_some() && leaf_name(name) == trimmed)
            .map(|(name, _)| name.clone())
            .collect();

        match matches.len() {
            0 => {
                trace!("resolve_task: '{}' not found as variant", trimmed);
                TaskLookup::NotFound
            }
            1 => {
                let name = matches.into_iter().next().unwrap_or_default();
                trace!(
                    "resolve_task: variant '{}' resolved uniquely to '{}'",
                    trimmed,
                    name
                );
                TaskLookup::Task(name)
            }
            _ => {
                trace!(
                    "resolve_task: variant '{}' ambiguous matches {:?}",
                    trimmed,
                    matches
                );
                TaskLookup::Ambiguous(matches)
            }
        }
    }

    /// Resolves every requested name, expanding families into their members.
    /// An empty request selects nothing; callers decide what "all" means.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Selection, Error> {
        let mut tasks = IndexSet::new();
        let mut purges = IndexSet::new();
        for name in names {
            let name = name.as_ref();
            match self.resolve_task(name) {
                TaskLookup::Task(full) => {
                    tasks.insert(full);
                }
                TaskLookup::Family { members, .. } => tasks.extend(members),
                TaskLookup::Purge(full) => {
                    purges.insert(full);
                }
                TaskLookup::Ambiguous(candidates) => {
                    return Err(Error::AmbiguousTask {
                        name: name.to_string(),
                        candidates,
                    })
                }
                TaskLookup::NotFound => return Err(Error::UnknownTask(name.to_string())),
            }
        }
        Ok(Selection {
            tasks: tasks.into_iter().collect(),
            purges: purges.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::model::{Purge, Task};

    fn registry_with_families() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry.insert_task_for_test("public_key");
        registry
            .register_family("sign", None, vec![Task::new("lwm2m"), Task::new("mqtt")])
            .expect("sign family");
        registry
            .register_family("verify", None, vec![Task::new("mqtt")])
            .expect("verify family");
        registry
            .register_purge(Purge {
                name: "purge".into(),
                ..Purge::default()
            })
            .expect("purge");
        registry
    }

    #[test]
    fn resolves_exact_task() {
        let registry = registry_with_families();
        assert_eq!(
            registry.resolve_task("  public_key "),
            TaskLookup::Task("public_key".into())
        );
        assert_eq!(
            registry.resolve_task("sign:mqtt"),
            TaskLookup::Task("sign:mqtt".into())
        );
    }

    #[test]
    fn resolves_family_base_to_members() {
        let registry = registry_with_families();
        match registry.resolve_task("sign") {
            TaskLookup::Family { base, members } => {
                assert_eq!(base, "sign");
                assert_eq!(members, vec!["sign:lwm2m", "sign:mqtt"]);
            }
            other => panic!("expected family, got {:?}", other),
        }
    }

    #[test]
    fn resolves_unique_variant() {
        let registry = registry_with_families();
        assert_eq!(
            registry.resolve_task("lwm2m"),
            TaskLookup::Task("sign:lwm2m".into())
        );
    }

    #[test]
    fn detects_ambiguous_variant() {
        let registry = registry_with_families();
        match registry.resolve_task("mqtt") {
            TaskLookup::Ambiguous(mut names) => {
                names.sort();
                assert_eq!(names, vec!["sign:mqtt", "verify:mqtt"]);
            }
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn not_found_when_empty_or_missing() {
        let registry = registry_with_families();
        assert_eq!(registry.resolve_task(""), TaskLookup::NotFound);
        assert_eq!(registry.resolve_task("unknown"), TaskLookup::NotFound);
        assert_eq!(registry.resolve_task("sign:zigbee"), TaskLookup::NotFound);
    }

    #[test]
    fn select_splits_tasks_and_purges() {
        let registry = registry_with_families();
        let selection = registry
            .select(&["sign", "purge", "sign:lwm2m"])
            .expect("selection");
        assert_eq!(selection.tasks, vec!["sign:lwm2m", "sign:mqtt"]);
        assert_eq!(selection.purges, vec!["purge"]);
    }

    #[test]
    fn select_reports_unknown_names() {
        let registry = registry_with_families();
        let err = registry.select(&["nope"]).unwrap_err();
        assert!(matches!(err, Error::UnknownTask(name) if name == "nope"));
        let err = registry.select(&["mqtt"]).unwrap_err();
        assert!(matches!(err, Error::AmbiguousTask { .. }));
    }
}
