use indexmap::IndexMap;
use std::path::{Path, PathBuf};

use crate::task::model::{Action, Task, Verbosity};

#[derive(Clone, Debug)]
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(full_name: String, family: Option<String>) -> Self {
        Self {
            task: Task {
                name: full_name,
                family,
                ..Task::default()
            },
        }
    }

    pub fn set_description(&mut self, desc: &str) {
        self.task.description = Some(desc.to_string());
    }

    pub fn add_action(&mut self, action: Action) {
        self.task.actions.push(action);
    }

    pub fn add_file_dep(&mut self, path: &Path) {
        self.task.add_file_dep(path);
    }

    pub fn add_target(&mut self, path: &Path) {
        self.task.add_target(path);
    }

    pub fn set_cleanable(&mut self, cleanable: bool) {
        self.task.cleanable = cleanable;
    }

    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.task.verbosity = verbosity;
    }

    pub fn has_working_dir(&self) -> bool {
        self.task.working_dir.is_some()
    }

    pub fn set_working_dir(&mut self, dir: PathBuf) {
        self.task.working_dir = Some(dir);
    }

    pub fn extend_env(&mut self, vars: IndexMap<String, String>) {
        self.task.env.extend(vars);
    }

    pub fn build(self) -> Task {
        self.task
    }
}
