use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::logger::{debug, trace};
use crate::task::model::{member_name, Family, Purge, RegistryEntry, Task};

/// Owns every declared task, family and purge for the lifetime of a run.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: IndexMap<String, Task>,
    families: IndexMap<String, Family>,
    purges: IndexMap<String, Purge>,
    owners: HashMap<PathBuf, String>,
    root_entries: Vec<RegistryEntry>,
    default_task: Option<String>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task, rejecting duplicate names and targets owned by another task.
    pub fn register(&mut self, task: Task) -> Result<(), ConfigError> {
        let name = task.name.trim().to_string();
        if name.is_empty() {
            return Err(ConfigError::EmptyName("Task"));
        }
        self.ensure_name_available(&name)?;
        for target in &task.targets {
            if let Some(existing) = self.owners.get(target) {
                return Err(ConfigError::ConflictingTargets {
                    path: target.clone(),
                    existing: existing.clone(),
                    new: name,
                });
            }
        }

        debug!(
            "register task '{}' ({} action(s), {} dep(s), {} target(s))",
            name,
            task.actions.len(),
            task.file_deps.len(),
            task.targets.len()
        );
        for target in &task.targets {
            self.owners.insert(target.clone(), name.clone());
        }
        match &task.family {
            Some(base) => {
                if let Some(family) = self.families.get_mut(base) {
                    family.members.push(name.clone());
                }
            }
            None => self.root_entries.push(RegistryEntry::Task(name.clone())),
        }
        self.tasks.insert(name.clone(), Task { name, ..task });
        Ok(())
    }

    /// Registers a whole family at once. Members are renamed `base:variant`
    /// when their name does not already carry the prefix.
    pub fn register_family<I>(
        &mut self,
        base: &str,
        description: Option<String>,
        members: I,
    ) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = Task>,
    {
        self.declare_family(base, description)?;
        for mut task in members {
            let prefix = format!("{}:", base.trim());
            if !task.name.starts_with(&prefix) {
                task.name = member_name(base.trim(), task.name.trim());
            }
            task.family = Some(base.trim().to_string());
            self.register(task)?;
        }
        Ok(())
    }

    /// Opens an empty family; members join it as they are registered.
    pub(crate) fn declare_family(
        &mut self,
        base: &str,
        description: Option<String>,
    ) -> Result<(), ConfigError> {
        let base = base.trim();
        if base.is_empty() {
            return Err(ConfigError::EmptyName("Family"));
        }
        self.ensure_name_available(base)?;
        trace!("declare family '{}'", base);
        self.families.insert(
            base.to_string(),
            Family {
                description,
                members: Vec::new(),
            },
        );
        self.root_entries
            .push(RegistryEntry::Family(base.to_string()));
        Ok(())
    }

    pub(crate) fn set_family_description(&mut self, base: &str, description: Option<String>) {
        if let Some(family) = self.families.get_mut(base) {
            family.description = description;
        }
    }

    pub fn register_purge(&mut self, purge: Purge) -> Result<(), ConfigError> {
        let name = purge.name.trim().to_string();
        if name.is_empty() {
            return Err(ConfigError::EmptyName("Purge"));
        }
        self.ensure_name_available(&name)?;
        self.root_entries.push(RegistryEntry::Purge(name.clone()));
        self.purges.insert(name.clone(), Purge { name, ..purge });
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    /// Every task in declaration order.
    pub fn all(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn family(&self, base: &str) -> Option<&Family> {
        self.families.get(base)
    }

    pub fn purge(&self, name: &str) -> Option<&Purge> {
        self.purges.get(name)
    }

    /// Task that declares `path` as a target.
    pub fn owner_of(&self, path: &Path) -> Option<&str> {
        self.owners.get(path).map(String::as_str)
    }

    pub(crate) fn contains_task(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub(crate) fn contains_name(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
            || self.families.contains_key(name)
            || self.purges.contains_key(name)
    }

    pub(crate) fn root_entries(&self) -> &[RegistryEntry] {
        &self.root_entries
    }

    pub(crate) fn tasks_iter(&self) -> impl Iterator<Item = (&String, &Task)> {
        self.tasks.iter()
    }

    pub(crate) fn families_iter(&self) -> impl Iterator<Item = (&String, &Family)> {
        self.families.iter()
    }

    pub(crate) fn purges_iter(&self) -> impl Iterator<Item = (&String, &Purge)> {
        self.purges.iter()
    }

    pub(crate) fn set_default_task(&mut self, name: &str) -> Result<(), ConfigError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::Invalid(
                "default_task() requires a task name.".to_string(),
            ));
        }
        if self.default_task.is_some() {
            return Err(ConfigError::Invalid(
                "default_task() can only be defined once per rhakefile.".to_string(),
            ));
        }
        self.default_task = Some(trimmed.to_string());
        Ok(())
    }

    pub fn default_task(&self) -> Option<String> {
        self.default_task.clone()
    }

    fn ensure_name_available(&self, name: &str) -> Result<(), ConfigError> {
        if self.contains_name(name) {
            Err(ConfigError::DuplicateTaskName(name.to_string()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
impl TaskRegistry {
    pub fn insert_task_for_test(&mut self, name: &str) {
        self.register(Task::new(name)).expect("test task");
    }
}
