//! Removes the targets of cleanable tasks, and runs directory purges.
//!
//! Selected tasks are widened with everything downstream of them: once an
//! input is gone, outputs built from it are stale anyway. Files go first;
//! directories are removed afterwards, deepest first, and only when empty.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::graph::DependencyGraph;
use crate::logger::{debug, info, warn};
use crate::signature::SignatureStore;
use crate::task::{Purge, TaskRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanFailure {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// Cleaned tasks, in the order they were processed.
    pub tasks: Vec<String>,
    pub removed: Vec<PathBuf>,
    /// Directories left in place because something else still lives there.
    pub kept: Vec<PathBuf>,
    pub failures: Vec<CleanFailure>,
}

impl CleanReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<CleanReport, Error> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(Error::CleanIncomplete(self.failures.len()))
        }
    }

    fn merge(&mut self, other: CleanReport) {
        self.tasks.extend(other.tasks);
        self.removed.extend(other.removed);
        self.kept.extend(other.kept);
        self.failures.extend(other.failures);
    }
}

pub struct Cleaner<'a> {
    registry: &'a TaskRegistry,
    graph: &'a DependencyGraph,
    dry_run: bool,
}

impl<'a> Cleaner<'a> {
    pub fn new(registry: &'a TaskRegistry, graph: &'a DependencyGraph) -> Self {
        Self {
            registry,
            graph,
            dry_run: false,
        }
    }

    /// Report what would be removed without touching the filesystem.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Cleans `selection` (every task when empty) and all its dependents.
    /// Records of cleaned tasks are dropped from `store`.
    pub fn clean<S: AsRef<str>>(
        &self,
        selection: &[S],
        store: &mut SignatureStore,
    ) -> Result<CleanReport, Error> {
        if let Some(unknown) = selection
            .iter()
            .map(AsRef::as_ref)
            .find(|name| !self.graph.contains(name))
        {
            return Err(Error::UnknownTask(unknown.to_string()));
        }

        let mut report = CleanReport::default();
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for name in self.graph.with_dependents(selection).into_iter().rev() {
            let Some(task) = self.registry.lookup(&name) else {
                continue;
            };
            if !task.cleanable {
                debug!("'{}' is not cleanable", name);
                continue;
            }
            for target in &task.targets {
                if target.is_dir() {
                    dirs.push(target.clone());
                } else {
                    files.push(target.clone());
                }
            }
            report.tasks.push(name);
        }

        for file in files {
            self.remove(&file, RemoveKind::File, &mut report);
        }
        // Deepest first, so nested directories empty their parents.
        dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
        for dir in dirs {
            self.remove(&dir, RemoveKind::EmptyDir, &mut report);
        }

        if !self.dry_run {
            for name in &report.tasks {
                store.forget(name);
            }
        }
        info!(
            "cleaned {} task(s), removed {} path(s)",
            report.tasks.len(),
            report.removed.len()
        );
        Ok(report)
    }

    /// Removes each purge directory with everything inside it.
    pub fn purge(&self, purge: &Purge) -> CleanReport {
        let mut report = CleanReport {
            tasks: vec![purge.name.clone()],
            ..CleanReport::default()
        };
        for dir in &purge.dirs {
            self.remove(dir, RemoveKind::Tree, &mut report);
        }
        report
    }

    /// Runs the named `purges`, then cleans `tasks`. Both empty means clean
    /// everything; purges only ever run when named.
    pub fn clean_selection<S: AsRef<str>>(
        &self,
        tasks: &[S],
        purges: &[S],
        store: &mut SignatureStore,
    ) -> Result<CleanReport, Error> {
        let mut report = CleanReport::default();
        for name in purges {
            let name = name.as_ref();
            let purge = self
                .registry
                .purge(name)
                .ok_or_else(|| Error::UnknownTask(name.to_string()))?;
            report.merge(self.purge(purge));
        }
        if !tasks.is_empty() || purges.is_empty() {
            report.merge(self.clean(tasks, store)?);
        }
        Ok(report)
    }

    fn remove(&self, path: &Path, kind: RemoveKind, report: &mut CleanReport) {
        if fs::symlink_metadata(path).is_err() {
            debug!("'{}' does not exist", path.display());
            return;
        }
        if self.dry_run {
            report.removed.push(path.to_path_buf());
            return;
        }
        let result = match kind {
            RemoveKind::File => fs::remove_file(path),
            RemoveKind::EmptyDir => fs::remove_dir(path),
            RemoveKind::Tree if path.is_dir() => fs::remove_dir_all(path),
            RemoveKind::Tree => fs::remove_file(path),
        };
        match result {
            Ok(()) => {
                debug!("removed '{}'", path.display());
                report.removed.push(path.to_path_buf());
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(_) if kind == RemoveKind::EmptyDir && dir_has_entries(path) => {
                warn!("keeping '{}': directory is not empty", path.display());
                report.kept.push(path.to_path_buf());
            }
            Err(err) => {
                warn!("failed to remove '{}': {}", path.display(), err);
                report.failures.push(CleanFailure {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                });
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoveKind {
    File,
    EmptyDir,
    Tree,
}

fn dir_has_entries(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
