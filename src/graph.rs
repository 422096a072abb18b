//! Dependency graph derived from file overlap between tasks.
//!
//! Task A depends on task B when one of A's file dependencies is a target of B.
//! There are no explicit task-to-task edges.

use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::logger::{trace, warn};
use crate::task::TaskRegistry;

/// A file dependency that no task produces and that is absent from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingDependency {
    pub task: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// task -> tasks it depends on, in dependency declaration order
    edges: IndexMap<String, IndexSet<String>>,
    /// task -> tasks that depend on it
    reverse_edges: IndexMap<String, IndexSet<String>>,
    dangling: Vec<DanglingDependency>,
}

impl DependencyGraph {
    /// Builds the graph and rejects cycles.
    pub fn build(registry: &TaskRegistry) -> Result<Self, ConfigError> {
        let mut edges: IndexMap<String, IndexSet<String>> = IndexMap::new();
        let mut reverse_edges: IndexMap<String, IndexSet<String>> = IndexMap::new();
        let mut dangling = Vec::new();

        for task in registry.all() {
            edges.entry(task.name.clone()).or_default();
            reverse_edges.entry(task.name.clone()).or_default();
        }

        for task in registry.all() {
            for dep in &task.file_deps {
                match registry.owner_of(dep) {
                    Some(producer) => {
                        trace!("edge {} -> {} via {}", task.name, producer, dep.display());
                        edges
                            .entry(task.name.clone())
                            .or_default()
                            .insert(producer.to_string());
                        reverse_edges
                            .entry(producer.to_string())
                            .or_default()
                            .insert(task.name.clone());
                    }
                    None if !dep.exists() => {
                        warn!(
                            "task '{}' depends on '{}', which no task produces and does not exist",
                            task.name,
                            dep.display()
                        );
                        dangling.push(DanglingDependency {
                            task: task.name.clone(),
                            path: dep.clone(),
                        });
                    }
                    None => {}
                }
            }
        }

        let graph = Self {
            edges,
            reverse_edges,
            dangling,
        };
        if let Some(path) = graph.detect_cycle() {
            return Err(ConfigError::CycleDetected { path });
        }
        Ok(graph)
    }

    pub fn dependencies(&self, task: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(task)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    pub fn dependents(&self, task: &str) -> impl Iterator<Item = &str> {
        self.reverse_edges
            .get(task)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    pub fn dangling(&self) -> &[DanglingDependency] {
        &self.dangling
    }

    pub fn contains(&self, task: &str) -> bool {
        self.edges.contains_key(task)
    }

    /// Topological order of `selection` plus everything it transitively
    /// depends on. An empty selection means every task. Ties keep declaration
    /// order.
    pub fn execution_order<S: AsRef<str>>(&self, selection: &[S]) -> Vec<String> {
        let roots: Vec<&str> = if selection.is_empty() {
            self.edges.keys().map(String::as_str).collect()
        } else {
            selection.iter().map(AsRef::as_ref).collect()
        };

        let mut visited = HashSet::new();
        let mut order = Vec::new();
        for root in roots {
            self.visit_post_order(root, &mut visited, &mut order);
        }
        order
    }

    /// `selection` plus every task that transitively depends on it, in
    /// topological order. An empty selection means every task.
    pub fn with_dependents<S: AsRef<str>>(&self, selection: &[S]) -> Vec<String> {
        if selection.is_empty() {
            return self.execution_order::<&str>(&[]);
        }
        let mut closure: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = selection.iter().map(AsRef::as_ref).collect();
        while let Some(task) = stack.pop() {
            if !self.contains(task) || !closure.insert(task) {
                continue;
            }
            stack.extend(self.dependents(task));
        }
        self.execution_order::<&str>(&[])
            .into_iter()
            .filter(|task| closure.contains(task.as_str()))
            .collect()
    }

    fn visit_post_order(&self, node: &str, visited: &mut HashSet<String>, order: &mut Vec<String>) {
        if !self.contains(node) || !visited.insert(node.to_string()) {
            return;
        }
        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                self.visit_post_order(dep, visited, order);
            }
        }
        order.push(node.to_string());
    }

    /// Depth-first search with an on-stack marker set. Returns the cycle as
    /// a closed path, e.g. `a -> b -> a`.
    fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut stack = Vec::new();

        for task in self.edges.keys() {
            if !visited.contains(task.as_str())
                && self.dfs_cycle(task, &mut visited, &mut on_stack, &mut stack)
            {
                return Some(stack);
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        on_stack: &mut HashSet<String>,
        stack: &mut Vec<String>,
    ) -> bool {
        visited.insert(node.to_string());
        on_stack.insert(node.to_string());
        stack.push(node.to_string());

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                if on_stack.contains(dep) {
                    let start = stack.iter().position(|x| x == dep).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(dep.clone());
                    *stack = cycle;
                    return true;
                }
                if !visited.contains(dep) && self.dfs_cycle(dep, visited, on_stack, stack) {
                    return true;
                }
            }
        }

        on_stack.remove(node);
        stack.pop();
        false
    }
}
