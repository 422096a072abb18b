//! A loaded rhakefile: configuration, declared tasks and their graph.

use crate::clean::{CleanReport, Cleaner};
use crate::config::PipelineConfig;
use crate::engine::ScriptEngine;
use crate::error::Error;
use crate::executor::{Executor, PlannedTask, RunOptions, RunReport};
use crate::graph::DependencyGraph;
use crate::logger::{debug, info};
use crate::runner::{CommandRunner, SystemRunner};
use crate::task::{Selection, TaskRegistry};

pub struct Workspace {
    config: PipelineConfig,
    registry: TaskRegistry,
    graph: DependencyGraph,
}

impl Workspace {
    /// Runs the configured script and builds the dependency graph.
    pub fn load(config: PipelineConfig) -> Result<Self, Error> {
        let mut engine = ScriptEngine::new(&config);
        engine.run_script()?;
        Self::from_registry(config, engine.into_registry())
    }

    pub fn from_registry(config: PipelineConfig, registry: TaskRegistry) -> Result<Self, Error> {
        let graph = DependencyGraph::build(&registry)?;
        debug!(
            "workspace loaded: {} task(s), {} dangling dependenc{}",
            registry.len(),
            graph.dangling().len(),
            if graph.dangling().len() == 1 { "y" } else { "ies" }
        );
        Ok(Self {
            config,
            registry,
            graph,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Runs `names` (every task when empty) with real processes.
    pub fn run<S: AsRef<str>>(&self, names: &[S]) -> Result<RunReport, Error> {
        let runner = SystemRunner::new();
        self.run_with(names, &runner, self.config.run_options())
    }

    /// Runs `names` with `runner`, then saves the signature store. A failed
    /// run is still `Ok`; see `RunReport::into_result`.
    pub fn run_with<S: AsRef<str>>(
        &self,
        names: &[S],
        runner: &dyn CommandRunner,
        options: RunOptions,
    ) -> Result<RunReport, Error> {
        let selection = self.tasks_only(names, "run")?;
        let mut store = self.config.open_store();
        let report = Executor::new(&self.registry, &self.graph, runner)
            .with_options(options)
            .in_dir(self.config.root_dir.clone())
            .run(&selection.tasks, &mut store)?;
        store.save()?;
        info!("run finished: {:?}", report.status);
        Ok(report)
    }

    /// What `run` would do, without running anything.
    pub fn status<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<PlannedTask>, Error> {
        let selection = self.tasks_only(names, "status")?;
        let store = self.config.open_store();
        let runner = SystemRunner::new();
        Executor::new(&self.registry, &self.graph, &runner).plan(&selection.tasks, &store)
    }

    /// Cleans `names` (every cleanable task when empty). Purges run only
    /// when named.
    pub fn clean<S: AsRef<str>>(&self, names: &[S], dry_run: bool) -> Result<CleanReport, Error> {
        let Selection { tasks, purges } = self.select(names)?;
        let mut store = self.config.open_store();
        let report = Cleaner::new(&self.registry, &self.graph)
            .dry_run(dry_run)
            .clean_selection(&tasks, &purges, &mut store)?;
        if !dry_run {
            store.save()?;
        }
        Ok(report)
    }

    /// Drops stored signatures for `names` (every task when empty) and
    /// returns how many records were removed.
    pub fn forget<S: AsRef<str>>(&self, names: &[S]) -> Result<usize, Error> {
        let selection = self.tasks_only(names, "forget")?;
        let mut store = self.config.open_store();
        let removed = if names.is_empty() {
            store.forget_all()
        } else {
            selection
                .tasks
                .iter()
                .filter(|name| store.forget(name))
                .count()
        };
        store.save()?;
        Ok(removed)
    }

    fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Selection, Error> {
        let selection = self.registry.select(names)?;
        if !names.is_empty() && selection.tasks.is_empty() && selection.purges.is_empty() {
            return Err(Error::Usage(format!(
                "Nothing selected: {} has no tasks.",
                names
                    .iter()
                    .map(|name| format!("'{}'", name.as_ref()))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        Ok(selection)
    }

    fn tasks_only<S: AsRef<str>>(&self, names: &[S], command: &str) -> Result<Selection, Error> {
        let selection = self.select(names)?;
        if let Some(purge) = selection.purges.first() {
            return Err(Error::Usage(format!(
                "'{}' is a purge; use `rhake clean {}` instead of `{}`.",
                purge, purge, command
            )));
        }
        Ok(selection)
    }
}
