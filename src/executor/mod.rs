//! Runs a selection of tasks in dependency order.
//!
//! Tasks are handed out from a ready queue: a task becomes ready when every
//! upstream task in the plan has finished as executed or up to date. With one
//! job the caller's thread works the queue; with more, scoped worker threads
//! share it. The first failure stops new tasks from starting; tasks already
//! in flight finish and keep their outcome.

mod report;
mod schedule;

pub use report::{FailureReason, RunReport, RunStatus, TaskOutcome};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::error::Error;
use crate::graph::DependencyGraph;
use crate::logger::{debug, error, info, warn};
use crate::printer;
use crate::runner::{CancelToken, CommandRunner, CommandStatus, Invocation, RunControl};
use crate::signature::{SignatureStore, TaskRecord};
use crate::staleness::{self, Staleness};
use crate::task::{Action, Task, TaskRegistry};
use schedule::Schedule;

const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Worker count; `0` and `1` both mean sequential.
    pub jobs: usize,
    /// Per-command limit.
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            timeout: None,
            cancel: CancelToken::new(),
        }
    }
}

/// What `run` would do with one task, as reported by `plan`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTask {
    pub name: String,
    pub staleness: Staleness,
}

pub struct Executor<'a> {
    registry: &'a TaskRegistry,
    graph: &'a DependencyGraph,
    runner: &'a dyn CommandRunner,
    options: RunOptions,
    /// Where actions of tasks without `dir()` run.
    default_dir: Option<PathBuf>,
}

struct Shared<'s> {
    schedule: Mutex<Schedule>,
    wake: Condvar,
    store: Mutex<&'s mut SignatureStore>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<'a> Executor<'a> {
    pub fn new(
        registry: &'a TaskRegistry,
        graph: &'a DependencyGraph,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            registry,
            graph,
            runner,
            options: RunOptions::default(),
            default_dir: None,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Runs actions of tasks that set no `dir()` from `dir`, normally the
    /// project root. Without it they inherit the process directory.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_dir = Some(dir.into());
        self
    }

    /// The tasks `run` would consider, in order, with their current
    /// staleness. A task fed by a stale upstream task is reported stale,
    /// since running would rebuild its input.
    pub fn plan<S: AsRef<str>>(
        &self,
        selection: &[S],
        store: &SignatureStore,
    ) -> Result<Vec<PlannedTask>, Error> {
        let order = self.order(selection)?;
        let mut stale_upstream = HashSet::new();
        let mut planned = Vec::with_capacity(order.len());
        for name in order {
            let task = self.task(&name)?;
            let staleness =
                staleness::evaluate(task, self.registry, store.record(&name), &stale_upstream);
            if staleness.is_stale() {
                stale_upstream.insert(name.clone());
            }
            planned.push(PlannedTask { name, staleness });
        }
        Ok(planned)
    }

    /// Runs `selection` (every task when empty) plus everything it depends
    /// on. Signature records are updated in `store` as tasks finish; saving
    /// it is up to the caller.
    ///
    /// A failed run still returns `Ok`; inspect `RunReport::status`.
    pub fn run<S: AsRef<str>>(
        &self,
        selection: &[S],
        store: &mut SignatureStore,
    ) -> Result<RunReport, Error> {
        let order = self.order(selection)?;
        info!("running {} task(s) with {} job(s)", order.len(), self.jobs());
        let shared = Shared {
            schedule: Mutex::new(Schedule::new(&order, self.graph)),
            wake: Condvar::new(),
            store: Mutex::new(store),
        };

        let workers = self.jobs().min(order.len().max(1));
        if workers <= 1 {
            self.work(&shared);
        } else {
            thread::scope(|scope| {
                for _ in 0..workers {
                    scope.spawn(|| self.work(&shared));
                }
            });
        }

        let report = shared
            .schedule
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_report();
        debug!("run finished: {:?}", report.status);
        Ok(report)
    }

    fn jobs(&self) -> usize {
        self.options.jobs.max(1)
    }

    fn order<S: AsRef<str>>(&self, selection: &[S]) -> Result<Vec<String>, Error> {
        if let Some(unknown) = selection
            .iter()
            .map(AsRef::as_ref)
            .find(|name| !self.graph.contains(name))
        {
            return Err(Error::UnknownTask(unknown.to_string()));
        }
        Ok(self.graph.execution_order(selection))
    }

    fn task(&self, name: &str) -> Result<&'a Task, Error> {
        self.registry
            .lookup(name)
            .ok_or_else(|| Error::UnknownTask(name.to_string()))
    }

    fn work(&self, shared: &Shared<'_>) {
        loop {
            let Some(name) = self.next_task(shared) else {
                return;
            };
            let outcome = self.process(&name, shared);
            let mut schedule = lock(&shared.schedule);
            schedule.complete(&name, outcome, self.graph);
            shared.wake.notify_all();
        }
    }

    /// Blocks until a task is ready or the run is over.
    fn next_task(&self, shared: &Shared<'_>) -> Option<String> {
        let mut schedule = lock(&shared.schedule);
        loop {
            if self.options.cancel.is_cancelled() {
                schedule.cancel();
                shared.wake.notify_all();
            }
            if let Some(task) = schedule.take_ready() {
                return Some(task);
            }
            if schedule.is_finished() {
                return None;
            }
            schedule = shared
                .wake
                .wait_timeout(schedule, CANCEL_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn process(&self, name: &str, shared: &Shared<'_>) -> TaskOutcome {
        let Some(task) = self.registry.lookup(name) else {
            error!("task '{}' vanished from the registry", name);
            return TaskOutcome::NotAttempted;
        };

        // Every upstream task is complete here, so a snapshot is enough.
        let executed = lock(&shared.schedule).executed().clone();
        let record = lock(&shared.store).record(name).cloned();
        let reason = match staleness::evaluate(task, self.registry, record.as_ref(), &executed) {
            Staleness::UpToDate => {
                debug!("'{}' is up to date, skipping", name);
                printer::task_up_to_date(name);
                return TaskOutcome::UpToDate;
            }
            Staleness::Stale(reason) => reason,
        };

        info!("executing '{}' ({})", name, reason);
        printer::task_started(name);
        match self.execute(task) {
            Ok(()) => {
                lock(&shared.store).update(name, TaskRecord::capture(task));
                TaskOutcome::Succeeded(reason)
            }
            Err(failure) => {
                error!("task '{}' failed: {}", name, failure);
                lock(&shared.store).forget(name);
                TaskOutcome::Failed(failure)
            }
        }
    }

    fn execute(&self, task: &Task) -> Result<(), FailureReason> {
        let control = RunControl {
            timeout: self.options.timeout,
            cancel: self.options.cancel.clone(),
        };
        for action in &task.actions {
            match self.execute_action(task, action, &control) {
                Ok(()) => {}
                Err(FailureReason::Cancelled { action }) => {
                    return Err(FailureReason::Cancelled { action })
                }
                Err(failure) if action.advisory => {
                    warn!("'{}': advisory action ignored: {}", task.name, failure);
                }
                Err(failure) => return Err(failure),
            }
        }
        Ok(())
    }

    fn execute_action(
        &self,
        task: &Task,
        action: &Action,
        control: &RunControl,
    ) -> Result<(), FailureReason> {
        let command = &action.command;
        let label = command.to_string();
        let working_dir = task.working_dir.as_deref().or(self.default_dir.as_deref());
        if let Some(program) = command.program() {
            if !self.runner.locate(program, working_dir) {
                return Err(FailureReason::MissingCollaborator {
                    program: program.to_string(),
                });
            }
        }

        debug!("'{}': {}", task.name, label);
        let invocation = Invocation {
            command,
            working_dir,
            env: &task.env,
        };
        let output = self
            .runner
            .run(&invocation, control)
            .map_err(|err| FailureReason::Spawn {
                action: label.clone(),
                message: err.to_string(),
            })?;

        printer::command_output(task, action, &output);
        match output.status {
            CommandStatus::Exited(0) => Ok(()),
            CommandStatus::Exited(code) => Err(FailureReason::ExitCode {
                action: label,
                code,
            }),
            CommandStatus::TimedOut => Err(FailureReason::Timeout { action: label }),
            CommandStatus::Cancelled => Err(FailureReason::Cancelled { action: label }),
        }
    }
}
