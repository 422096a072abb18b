//! Ready-queue bookkeeping shared by the worker threads.
//!
//! Recording an outcome and releasing the dependents it unblocks happen under
//! the same lock, so a task never becomes ready before its last upstream
//! outcome is visible.

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};

use super::report::{FailureReason, RunReport, RunStatus, TaskOutcome};
use crate::graph::DependencyGraph;

#[derive(Debug)]
pub(crate) struct Schedule {
    outcomes: IndexMap<String, TaskOutcome>,
    /// unfinished upstream count per waiting task
    pending: HashMap<String, usize>,
    ready: VecDeque<String>,
    running: usize,
    executed: HashSet<String>,
    started: Vec<String>,
    status: RunStatus,
}

impl Schedule {
    /// `plan` must be closed under dependencies and topologically ordered.
    pub(crate) fn new(plan: &[String], graph: &DependencyGraph) -> Self {
        let in_plan: HashSet<&str> = plan.iter().map(String::as_str).collect();
        let mut pending = HashMap::new();
        let mut ready = VecDeque::new();
        for task in plan {
            let count = graph
                .dependencies(task)
                .filter(|dep| in_plan.contains(dep))
                .count();
            if count == 0 {
                ready.push_back(task.clone());
            } else {
                pending.insert(task.clone(), count);
            }
        }
        Self {
            outcomes: plan
                .iter()
                .map(|task| (task.clone(), TaskOutcome::NotEvaluated))
                .collect(),
            pending,
            ready,
            running: 0,
            executed: HashSet::new(),
            started: Vec::new(),
            status: RunStatus::Success,
        }
    }

    /// Takes the next ready task, if the run is still going.
    pub(crate) fn take_ready(&mut self) -> Option<String> {
        if self.status != RunStatus::Success {
            return None;
        }
        let task = self.ready.pop_front()?;
        self.running += 1;
        self.started.push(task.clone());
        Some(task)
    }

    /// True once no more work can be handed out and nothing is in flight.
    pub(crate) fn is_finished(&self) -> bool {
        self.running == 0 && (self.ready.is_empty() || self.status != RunStatus::Success)
    }

    pub(crate) fn executed(&self) -> &HashSet<String> {
        &self.executed
    }

    pub(crate) fn cancel(&mut self) {
        if self.status == RunStatus::Success {
            self.status = RunStatus::Cancelled;
        }
    }

    /// Records `outcome` for `task` and moves newly unblocked dependents to
    /// the ready queue.
    pub(crate) fn complete(&mut self, task: &str, outcome: TaskOutcome, graph: &DependencyGraph) {
        self.running = self.running.saturating_sub(1);
        match &outcome {
            TaskOutcome::Succeeded(_) => {
                self.executed.insert(task.to_string());
            }
            TaskOutcome::Failed(FailureReason::Cancelled { .. }) => self.cancel(),
            TaskOutcome::Failed(_) => {
                if self.status == RunStatus::Success {
                    self.status = RunStatus::Failed;
                }
            }
            _ => {}
        }
        let released = matches!(outcome, TaskOutcome::Succeeded(_) | TaskOutcome::UpToDate);
        if let Some(slot) = self.outcomes.get_mut(task) {
            *slot = outcome;
        }
        if !released {
            return;
        }

        for dependent in graph.dependents(task) {
            let Some(count) = self.pending.get_mut(dependent) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                self.pending.remove(dependent);
                self.ready.push_back(dependent.to_string());
            }
        }
    }

    pub(crate) fn into_report(self) -> RunReport {
        let outcomes = self
            .outcomes
            .into_iter()
            .map(|(task, outcome)| match outcome {
                TaskOutcome::NotEvaluated => (task, TaskOutcome::NotAttempted),
                other => (task, other),
            })
            .collect();
        RunReport {
            status: self.status,
            outcomes,
            started: self.started,
        }
    }
}
