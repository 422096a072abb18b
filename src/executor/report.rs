use indexmap::IndexMap;
use std::fmt;

use crate::error::{EnvironmentError, Error, ExecutionError};
use crate::staleness::StaleReason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    ExitCode { action: String, code: i32 },
    Timeout { action: String },
    Cancelled { action: String },
    Spawn { action: String, message: String },
    MissingCollaborator { program: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ExitCode { action, code } => {
                write!(f, "`{}` exited with code {}", action, code)
            }
            FailureReason::Timeout { action } => write!(f, "`{}` timed out", action),
            FailureReason::Cancelled { action } => write!(f, "`{}` was cancelled", action),
            FailureReason::Spawn { action, message } => {
                write!(f, "`{}` could not start: {}", action, message)
            }
            FailureReason::MissingCollaborator { program } => {
                write!(f, "'{}' was not found on PATH", program)
            }
        }
    }
}

/// Per-task outcome of one run invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    NotEvaluated,
    UpToDate,
    Succeeded(StaleReason),
    Failed(FailureReason),
    /// Left alone because the run stopped first; distinct from up to date.
    NotAttempted,
}

impl TaskOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::NotEvaluated => "not evaluated",
            TaskOutcome::UpToDate => "up to date",
            TaskOutcome::Succeeded(_) => "executed",
            TaskOutcome::Failed(_) => "failed",
            TaskOutcome::NotAttempted => "not attempted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
    Cancelled,
}

/// The execution record of a run: outcomes in planned order, plus the order
/// in which tasks were actually picked up.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub(crate) outcomes: IndexMap<String, TaskOutcome>,
    pub(crate) started: Vec<String>,
}

impl RunReport {
    pub fn outcome(&self, task: &str) -> Option<&TaskOutcome> {
        self.outcomes.get(task)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (&str, &TaskOutcome)> {
        self.outcomes.iter().map(|(name, outcome)| (name.as_str(), outcome))
    }

    /// Tasks in the order they were evaluated.
    pub fn started(&self) -> &[String] {
        &self.started
    }

    /// Tasks whose actions ran successfully, in start order.
    pub fn executed(&self) -> Vec<&str> {
        self.started
            .iter()
            .filter(|name| matches!(self.outcomes.get(*name), Some(TaskOutcome::Succeeded(_))))
            .map(String::as_str)
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.outcomes.values().filter(|outcome| pred(outcome)).count()
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// The error a failed run should surface, if any.
    pub fn error(&self) -> Option<Error> {
        if self.status == RunStatus::Cancelled {
            return Some(ExecutionError::Cancelled.into());
        }
        self.outcomes.iter().find_map(|(task, outcome)| {
            let TaskOutcome::Failed(reason) = outcome else {
                return None;
            };
            let task = task.clone();
            Some(match reason.clone() {
                FailureReason::ExitCode { action, code } => {
                    ExecutionError::TaskFailed { task, action, code }.into()
                }
                FailureReason::Timeout { action } => ExecutionError::Timeout { task, action }.into(),
                FailureReason::Cancelled { .. } => ExecutionError::Cancelled.into(),
                FailureReason::Spawn { action, message } => ExecutionError::Spawn {
                    task,
                    action,
                    message,
                }
                .into(),
                FailureReason::MissingCollaborator { program } => {
                    EnvironmentError::MissingCollaborator { task, program }.into()
                }
            })
        })
    }

    pub fn into_result(self) -> Result<RunReport, Error> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}
