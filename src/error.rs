use rhai::EvalAltResult;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Problems with the declared task set. Detected before anything runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Task '{0}' is already defined.")]
    DuplicateTaskName(String),

    #[error("Target '{}' of task '{new}' is already produced by task '{existing}'.", path.display())]
    ConflictingTargets {
        path: PathBuf,
        existing: String,
        new: String,
    },

    #[error("Dependency cycle detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("{0} name cannot be empty.")]
    EmptyName(&'static str),

    #[error("{0}")]
    Invalid(String),
}

/// Why a run stopped before every selected task finished.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Task '{task}' failed: `{action}` exited with code {code}.")]
    TaskFailed {
        task: String,
        action: String,
        code: i32,
    },

    #[error("Task '{task}' timed out running `{action}`.")]
    Timeout { task: String, action: String },

    #[error("Task '{task}' could not start `{action}`: {message}")]
    Spawn {
        task: String,
        action: String,
        message: String,
    },

    #[error("Run cancelled.")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("Task '{task}' requires '{program}', which was not found on PATH.")]
    MissingCollaborator { task: String, program: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("signature store '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("signature store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Crate-level error returned by the CLI entry points.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Script(Box<EvalAltResult>),

    #[error("Task '{0}' does not exist.")]
    UnknownTask(String),

    #[error("Task '{name}' matches multiple candidates: {}", candidates.join(", "))]
    AmbiguousTask {
        name: String,
        candidates: Vec<String>,
    },

    #[error("{0}")]
    Usage(String),

    #[error("clean left {0} path(s) behind")]
    CleanIncomplete(usize),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<Box<EvalAltResult>> for Error {
    fn from(err: Box<EvalAltResult>) -> Self {
        Error::Script(err)
    }
}

impl Error {
    /// Process exit code reported by the `rhake` binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(ConfigError::ConflictingTargets { .. }) => 3,
            Error::Config(ConfigError::CycleDetected { .. }) => 4,
            Error::Config(_) => 2,
            Error::Execution(ExecutionError::Cancelled) => 7,
            Error::Execution(_) => 5,
            Error::Environment(_) => 6,
            Error::UnknownTask(_) | Error::AmbiguousTask { .. } => 8,
            Error::Store(_)
            | Error::Script(_)
            | Error::Usage(_)
            | Error::CleanIncomplete(_)
            | Error::Io(_) => 1,
        }
    }
}
