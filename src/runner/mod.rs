//! The narrow capability the executor uses to run external commands.

mod system;

pub use system::SystemRunner;

use indexmap::IndexMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::task::Command;

/// One command to run, with the task's working directory and environment
/// overrides. Anything not overridden is inherited.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub command: &'a Command,
    pub working_dir: Option<&'a Path>,
    pub env: &'a IndexMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Exit code; `-1` when the process was killed by a signal.
    Exited(i32),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == CommandStatus::Exited(0)
    }
}

/// Shared flag a caller flips to stop a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
}

/// Executes external commands.
///
/// The engine never spawns processes itself, so tests can substitute a fake.
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion, or until the timeout or cancellation
    /// in `control` stops it.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    fn run(&self, invocation: &Invocation<'_>, control: &RunControl) -> io::Result<CommandOutput>;

    /// Whether `program` can be found on this host. Programs given as a
    /// relative path are looked up from `working_dir`, where they will run.
    fn locate(&self, program: &str, working_dir: Option<&Path>) -> bool {
        if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
            match working_dir {
                Some(dir) => dir.join(program).exists(),
                None => Path::new(program).exists(),
            }
        } else {
            which::which(program).is_ok()
        }
    }
}
