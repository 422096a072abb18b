//! Runs commands with `std::process`, through `sh -c` for shell lines.

use std::io::{self, Read};
use std::process::{Child, Command as Process, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{CommandOutput, CommandRunner, CommandStatus, Invocation, RunControl};
use crate::logger::{debug, trace};
use crate::task::Command;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct SystemRunner {
    shell: Vec<String>,
}

impl Default for SystemRunner {
    fn default() -> Self {
        let shell = if cfg!(windows) {
            vec!["cmd".to_string(), "/C".to_string()]
        } else {
            vec!["sh".to_string(), "-c".to_string()]
        };
        Self { shell }
    }
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn build(&self, invocation: &Invocation<'_>) -> io::Result<Process> {
        let mut process = match invocation.command {
            Command::Shell(line) => {
                let mut process = Process::new(&self.shell[0]);
                process.args(&self.shell[1..]).arg(line);
                process
            }
            Command::Argv(args) => {
                let (program, rest) = args.split_first().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "empty argument vector")
                })?;
                let mut process = Process::new(program);
                process.args(rest);
                process
            }
        };
        if let Some(dir) = invocation.working_dir {
            process.current_dir(dir);
        }
        process
            .envs(invocation.env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Ok(process)
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation<'_>, control: &RunControl) -> io::Result<CommandOutput> {
        debug!("spawn: {}", invocation.command);
        let mut child = self.build(invocation)?.spawn()?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = wait(&mut child, control)?;
        trace!("{} -> {:?}", invocation.command, status);

        // A killed shell may leave grandchildren holding the pipes open, so
        // output is only collected from processes that exited on their own.
        let (stdout, stderr) = match status {
            CommandStatus::Exited(_) => (collect(stdout), collect(stderr)),
            CommandStatus::TimedOut | CommandStatus::Cancelled => (String::new(), String::new()),
        };
        Ok(CommandOutput {
            status,
            stdout,
            stderr,
        })
    }
}

fn wait(child: &mut Child, control: &RunControl) -> io::Result<CommandStatus> {
    let deadline = control.timeout.map(|timeout| Instant::now() + timeout);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(CommandStatus::Exited(status.code().unwrap_or(-1)));
        }
        if control.cancel.is_cancelled() {
            kill(child);
            return Ok(CommandStatus::Cancelled);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            kill(child);
            return Ok(CommandStatus::TimedOut);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn kill(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!("kill failed: {}", err);
    }
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runner::CancelToken;
    use indexmap::IndexMap;
    use tempfile::tempdir;

    fn run(command: &Command, control: &RunControl) -> CommandOutput {
        let env = IndexMap::new();
        let invocation = Invocation {
            command,
            working_dir: None,
            env: &env,
        };
        SystemRunner::new()
            .run(&invocation, control)
            .expect("spawn")
    }

    #[test]
    fn runs_shell_line_and_captures_output() {
        let output = run(&Command::shell("echo hello"), &RunControl::default());
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
        assert!(output.stderr.is_empty());
    }

    #[test]
    fn captures_exit_code() {
        let output = run(&Command::shell("exit 42"), &RunControl::default());
        assert_eq!(output.status, CommandStatus::Exited(42));
    }

    #[test]
    fn runs_argument_vector_in_working_dir_with_env() {
        let temp = tempdir().expect("temp dir");
        let mut env = IndexMap::new();
        env.insert("RHAKE_TEST_VALUE".to_string(), "from-env".to_string());
        let command = Command::argv(["sh", "-c", "pwd; echo $RHAKE_TEST_VALUE"]);
        let invocation = Invocation {
            command: &command,
            working_dir: Some(temp.path()),
            env: &env,
        };
        let output = SystemRunner::new()
            .run(&invocation, &RunControl::default())
            .expect("spawn");
        let canonical = temp.path().canonicalize().expect("canonical");
        assert!(output.stdout.contains(canonical.to_str().expect("utf8")));
        assert!(output.stdout.contains("from-env"));
    }

    #[test]
    fn timeout_kills_the_process() {
        let control = RunControl {
            timeout: Some(Duration::from_millis(100)),
            cancel: CancelToken::new(),
        };
        let started = Instant::now();
        let output = run(&Command::argv(["sleep", "5"]), &control);
        assert_eq!(output.status, CommandStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn cancelled_token_stops_the_process() {
        let control = RunControl::default();
        control.cancel.cancel();
        let output = run(&Command::argv(["sleep", "5"]), &control);
        assert_eq!(output.status, CommandStatus::Cancelled);
    }

    #[test]
    fn cancel_kills_running_process() {
        let control = RunControl::default();
        let cancel = control.cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            cancel.cancel();
        });
        let started = Instant::now();
        let output = run(&Command::argv(["sleep", "5"]), &control);
        canceller.join().expect("canceller thread");
        assert_eq!(output.status, CommandStatus::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn empty_argv_is_an_error() {
        let env = IndexMap::new();
        let command = Command::Argv(Vec::new());
        let invocation = Invocation {
            command: &command,
            working_dir: None,
            env: &env,
        };
        assert!(SystemRunner::new()
            .run(&invocation, &RunControl::default())
            .is_err());
    }

    #[test]
    fn locate_finds_sh_but_not_nonsense() {
        let runner = SystemRunner::new();
        assert!(runner.locate("sh", None));
        assert!(!runner.locate("definitely-not-a-real-program-rhake", None));
    }

    #[test]
    fn relative_programs_are_located_from_working_dir() {
        let temp = tempdir().expect("temp dir");
        let tools = temp.path().join("tools");
        std::fs::create_dir(&tools).expect("tools dir");
        std::fs::write(tools.join("gen.sh"), "#!/bin/sh\n").expect("script");

        let runner = SystemRunner::new();
        assert!(runner.locate("./gen.sh", Some(&tools)));
        assert!(!runner.locate("./gen.sh", Some(temp.path())));
    }
}
