use indexmap::IndexMap;
use std::fmt;
use std::path::{Path, PathBuf};

use super::util::normalize_path;

/// Shell words that resolve inside `sh` itself rather than on `PATH`.
const SHELL_BUILTINS: &[&str] = &[
    ":", ".", "[", "alias", "break", "case", "cd", "command", "continue", "echo", "eval", "exec",
    "exit", "export", "false", "for", "if", "printf", "pwd", "read", "return", "set", "shift",
    "source", "test", "trap", "true", "type", "ulimit", "umask", "unset", "wait", "while", "{",
    "(",
];

/// An external command, either a shell line or an argument vector.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Shell(String),
    Argv(Vec<String>),
}

impl Command {
    pub fn shell(line: impl Into<String>) -> Self {
        Command::Shell(line.into())
    }

    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command::Argv(args.into_iter().map(Into::into).collect())
    }

    /// The executable this command needs on the host, if it can be told
    /// without running a shell.
    pub fn program(&self) -> Option<&str> {
        match self {
            Command::Argv(args) => args.first().map(String::as_str),
            Command::Shell(line) => {
                let first = line.split_whitespace().next()?;
                if first.contains('=') || SHELL_BUILTINS.contains(&first) {
                    None
                } else {
                    Some(first)
                }
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Shell(line) => f.write_str(line),
            Command::Argv(args) => {
                let quoted: Vec<String> = args
                    .iter()
                    .map(|arg| {
                        if arg.is_empty() || arg.contains(char::is_whitespace) {
                            format!("'{}'", arg)
                        } else {
                            arg.clone()
                        }
                    })
                    .collect();
                f.write_str(&quoted.join(" "))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Action {
    pub command: Command,
    /// Advisory actions are informational: their exit status is ignored.
    pub advisory: bool,
}

impl Action {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            advisory: false,
        }
    }

    pub fn advisory(command: Command) -> Self {
        Self {
            command,
            advisory: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Silent,
    #[default]
    OnFailure,
    Always,
}

impl Verbosity {
    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            0 => Some(Verbosity::Silent),
            1 => Some(Verbosity::OnFailure),
            2 => Some(Verbosity::Always),
            _ => None,
        }
    }
}

/// Immutable declaration of one unit of work.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    pub description: Option<String>,
    pub actions: Vec<Action>,
    pub file_deps: Vec<PathBuf>,
    pub targets: Vec<PathBuf>,
    pub cleanable: bool,
    pub verbosity: Verbosity,
    pub working_dir: Option<PathBuf>,
    pub env: IndexMap<String, String>,
    /// Base name of the family this task was generated by.
    pub family: Option<String>,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn action(mut self, command: Command) -> Self {
        self.actions.push(Action::new(command));
        self
    }

    pub fn report(mut self, command: Command) -> Self {
        self.actions.push(Action::advisory(command));
        self
    }

    pub fn file_dep(mut self, path: impl AsRef<Path>) -> Self {
        self.add_file_dep(path.as_ref());
        self
    }

    pub fn target(mut self, path: impl AsRef<Path>) -> Self {
        self.add_target(path.as_ref());
        self
    }

    pub fn cleanable(mut self, cleanable: bool) -> Self {
        self.cleanable = cleanable;
        self
    }

    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub(crate) fn add_file_dep(&mut self, path: &Path) {
        let path = normalize_path(path);
        if !self.file_deps.contains(&path) {
            self.file_deps.push(path);
        }
    }

    pub(crate) fn add_target(&mut self, path: &Path) {
        let path = normalize_path(path);
        if !self.targets.contains(&path) {
            self.targets.push(path);
        }
    }

    /// The part of the name after the family base, if any.
    pub fn variant(&self) -> Option<&str> {
        self.name.split_once(':').map(|(_, variant)| variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_of_argv_is_first_word() {
        let cmd = Command::argv(["openssl", "ec", "-pubout"]);
        assert_eq!(cmd.program(), Some("openssl"));
    }

    #[test]
    fn program_skips_shell_builtins_and_assignments() {
        assert_eq!(Command::shell("exit 3").program(), None);
        assert_eq!(Command::shell("FOO=1 make").program(), None);
        assert_eq!(Command::shell("  zig build").program(), Some("zig"));
        assert_eq!(Command::shell("").program(), None);
    }

    #[test]
    fn argv_display_quotes_whitespace() {
        let cmd = Command::argv(["cp", "my file", "out"]);
        assert_eq!(cmd.to_string(), "cp 'my file' out");
    }

    #[test]
    fn builder_dedups_paths() {
        let task = Task::new("sign")
            .file_dep("keys/pub.pem")
            .file_dep("keys/./pub.pem")
            .target("signed/fw.bin");
        assert_eq!(task.file_deps, vec![PathBuf::from("keys/pub.pem")]);
        assert_eq!(task.targets.len(), 1);
    }

    #[test]
    fn variant_is_suffix_after_colon() {
        assert_eq!(Task::new("sign:mqtt").variant(), Some("mqtt"));
        assert_eq!(Task::new("sign").variant(), None);
    }
}
