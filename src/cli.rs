use clap::{ArgAction, Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "rhake",
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    long_about = None
)]
pub struct Cli {
    /// Path to the Rhai script file (defaults to searching for rhakefile.rhai)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub file: Option<String>,

    /// Where task signatures are stored (defaults to .rhake-state.json next to the script)
    #[arg(long, value_name = "PATH", global = true)]
    pub state_file: Option<PathBuf>,

    /// Do not read or write the signature store
    #[arg(long, global = true, conflicts_with = "state_file")]
    pub no_state: bool,

    /// Number of tasks to run in parallel (0 = one per CPU)
    #[arg(short, long, value_name = "N", default_value_t = 1, global = true)]
    pub jobs: usize,

    /// Kill any single command that runs longer than this many seconds
    #[arg(long, value_name = "SECONDS", global = true)]
    pub timeout: Option<u64>,

    /// Set a variable readable from the script with get_var()
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var, global = true)]
    pub vars: Vec<(String, String)>,

    /// More log output (-v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub cmd: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run tasks and everything they depend on (default: all tasks)
    Run(TaskSelection),
    /// Remove targets of cleanable tasks and their dependents; purges run only when named
    Clean(CleanOptions),
    /// Show the task list (`rhake list -h` for details)
    List(ListOptions),
    /// Show which tasks are stale without running anything
    Status(TaskSelection),
    /// Drop stored signatures so tasks run again (default: all tasks)
    Forget(TaskSelection),
    /// Print a shell completion script
    Completions(CompletionsOptions),
    /// Print task names for shell completion
    #[command(hide = true)]
    CompleteTasks(CompleteTasksOptions),
    /// Run tasks directly (shorthand for `rhake run <task>...`)
    #[command(external_subcommand)]
    Direct(Vec<String>),
}

#[derive(Args, Debug, Default)]
pub struct TaskSelection {
    /// Task, family or variant names
    #[arg(name = "TASK")]
    pub tasks: Vec<String>,
}

#[derive(Args, Debug)]
pub struct CleanOptions {
    /// Task, family, variant or purge names
    #[arg(name = "TASK")]
    pub tasks: Vec<String>,

    /// Only report what would be removed
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct ListOptions {
    /// Family to display (omit to show every task)
    #[arg(name = "FAMILY")]
    pub family: Option<String>,

    /// Print tasks as flat full names (good for piping into fzf)
    #[arg(short = 'F', long = "flat")]
    pub flat: bool,
}

#[derive(Args, Debug)]
pub struct CompletionsOptions {
    #[arg(value_enum)]
    pub shell: Shell,
}

#[derive(Args, Debug)]
pub struct CompleteTasksOptions {
    pub prefix: Option<String>,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("variable name missing in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}
