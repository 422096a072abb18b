#![doc = include_str!("../README.md")]

pub mod clean;
pub mod cli;
pub mod completions;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod firmware;
pub mod graph;
pub mod logger;
pub mod printer;
pub mod runner;
pub mod signature;
pub mod staleness;
pub mod task;
pub mod workspace;

pub use completions::print as print_shell_completions;
pub use config::PipelineConfig;
pub use error::Error;
pub use workspace::Workspace;

use clap::Parser;
use cli::{Cli, Commands};
use logger::*;
use std::io::{self, Write};
use task::{ListRenderMode, TaskRegistry};

pub fn run() -> Result<(), Error> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

pub fn run_with_cli(cli: Cli) -> Result<(), Error> {
    logger::init(cli.verbose);
    info!("start");
    debug!("cli args: {:?}", cli);

    if let Some(Commands::Completions(opts)) = &cli.cmd {
        print_shell_completions(opts.shell);
        info!("{} end", env!("CARGO_PKG_NAME"));
        return Ok(());
    }

    let config = PipelineConfig::from_cli(&cli)?;
    let workspace = Workspace::load(config)?;
    dispatcher(cli.cmd, &workspace)?;
    info!("{} end", env!("CARGO_PKG_NAME"));
    Ok(())
}

fn dispatcher(cmd: Option<Commands>, workspace: &Workspace) -> Result<(), Error> {
    debug!("dispatching command: {:?}", cmd);
    match cmd {
        Some(Commands::List(opts)) => {
            info!(
                "Listing tasks: family={:?}, flat={}",
                opts.family, opts.flat
            );
            let mode = if opts.flat {
                ListRenderMode::Flat
            } else {
                ListRenderMode::Tree
            };
            workspace.registry().list(opts.family.as_deref(), mode);
            Ok(())
        }
        Some(Commands::Run(opts)) => run_with_logging(workspace, &opts.tasks),
        Some(Commands::Clean(opts)) => {
            info!("Cleaning {:?} (dry run: {})", opts.tasks, opts.dry_run);
            let report = workspace.clean(&opts.tasks, opts.dry_run)?;
            printer::clean_report(&report, opts.dry_run);
            report.into_result().map(|_| ())
        }
        Some(Commands::Status(opts)) => {
            let planned = workspace.status(&opts.tasks)?;
            printer::status(&planned);
            Ok(())
        }
        Some(Commands::Forget(opts)) => {
            let removed = workspace.forget(&opts.tasks)?;
            printer::info(format!("Forgot {} task record(s).", removed));
            Ok(())
        }
        Some(Commands::CompleteTasks(opts)) => {
            print_task_candidates(workspace.registry(), opts.prefix.as_deref().unwrap_or_default());
            Ok(())
        }
        Some(Commands::Completions(opts)) => {
            print_shell_completions(opts.shell);
            Ok(())
        }
        Some(Commands::Direct(raw)) => {
            if raw.is_empty() {
                warn!("Direct command invoked without a task name");
                return Err(missing_task_name_error());
            }
            run_with_logging(workspace, &raw)
        }
        None => {
            if let Some(task) = workspace.registry().default_task() {
                run_with_logging(workspace, &[task])
            } else {
                info!("Listing tasks: family=None, flat=false");
                workspace.registry().list(None, ListRenderMode::Tree);
                Ok(())
            }
        }
    }
}

fn run_with_logging(workspace: &Workspace, tasks: &[String]) -> Result<(), Error> {
    info!("Executing tasks {:?}", tasks);
    let report = workspace.run(tasks)?;
    printer::run_summary(&report);
    report.into_result().map(|_| ()).map_err(|err| {
        error!("failed to execute tasks: {}", err);
        err
    })
}

fn missing_task_name_error() -> Error {
    Error::Usage("Task name is required when omitting the 'run' subcommand.".to_string())
}

fn print_task_candidates(registry: &TaskRegistry, prefix: &str) {
    let mut entries: Vec<String> = registry
        .tasks_iter()
        .map(|(name, _)| name.clone())
        .chain(registry.families_iter().map(|(name, _)| name.clone()))
        .chain(registry.purges_iter().map(|(name, _)| name.clone()))
        .collect();

    entries.sort();
    entries.dedup();

    let mut stdout = io::BufWriter::new(io::stdout());
    for name in entries.into_iter().filter(|name| name.starts_with(prefix)) {
        let _ = writeln!(stdout, "{name}");
    }
    let _ = stdout.flush();
}
