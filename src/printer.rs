use std::collections::HashMap;
use std::io::{self, IsTerminal, Write};
use std::sync::OnceLock;

use crate::clean::CleanReport;
use crate::executor::{PlannedTask, RunReport, TaskOutcome};
use crate::runner::CommandOutput;
use crate::staleness::Staleness;
use crate::task::{
    Action, ListItemKind, ListMessageLevel, ListOutput, ListRenderMode, Task, Verbosity,
};

const RESET: &str = "\x1b[0m";
const FG_CYAN: &str = "\x1b[36m";
const FG_GREEN: &str = "\x1b[32m";
const FG_RED: &str = "\x1b[31m";
const FG_YELLOW: &str = "\x1b[33m";
const FG_BRIGHT_BLACK: &str = "\x1b[90m";
const FG_WHITE: &str = "\x1b[97m";
const BG_FAMILY: &str = "\x1b[48;5;24m";
const FG_FAMILY_DESC: &str = "\x1b[97m";
const ERASE_TO_END: &str = "\x1b[K";

pub fn info(message: impl AsRef<str>) {
    write_line(io::stdout(), message.as_ref());
}

pub fn warn(message: impl AsRef<str>) {
    write_line(io::stderr(), message.as_ref());
}

pub fn error(message: impl AsRef<str>) {
    write_line(io::stderr(), message.as_ref());
}

fn write_line(mut target: impl Write, message: &str) {
    let _ = writeln!(target, "{}", message);
}

fn paint(color: &str, text: &str) -> String {
    if colors_enabled() {
        format!("{color}{text}{RESET}")
    } else {
        text.to_string()
    }
}

pub fn print_list(output: &ListOutput, mode: ListRenderMode) {
    for message in &output.messages {
        match message.level {
            ListMessageLevel::Info => info(&message.text),
            ListMessageLevel::Warn => warn(&message.text),
        }
    }

    let use_color = colors_enabled();
    match mode {
        ListRenderMode::Tree => print_tree(output, use_color),
        ListRenderMode::Flat => print_flat(output, use_color),
    }
}

fn print_tree(output: &ListOutput, use_color: bool) {
    let mut width_per_depth: HashMap<usize, usize> = HashMap::new();
    for item in &output.items {
        let name_width = item.name.chars().count();
        width_per_depth
            .entry(item.depth)
            .and_modify(|width| *width = (*width).max(name_width))
            .or_insert(name_width);
    }

    for item in &output.items {
        let indent = "  ".repeat(item.depth);
        let name_width = *width_per_depth
            .get(&item.depth)
            .unwrap_or(&item.name.chars().count());
        let padded_name = format!("{:width$}", item.name, width = name_width);
        let symbol = match item.kind {
            ListItemKind::Family => '>',
            ListItemKind::Task => '-',
            ListItemKind::Purge => 'x',
        };

        let base = format!("{}{} {}", indent, symbol, padded_name);
        let desc_plain = item.description.as_ref().map(|d| format!(" : {}", d));

        if use_color {
            info(format_colored_line(item.kind, &base, desc_plain.as_deref()));
        } else if let Some(desc) = desc_plain {
            info(format!("{}{}", base, desc));
        } else {
            info(base);
        }
    }
}

/// Runnable names only: tasks with their full `base:variant` name, and purges.
fn print_flat(output: &ListOutput, use_color: bool) {
    let runnable = |kind: ListItemKind| kind != ListItemKind::Family;
    let max_name_width = output
        .items
        .iter()
        .filter(|item| runnable(item.kind))
        .map(|item| item.full_name.chars().count())
        .max()
        .unwrap_or(0);

    for item in &output.items {
        if !runnable(item.kind) {
            continue;
        }
        let padded_name = format!(
            "{name:<width$}",
            name = item.full_name,
            width = max_name_width
        );
        if let Some(desc) = &item.description {
            if use_color {
                info(format!(
                    "{FG_CYAN}{name}{RESET}  {FG_BRIGHT_BLACK}{desc}{RESET}",
                    name = padded_name,
                    desc = desc
                ));
            } else {
                info(format!("{}  {}", padded_name, desc));
            }
        } else if use_color {
            info(format!("{FG_CYAN}{name}{RESET}", name = padded_name));
        } else {
            info(padded_name.trim_end());
        }
    }
}

fn format_colored_line(kind: ListItemKind, base: &str, desc: Option<&str>) -> String {
    match kind {
        ListItemKind::Family => {
            if let Some(desc) = desc {
                format!(
                    "{BG_FAMILY}{FG_WHITE}{base}{FG_FAMILY_DESC}{desc}{ERASE_TO_END}{RESET}",
                    base = base,
                    desc = desc,
                    ERASE_TO_END = ERASE_TO_END
                )
            } else {
                format!(
                    "{BG_FAMILY}{FG_WHITE}{base}{ERASE_TO_END}{RESET}",
                    base = base,
                    ERASE_TO_END = ERASE_TO_END
                )
            }
        }
        ListItemKind::Task | ListItemKind::Purge => {
            let color = if kind == ListItemKind::Purge {
                FG_YELLOW
            } else {
                FG_CYAN
            };
            if let Some(desc) = desc {
                format!(
                    "{color}{base}{RESET}{FG_BRIGHT_BLACK}{desc}{RESET}",
                    base = base,
                    desc = desc
                )
            } else {
                format!("{color}{base}{RESET}", base = base)
            }
        }
    }
}

pub fn task_started(name: &str) {
    info(format!(".  {}", name));
}

pub fn task_up_to_date(name: &str) {
    info(paint(FG_BRIGHT_BLACK, &format!("-- {}", name)));
}

/// Echoes what a command printed, as far as the task's verbosity allows.
/// Advisory output is always shown. Both streams are written while stdout
/// is locked so parallel tasks do not interleave.
pub fn command_output(task: &Task, action: &Action, output: &CommandOutput) {
    let show = action.advisory
        || match task.verbosity {
            Verbosity::Silent => false,
            Verbosity::OnFailure => !output.success(),
            Verbosity::Always => true,
        };
    if !show || (output.stdout.is_empty() && output.stderr.is_empty()) {
        return;
    }

    let mut stdout = io::stdout().lock();
    if !output.stdout.is_empty() {
        let _ = stdout.write_all(output.stdout.as_bytes());
        if !output.stdout.ends_with('\n') {
            let _ = stdout.write_all(b"\n");
        }
    }
    let _ = stdout.flush();
    if !output.stderr.is_empty() {
        let mut stderr = io::stderr().lock();
        let _ = stderr.write_all(output.stderr.as_bytes());
        if !output.stderr.ends_with('\n') {
            let _ = stderr.write_all(b"\n");
        }
        let _ = stderr.flush();
    }
}

pub fn run_summary(report: &RunReport) {
    let executed = report.count(|o| matches!(o, TaskOutcome::Succeeded(_)));
    let up_to_date = report.count(|o| *o == TaskOutcome::UpToDate);
    let failed = report.count(|o| matches!(o, TaskOutcome::Failed(_)));
    let skipped = report.count(|o| *o == TaskOutcome::NotAttempted);

    for (name, outcome) in report.outcomes() {
        if let TaskOutcome::Failed(reason) = outcome {
            error(paint(FG_RED, &format!("FAILED {}: {}", name, reason)));
        }
    }

    let mut summary = format!("{} executed, {} up to date", executed, up_to_date);
    if failed > 0 {
        summary.push_str(&format!(", {} failed", failed));
    }
    if skipped > 0 {
        summary.push_str(&format!(", {} not attempted", skipped));
    }
    if report.is_success() {
        info(paint(FG_GREEN, &summary));
    } else {
        warn(paint(FG_RED, &summary));
    }
}

pub fn status(planned: &[PlannedTask]) {
    if planned.is_empty() {
        info("No tasks are defined.");
        return;
    }
    let width = planned
        .iter()
        .map(|task| task.name.chars().count())
        .max()
        .unwrap_or(0);
    for task in planned {
        match &task.staleness {
            Staleness::UpToDate => info(format!(
                "{}  {}",
                paint(FG_GREEN, "up-to-date"),
                task.name
            )),
            Staleness::Stale(reason) => info(format!(
                "{}       {:width$}  {}",
                paint(FG_YELLOW, "stale"),
                task.name,
                paint(FG_BRIGHT_BLACK, &reason.to_string()),
                width = width
            )),
        }
    }
}

pub fn clean_report(report: &CleanReport, dry_run: bool) {
    let verb = if dry_run { "would remove" } else { "removed" };
    for path in &report.removed {
        info(format!("{} {}", verb, path.display()));
    }
    for path in &report.kept {
        warn(paint(
            FG_YELLOW,
            &format!("kept {} (directory not empty)", path.display()),
        ));
    }
    for failure in &report.failures {
        error(paint(
            FG_RED,
            &format!("failed to remove {}: {}", failure.path.display(), failure.message),
        ));
    }
    if report.removed.is_empty() && report.failures.is_empty() {
        info("Nothing to clean.");
    }
}

fn colors_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| io::stdout().is_terminal())
}
