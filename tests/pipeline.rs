use rhake::error::ConfigError;
use rhake::executor::{RunOptions, RunStatus, TaskOutcome};
use rhake::runner::{CommandOutput, CommandRunner, CommandStatus, Invocation, RunControl};
use rhake::{Error, PipelineConfig, Workspace};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::{tempdir, TempDir};

/// Understands `touch <relative path>`; everything else just succeeds,
/// unless listed in `failing`.
struct FakeRunner {
    root: PathBuf,
    calls: Mutex<Vec<String>>,
    failing: HashSet<String>,
}

impl FakeRunner {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            calls: Mutex::new(Vec::new()),
            failing: HashSet::new(),
        }
    }

    fn failing(mut self, line: &str) -> Self {
        self.failing.insert(line.to_string());
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, invocation: &Invocation<'_>, _control: &RunControl) -> io::Result<CommandOutput> {
        let line = invocation.command.to_string();
        self.calls.lock().expect("calls lock").push(line.clone());
        let code = if self.failing.contains(&line) {
            1
        } else {
            if let Some(path) = line.strip_prefix("touch ") {
                fs::write(self.root.join(path), &line)?;
            }
            0
        };
        Ok(CommandOutput {
            status: CommandStatus::Exited(code),
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    fn locate(&self, _program: &str, _working_dir: Option<&Path>) -> bool {
        true
    }
}

const SIGNING_SCRIPT: &str = r#"
task("key", || {
    targets("priv.pem");
    actions(["touch priv.pem"]);
    clean(true);
});

task("pubkey", || {
    file_dep("priv.pem");
    targets("pub.pem");
    actions(["touch pub.pem"]);
    clean(true);
});

task("sign", || {
    file_dep(["pub.pem", "fw.bin"]);
    targets("fw_sig.bin");
    actions(["touch fw_sig.bin"]);
    report("dump fw_sig.bin");
    clean(true);
});

task("notes", || {
    file_dep("notes.txt");
    targets("notes.out");
    actions(["touch notes.out"]);
});
"#;

fn project(script: &str) -> TempDir {
    let temp = tempdir().expect("temp dir");
    fs::write(temp.path().join("rhakefile.rhai"), script).expect("write script");
    fs::write(temp.path().join("fw.bin"), "firmware v1").expect("write fw.bin");
    fs::write(temp.path().join("notes.txt"), "notes").expect("write notes");
    temp
}

fn load(temp: &TempDir) -> Result<Workspace, Error> {
    Workspace::load(PipelineConfig::new(temp.path().join("rhakefile.rhai")))
}

fn run(ws: &Workspace, runner: &FakeRunner, names: &[&str]) -> rhake::executor::RunReport {
    ws.run_with(names, runner, RunOptions::default())
        .expect("run completes")
}

fn outcome_labels(report: &rhake::executor::RunReport, names: &[&str]) -> Vec<&'static str> {
    names
        .iter()
        .map(|name| report.outcome(name).map_or("missing", TaskOutcome::label))
        .collect()
}

#[test]
fn signing_scenario_runs_skips_and_propagates() {
    let temp = project(SIGNING_SCRIPT);
    let ws = load(&temp).expect("workspace loads");
    let runner = FakeRunner::new(temp.path());

    let first = run(&ws, &runner, &[]);
    assert_eq!(first.status, RunStatus::Success);
    let mut executed = first.executed();
    executed.sort_unstable();
    assert_eq!(executed, ["key", "notes", "pubkey", "sign"]);

    let second = run(&ws, &runner, &[]);
    assert!(second.executed().is_empty());
    assert_eq!(
        outcome_labels(&second, &["key", "pubkey", "sign", "notes"]),
        ["up to date"; 4]
    );

    fs::remove_file(temp.path().join("pub.pem")).expect("delete pub.pem");
    let third = run(&ws, &runner, &[]);
    assert_eq!(third.executed(), ["pubkey", "sign"]);
    assert_eq!(third.outcome("key"), Some(&TaskOutcome::UpToDate));
    assert_eq!(third.outcome("notes"), Some(&TaskOutcome::UpToDate));
}

#[test]
fn changed_dependency_reruns_task_and_dependents_only() {
    let temp = project(SIGNING_SCRIPT);
    let ws = load(&temp).expect("workspace loads");
    let runner = FakeRunner::new(temp.path());
    run(&ws, &runner, &[]);

    fs::write(temp.path().join("priv.pem"), "rotated key").expect("modify key");
    let report = run(&ws, &runner, &[]);
    assert_eq!(report.executed(), ["pubkey", "sign"]);
    assert_eq!(report.outcome("notes"), Some(&TaskOutcome::UpToDate));

    fs::write(temp.path().join("fw.bin"), "firmware v2").expect("modify fw");
    let report = run(&ws, &runner, &["sign"]);
    assert_eq!(report.executed(), ["sign"]);
}

#[test]
fn advisory_failure_does_not_fail_task() {
    let temp = project(SIGNING_SCRIPT);
    let ws = load(&temp).expect("workspace loads");
    let runner = FakeRunner::new(temp.path()).failing("dump fw_sig.bin");

    let report = run(&ws, &runner, &["sign"]);
    assert_eq!(report.status, RunStatus::Success);
    assert!(runner.calls().contains(&"dump fw_sig.bin".to_string()));
}

#[test]
fn failure_leaves_dependents_not_attempted_and_unrecorded() {
    let temp = project(SIGNING_SCRIPT);
    let ws = load(&temp).expect("workspace loads");
    let runner = FakeRunner::new(temp.path()).failing("touch pub.pem");

    let report = run(&ws, &runner, &["sign"]);
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(
        outcome_labels(&report, &["key", "pubkey", "sign"]),
        ["executed", "failed", "not attempted"]
    );
    let err = report.into_result().err().expect("failed run is an error");
    assert_eq!(err.exit_code(), 5);

    // The failed task was not recorded, so a fixed runner rebuilds it.
    let fixed = FakeRunner::new(temp.path());
    let report = run(&ws, &fixed, &["sign"]);
    assert_eq!(report.executed(), ["pubkey", "sign"]);
}

#[test]
fn clean_then_run_behaves_like_first_run() {
    let temp = project(SIGNING_SCRIPT);
    let ws = load(&temp).expect("workspace loads");
    let runner = FakeRunner::new(temp.path());
    run(&ws, &runner, &[]);

    let report = ws.clean::<&str>(&[], false).expect("clean");
    assert!(report.is_complete());
    for name in ["priv.pem", "pub.pem", "fw_sig.bin"] {
        assert!(!temp.path().join(name).exists(), "{} still exists", name);
    }
    assert!(temp.path().join("notes.out").exists());
    assert!(temp.path().join("fw.bin").exists());

    let again = run(&ws, &runner, &["sign"]);
    assert_eq!(again.executed(), ["key", "pubkey", "sign"]);
}

#[test]
fn parallel_run_respects_dependencies() {
    let temp = project(SIGNING_SCRIPT);
    let ws = load(&temp).expect("workspace loads");
    let runner = FakeRunner::new(temp.path());
    let options = RunOptions {
        jobs: 4,
        ..RunOptions::default()
    };

    let report = ws
        .run_with::<&str>(&[], &runner, options)
        .expect("run completes");
    assert_eq!(report.status, RunStatus::Success);
    let position = |name: &str| {
        report
            .started()
            .iter()
            .position(|started| started == name)
            .expect("task started")
    };
    assert!(position("key") < position("pubkey"));
    assert!(position("pubkey") < position("sign"));
}

#[test]
fn three_task_cycle_is_rejected_before_running() {
    let temp = project(
        r#"
        task("a", || { file_dep("c.out"); targets("a.out"); actions(["touch a.out"]); });
        task("b", || { file_dep("a.out"); targets("b.out"); actions(["touch b.out"]); });
        task("c", || { file_dep("b.out"); targets("c.out"); actions(["touch c.out"]); });
        "#,
    );
    let err = load(&temp).err().expect("cycle must fail");
    match &err {
        Error::Config(ConfigError::CycleDetected { path }) => {
            assert_eq!(path.first(), path.last());
            assert_eq!(path.len(), 4);
        }
        other => panic!("expected cycle, got {:?}", other),
    }
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn overlapping_targets_are_rejected() {
    let temp = project(
        r#"
        task("a", || { targets("out.bin"); });
        task("b", || { targets("out.bin"); });
        "#,
    );
    let err = load(&temp).err().expect("conflict must fail");
    assert!(matches!(
        err,
        Error::Config(ConfigError::ConflictingTargets { .. })
    ));
}
