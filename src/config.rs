use indexmap::IndexMap;
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::cli::Cli;
use crate::error::Error;
use crate::executor::RunOptions;
use crate::logger::{debug, trace};
use crate::signature::SignatureStore;

pub const DEFAULT_SCRIPT: &str = "rhakefile.rhai";
pub const STATE_FILE_NAME: &str = ".rhake-state.json";

/// Startup configuration, built once from the command line and handed to
/// the script engine and the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub script_path: PathBuf,
    /// Directory holding the script. Relative paths in the script resolve here.
    pub root_dir: PathBuf,
    /// `None` keeps signatures in memory only.
    pub state_file: Option<PathBuf>,
    pub jobs: usize,
    pub timeout: Option<Duration>,
    pub vars: IndexMap<String, String>,
}

impl PipelineConfig {
    /// Configuration for the script at `script_path` with default settings.
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        let script_path = script_path.into();
        let root_dir = script_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            state_file: Some(root_dir.join(STATE_FILE_NAME)),
            script_path,
            root_dir,
            jobs: 1,
            timeout: None,
            vars: IndexMap::new(),
        }
    }

    pub fn from_cli(cli: &Cli) -> Result<Self, Error> {
        let requested = cli.file.as_deref().unwrap_or(DEFAULT_SCRIPT);
        let script_path = resolve_script_path(requested).map_err(|err| {
            Error::Usage(format!(
                "Unable to locate script file '{}': {}",
                requested, err
            ))
        })?;
        let mut config = Self::new(script_path);

        if cli.no_state {
            config.state_file = None;
        } else if let Some(path) = &cli.state_file {
            config.state_file = Some(if path.is_absolute() {
                path.clone()
            } else {
                env::current_dir()?.join(path)
            });
        }
        config.jobs = match cli.jobs {
            0 => thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };
        config.timeout = cli.timeout.map(Duration::from_secs);
        config.vars = cli.vars.iter().cloned().collect();
        debug!("configuration: {:?}", config);
        Ok(config)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            jobs: self.jobs,
            timeout: self.timeout,
            ..RunOptions::default()
        }
    }

    pub fn open_store(&self) -> SignatureStore {
        match &self.state_file {
            Some(path) => SignatureStore::open(path),
            None => SignatureStore::in_memory(),
        }
    }
}

/// Finds `path`, walking up from the current directory when it is relative.
fn resolve_script_path(path: &str) -> io::Result<PathBuf> {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        if candidate.exists() {
            return Ok(candidate.to_path_buf());
        } else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Absolute path '{}' does not exist", candidate.display()),
            ));
        }
    }

    let mut current = env::current_dir()?;
    loop {
        let joined = current.join(path);
        trace!("looking for '{}'", joined.display());
        if joined.exists() {
            return Ok(joined);
        }
        if !current.pop() {
            break;
        }
    }

    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!(
            "Could not find '{}' when walking up parent directories",
            path
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn new_places_state_next_to_script() {
        let config = PipelineConfig::new("/proj/rhakefile.rhai");
        assert_eq!(config.root_dir, PathBuf::from("/proj"));
        assert_eq!(
            config.state_file,
            Some(PathBuf::from("/proj/.rhake-state.json"))
        );
        assert_eq!(config.jobs, 1);
    }

    #[test]
    fn from_cli_applies_flags() {
        let temp = tempdir().expect("temp dir");
        let script = temp.path().join("build.rhai");
        fs::write(&script, "").expect("write script");
        let script_arg = script.to_string_lossy().into_owned();

        let cli = Cli::parse_from([
            "rhake",
            "-f",
            script_arg.as_str(),
            "--no-state",
            "-j",
            "3",
            "--timeout",
            "5",
            "--var",
            "version=1.0.0",
            "list",
        ]);
        let config = PipelineConfig::from_cli(&cli).expect("config");
        assert_eq!(config.script_path, script);
        assert_eq!(config.root_dir, temp.path());
        assert_eq!(config.state_file, None);
        assert_eq!(config.jobs, 3);
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.vars.get("version").map(String::as_str), Some("1.0.0"));
        assert!(config.open_store().path().is_none());
    }

    #[test]
    fn zero_jobs_means_one_per_cpu() {
        let temp = tempdir().expect("temp dir");
        let script = temp.path().join("rhakefile.rhai");
        fs::write(&script, "").expect("write script");
        let script_arg = script.to_string_lossy().into_owned();

        let cli = Cli::parse_from(["rhake", "-f", script_arg.as_str(), "-j", "0", "list"]);
        let config = PipelineConfig::from_cli(&cli).expect("config");
        assert!(config.jobs >= 1);
        assert_eq!(config.run_options().jobs, config.jobs);
    }

    #[test]
    fn missing_absolute_script_is_reported() {
        let temp = tempdir().expect("temp dir");
        let missing = temp.path().join("nope.rhai");
        assert!(resolve_script_path(&missing.to_string_lossy()).is_err());
    }
}
