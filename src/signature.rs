//! File signatures and the persisted per-task signature store.
//!
//! A signature is the BLAKE3 digest of a file's contents, hex encoded.
//! Directories sign as a fixed marker, so a directory dependency only
//! changes by appearing or disappearing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::logger::{debug, warn};
use crate::task::Task;

const STORE_VERSION: u32 = 1;
const DIRECTORY_SIGNATURE: &str = "directory";

pub fn file_signature(path: &Path) -> io::Result<String> {
    if path.is_dir() {
        return Ok(DIRECTORY_SIGNATURE.to_string());
    }
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Digest of everything that defines what a task does.
pub fn definition_signature(task: &Task) -> String {
    let mut hasher = blake3::Hasher::new();
    for action in &task.actions {
        hasher.update(if action.advisory { b"report\0" } else { b"action\0" });
        hasher.update(action.command.to_string().as_bytes());
        hasher.update(b"\0");
    }
    for dep in &task.file_deps {
        hasher.update(b"dep\0");
        hasher.update(dep.to_string_lossy().as_bytes());
        hasher.update(b"\0");
    }
    for target in &task.targets {
        hasher.update(b"target\0");
        hasher.update(target.to_string_lossy().as_bytes());
        hasher.update(b"\0");
    }
    if let Some(dir) = &task.working_dir {
        hasher.update(b"dir\0");
        hasher.update(dir.to_string_lossy().as_bytes());
    }
    for (key, value) in &task.env {
        hasher.update(format!("env\0{}={}\0", key, value).as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// What was true about a task's inputs the last time it succeeded.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskRecord {
    pub definition: String,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl TaskRecord {
    /// Snapshot of the task's current dependency signatures. Dependencies
    /// that cannot be read are left out, so they compare as changed later.
    pub fn capture(task: &Task) -> Self {
        let files = task
            .file_deps
            .iter()
            .filter_map(|dep| match file_signature(dep) {
                Ok(sig) => Some((path_key(dep), sig)),
                Err(err) => {
                    debug!("not recording '{}': {}", dep.display(), err);
                    None
                }
            })
            .collect();
        Self {
            definition: definition_signature(task),
            files,
        }
    }

    pub fn signature_of(&self, path: &Path) -> Option<&str> {
        self.files.get(&path_key(path)).map(String::as_str)
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    tasks: BTreeMap<String, TaskRecord>,
}

/// `(task, path) -> signature` records, optionally backed by a JSON file.
#[derive(Debug, Default)]
pub struct SignatureStore {
    path: Option<PathBuf>,
    tasks: BTreeMap<String, TaskRecord>,
    dirty: bool,
}

impl SignatureStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the store at `path`. A missing file is an empty store; an
    /// unreadable one is logged and treated as empty, which makes every task
    /// stale rather than failing the run.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load(&path) {
            Ok(store) => store,
            Err(err) => {
                warn!("ignoring signature store: {}", err);
                Self {
                    path: Some(path),
                    tasks: BTreeMap::new(),
                    dirty: true,
                }
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("no signature store at '{}'", path.display());
                return Ok(Self {
                    path: Some(path.to_path_buf()),
                    ..Self::default()
                });
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let file: StoreFile = serde_json::from_str(&raw)?;
        if file.version != STORE_VERSION {
            warn!(
                "signature store version {} is not {}, starting fresh",
                file.version, STORE_VERSION
            );
            return Ok(Self {
                path: Some(path.to_path_buf()),
                tasks: BTreeMap::new(),
                dirty: true,
            });
        }
        debug!(
            "loaded {} task record(s) from '{}'",
            file.tasks.len(),
            path.display()
        );
        Ok(Self {
            path: Some(path.to_path_buf()),
            tasks: file.tasks,
            dirty: false,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&self, task: &str) -> Option<&TaskRecord> {
        self.tasks.get(task)
    }

    pub fn update(&mut self, task: &str, record: TaskRecord) {
        if self.tasks.get(task) != Some(&record) {
            self.tasks.insert(task.to_string(), record);
            self.dirty = true;
        }
    }

    pub fn forget(&mut self, task: &str) -> bool {
        let removed = self.tasks.remove(task).is_some();
        self.dirty |= removed;
        removed
    }

    pub fn forget_all(&mut self) -> usize {
        let count = self.tasks.len();
        self.tasks.clear();
        self.dirty |= count > 0;
        count
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Writes the store if it changed: a temporary sibling file is written
    /// and synced, then renamed over the real one.
    pub fn save(&mut self) -> Result<(), StoreError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }

        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = StoreFile {
            version: STORE_VERSION,
            tasks: self.tasks.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);
        {
            let mut tmp = File::create(&tmp_path).map_err(io_err)?;
            tmp.write_all(json.as_bytes()).map_err(io_err)?;
            tmp.sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp_path, &path).map_err(io_err)?;
        debug!(
            "saved {} task record(s) to '{}'",
            self.tasks.len(),
            path.display()
        );
        self.dirty = false;
        Ok(())
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
