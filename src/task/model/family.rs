use std::path::PathBuf;

/// A task family: one declaration expanded into `base:variant` members.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct Family {
    pub description: Option<String>,
    pub members: Vec<String>,
}

/// Whole-directory removal with no file-level tracking.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct Purge {
    pub name: String,
    pub description: Option<String>,
    pub dirs: Vec<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryEntry {
    Task(String),
    Family(String),
    Purge(String),
}
