mod builder;
mod display;
mod model;
mod registry;
mod stack;

pub use display::{
    ListItem, ListItemKind, ListMessage, ListMessageLevel, ListOutput, ListRenderMode,
};
pub use model::{
    normalize_path, resolve_path, Action, Command, Family, Purge, RegistryEntry, Task, Verbosity,
};
pub use registry::{Selection, TaskLookup, TaskRegistry};
pub(crate) use model::context_error;
pub(crate) use stack::BuildStack;
