mod family;
mod task;
mod util;

pub use family::{Family, Purge, RegistryEntry};
pub use task::{Action, Command, Task, Verbosity};
pub use util::{normalize_path, resolve_path};
pub(crate) use util::{context_error, leaf_name, member_name};
