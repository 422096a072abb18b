mod resolver;
mod task_registry;

pub use resolver::{Selection, TaskLookup};
pub use task_registry::TaskRegistry;
