mod api;
mod bindings;
mod convert;
mod core;
mod runtime;

pub use self::core::ScriptEngine;
