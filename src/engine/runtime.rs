use indexmap::IndexMap;
use rhai::{EvalAltResult, NativeCallContext, Position};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::ConfigError;
use crate::logger::{debug, trace};
use crate::task::{context_error, BuildStack, TaskRegistry};

pub(super) type RegistryRef = Arc<Mutex<TaskRegistry>>;
pub(super) type BuildStackRef = Arc<Mutex<BuildStack>>;
pub(super) type ConfigErrorRef = Arc<Mutex<Option<ConfigError>>>;

/// State shared between the engine and every native function, carried in
/// the engine's default tag.
#[derive(Clone)]
pub(super) struct RuntimeHandle {
    pub(super) registry: RegistryRef,
    pub(super) build_stack: BuildStackRef,
    pub(super) root: PathBuf,
    pub(super) vars: Arc<IndexMap<String, String>>,
    pub(super) config_error: ConfigErrorRef,
}

impl RuntimeHandle {
    pub(super) fn new(
        registry: RegistryRef,
        build_stack: BuildStackRef,
        root: PathBuf,
        vars: IndexMap<String, String>,
        config_error: ConfigErrorRef,
    ) -> Self {
        Self {
            registry,
            build_stack,
            root,
            vars: Arc::new(vars),
            config_error,
        }
    }

    /// Turns a registry error into a script error, keeping the first one so
    /// the caller can report it with its own exit code.
    pub(super) fn config_failure(&self, err: ConfigError) -> Box<EvalAltResult> {
        let message = err.to_string();
        let mut slot = lock(&self.config_error);
        if slot.is_none() {
            *slot = Some(err);
        }
        context_error(message)
    }
}

pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(super) fn runtime_from_ctx(
    ctx: &NativeCallContext,
) -> Result<RuntimeHandle, Box<EvalAltResult>> {
    ctx.tag()
        .and_then(|tag| tag.read_lock::<RuntimeHandle>())
        .map(|handle| handle.clone())
        .ok_or_else(|| {
            EvalAltResult::ErrorRuntime(
                "Rhake runtime context is not available.".into(),
                Position::NONE,
            )
            .into()
        })
}

pub(super) fn with_build_stack<F, R>(
    ctx: &NativeCallContext,
    op: F,
) -> Result<R, Box<EvalAltResult>>
where
    F: FnOnce(&mut BuildStack) -> Result<R, Box<EvalAltResult>>,
{
    let runtime = runtime_from_ctx(ctx)?;
    let mut stack = lock(&runtime.build_stack);
    op(&mut stack)
}

pub(super) fn with_registry<F, R>(ctx: &NativeCallContext, op: F) -> Result<R, Box<EvalAltResult>>
where
    F: FnOnce(&mut TaskRegistry) -> Result<R, ConfigError>,
{
    let runtime = runtime_from_ctx(ctx)?;
    let result = op(&mut lock(&runtime.registry));
    result.map_err(|err| runtime.config_failure(err))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ScopeKind {
    Task,
    Family,
}

impl ScopeKind {
    fn label(self) -> &'static str {
        match self {
            ScopeKind::Task => "task",
            ScopeKind::Family => "family",
        }
    }
}

/// An open `task()` / `family()` block. `finish` registers it; dropping an
/// unfinished guard discards it, so a failing body never leaves the stack
/// half-open.
pub(super) struct ScopeGuard {
    runtime: RuntimeHandle,
    kind: ScopeKind,
    label: String,
    active: bool,
}

impl ScopeGuard {
    pub(super) fn enter(
        ctx: &NativeCallContext,
        identifier: &str,
        kind: ScopeKind,
    ) -> Result<Self, Box<EvalAltResult>> {
        let runtime = runtime_from_ctx(ctx)?;
        {
            let mut stack = lock(&runtime.build_stack);
            match kind {
                ScopeKind::Task => stack.begin_task(identifier)?,
                ScopeKind::Family => {
                    stack.begin_family(identifier)?;
                    let declared = lock(&runtime.registry).declare_family(identifier, None);
                    if let Err(err) = declared {
                        stack.abort();
                        return Err(runtime.config_failure(err));
                    }
                }
            }
        }
        trace!("enter {} '{}'", kind.label(), identifier);
        Ok(Self {
            runtime,
            kind,
            label: identifier.trim().to_string(),
            active: true,
        })
    }

    pub(super) fn finish(mut self) -> Result<(), Box<EvalAltResult>> {
        self.active = false;
        let mut stack = lock(&self.runtime.build_stack);
        match self.kind {
            ScopeKind::Task => {
                let task = stack.end_task()?;
                drop(stack);
                let registered = lock(&self.runtime.registry).register(task);
                registered.map_err(|err| self.runtime.config_failure(err))
            }
            ScopeKind::Family => {
                let (base, description) = stack.end_family()?.build();
                drop(stack);
                if description.is_some() {
                    lock(&self.runtime.registry).set_family_description(&base, description);
                }
                Ok(())
            }
        }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        debug!(
            "{} '{}' discarded: its body failed",
            self.kind.label(),
            self.label
        );
        lock(&self.runtime.build_stack).abort();
    }
}
