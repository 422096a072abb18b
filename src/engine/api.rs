use rhai::{plugin::*, Array, Dynamic, Engine, EvalAltResult, FnPtr, Map, NativeCallContext};

use super::convert;
use super::runtime::{runtime_from_ctx, with_build_stack, with_registry, ScopeGuard, ScopeKind};
use crate::firmware::FirmwarePipeline;
use crate::logger::{debug, info};
use crate::task::{resolve_path, Action, Purge};

pub fn register(engine: &mut Engine) {
    engine.register_global_module(exported_module!(rhake_api).into());
}

fn scoped_call(
    ctx: &NativeCallContext,
    identifier: &str,
    kind: ScopeKind,
    func: &FnPtr,
    args: Vec<Dynamic>,
) -> Result<(), Box<EvalAltResult>> {
    let guard = ScopeGuard::enter(ctx, identifier, kind)?;
    let _ = func.call_within_context::<Dynamic>(ctx, args)?;
    guard.finish()
}

fn family_impl(
    ctx: &NativeCallContext,
    base: &str,
    description: Option<&str>,
    items: Array,
    func: &FnPtr,
) -> Result<(), Box<EvalAltResult>> {
    let guard = ScopeGuard::enter(ctx, base, ScopeKind::Family)?;
    if let Some(text) = description {
        with_build_stack(ctx, |stack| stack.set_family_description(text))?;
    }
    for item in items {
        let variant = if item.is_string() {
            item.clone().into_string().unwrap_or_default()
        } else {
            item.to_string()
        };
        scoped_call(ctx, &variant, ScopeKind::Task, func, vec![item])?;
    }
    guard.finish()
}

fn register_pipeline(
    ctx: &NativeCallContext,
    pipeline: FirmwarePipeline,
) -> Result<(), Box<EvalAltResult>> {
    let pipeline = pipeline.resolve_toolchain(|program| which::which(program).is_ok());
    info!(
        "firmware pipeline: toolchain `{}`, {} binar{}",
        pipeline.toolchain.join(" "),
        pipeline.binaries.len(),
        if pipeline.binaries.len() == 1 { "y" } else { "ies" }
    );
    with_registry(ctx, |registry| pipeline.register(registry))
}

fn purge_impl(
    ctx: &NativeCallContext,
    name: &str,
    description: Option<&str>,
    dirs: Dynamic,
) -> Result<(), Box<EvalAltResult>> {
    let runtime = runtime_from_ctx(ctx)?;
    with_build_stack(ctx, |stack| stack.ensure_root("purge()"))?;
    let dirs = convert::string_list(dirs, "purge()")?
        .iter()
        .map(|raw| resolve_path(&runtime.root, raw))
        .collect();
    with_registry(ctx, |registry| {
        registry.register_purge(Purge {
            name: name.to_string(),
            description: description.map(str::to_string),
            dirs,
        })
    })
}

#[export_module]
pub mod rhake_api {
    use super::*;

    #[rhai_fn(global, name = "task", return_raw)]
    pub fn task_block(
        ctx: NativeCallContext,
        identifier: &str,
        func: FnPtr,
    ) -> Result<(), Box<EvalAltResult>> {
        scoped_call(&ctx, identifier, ScopeKind::Task, &func, Vec::new())
    }

    #[rhai_fn(global, name = "family", return_raw)]
    pub fn family_block(
        ctx: NativeCallContext,
        base: &str,
        items: Array,
        func: FnPtr,
    ) -> Result<(), Box<EvalAltResult>> {
        family_impl(&ctx, base, None, items, &func)
    }

    #[rhai_fn(global, name = "family", return_raw)]
    pub fn family_block_described(
        ctx: NativeCallContext,
        base: &str,
        description: &str,
        items: Array,
        func: FnPtr,
    ) -> Result<(), Box<EvalAltResult>> {
        family_impl(&ctx, base, Some(description), items, &func)
    }

    #[rhai_fn(global, name = "purge", return_raw)]
    pub fn purge_dirs(
        ctx: NativeCallContext,
        name: &str,
        dirs: Dynamic,
    ) -> Result<(), Box<EvalAltResult>> {
        purge_impl(&ctx, name, None, dirs)
    }

    #[rhai_fn(global, name = "purge", return_raw)]
    pub fn purge_dirs_described(
        ctx: NativeCallContext,
        name: &str,
        description: &str,
        dirs: Dynamic,
    ) -> Result<(), Box<EvalAltResult>> {
        purge_impl(&ctx, name, Some(description), dirs)
    }

    #[rhai_fn(global, name = "default_task", return_raw)]
    pub fn register_default_task(
        ctx: NativeCallContext,
        name: &str,
    ) -> Result<(), Box<EvalAltResult>> {
        with_build_stack(&ctx, |stack| stack.ensure_root("default_task()"))?;
        with_registry(&ctx, |registry| registry.set_default_task(name))
    }

    #[rhai_fn(global, name = "firmware_pipeline", return_raw)]
    pub fn firmware_pipeline_default(ctx: NativeCallContext) -> Result<(), Box<EvalAltResult>> {
        with_build_stack(&ctx, |stack| stack.ensure_root("firmware_pipeline()"))?;
        let runtime = runtime_from_ctx(&ctx)?;
        register_pipeline(&ctx, FirmwarePipeline::new(&runtime.root))
    }

    #[rhai_fn(global, name = "firmware_pipeline", return_raw)]
    pub fn firmware_pipeline(ctx: NativeCallContext, config: Map) -> Result<(), Box<EvalAltResult>> {
        with_build_stack(&ctx, |stack| stack.ensure_root("firmware_pipeline()"))?;
        let runtime = runtime_from_ctx(&ctx)?;
        let pipeline = convert::pipeline_from_map(config, &runtime.root)?;
        register_pipeline(&ctx, pipeline)
    }

    #[rhai_fn(global, name = "get_var", return_raw)]
    pub fn get_var(ctx: NativeCallContext, key: &str) -> Result<Dynamic, Box<EvalAltResult>> {
        get_var_or(ctx, key, Dynamic::UNIT)
    }

    #[rhai_fn(global, name = "get_var", return_raw)]
    pub fn get_var_or(
        ctx: NativeCallContext,
        key: &str,
        default: Dynamic,
    ) -> Result<Dynamic, Box<EvalAltResult>> {
        let runtime = runtime_from_ctx(&ctx)?;
        Ok(match runtime.vars.get(key) {
            Some(value) => Dynamic::from(value.clone()),
            None => {
                debug!("get_var('{}'): not set, using default", key);
                default
            }
        })
    }

    #[rhai_fn(global, name = "which")]
    pub fn which_program(program: &str) -> Dynamic {
        match which::which(program) {
            Ok(path) => Dynamic::from(path.to_string_lossy().into_owned()),
            Err(_) => Dynamic::UNIT,
        }
    }

    #[rhai_fn(global, name = "project_root", return_raw)]
    pub fn project_root(ctx: NativeCallContext) -> Result<String, Box<EvalAltResult>> {
        let runtime = runtime_from_ctx(&ctx)?;
        Ok(runtime.root.to_string_lossy().into_owned())
    }

    #[rhai_fn(global, name = "description", return_raw)]
    pub fn set_description(ctx: NativeCallContext, desc: &str) -> Result<(), Box<EvalAltResult>> {
        with_build_stack(&ctx, |stack| stack.set_description(desc))
    }

    #[rhai_fn(global, name = "file_dep", return_raw)]
    pub fn file_dep(ctx: NativeCallContext, paths: Dynamic) -> Result<(), Box<EvalAltResult>> {
        let paths = convert::string_list(paths, "file_dep()")?;
        with_build_stack(&ctx, |stack| stack.add_file_deps(&paths))
    }

    #[rhai_fn(global, name = "targets", return_raw)]
    pub fn targets(ctx: NativeCallContext, paths: Dynamic) -> Result<(), Box<EvalAltResult>> {
        let paths = convert::string_list(paths, "targets()")?;
        with_build_stack(&ctx, |stack| stack.add_targets(&paths))
    }

    #[rhai_fn(global, name = "actions", return_raw)]
    pub fn actions(ctx: NativeCallContext, list: Array) -> Result<(), Box<EvalAltResult>> {
        let actions = convert::actions(list)?;
        with_build_stack(&ctx, move |stack| stack.add_actions(actions))
    }

    #[rhai_fn(global, name = "actions", return_raw)]
    pub fn single_action(ctx: NativeCallContext, line: &str) -> Result<(), Box<EvalAltResult>> {
        let command = convert::command(Dynamic::from(line.to_string()), "actions()")?;
        with_build_stack(&ctx, move |stack| stack.add_actions(vec![Action::new(command)]))
    }

    #[rhai_fn(global, name = "report", return_raw)]
    pub fn report(ctx: NativeCallContext, command: Dynamic) -> Result<(), Box<EvalAltResult>> {
        let command = convert::command(command, "report()")?;
        with_build_stack(&ctx, move |stack| {
            stack.add_actions(vec![Action::advisory(command)])
        })
    }

    #[rhai_fn(global, name = "clean", return_raw)]
    pub fn clean(ctx: NativeCallContext, cleanable: bool) -> Result<(), Box<EvalAltResult>> {
        with_build_stack(&ctx, |stack| stack.set_cleanable(cleanable))
    }

    #[rhai_fn(global, name = "verbosity", return_raw)]
    pub fn verbosity(ctx: NativeCallContext, level: i64) -> Result<(), Box<EvalAltResult>> {
        with_build_stack(&ctx, |stack| stack.set_verbosity(level))
    }

    #[rhai_fn(global, name = "dir", return_raw)]
    pub fn set_directory(ctx: NativeCallContext, path: &str) -> Result<(), Box<EvalAltResult>> {
        with_build_stack(&ctx, |stack| stack.set_directory(path))
    }

    #[rhai_fn(global, name = "env", return_raw)]
    pub fn set_env(ctx: NativeCallContext, vars: Map) -> Result<(), Box<EvalAltResult>> {
        let vars = convert::env_map(vars)?;
        with_build_stack(&ctx, move |stack| stack.set_env(vars))
    }
}
