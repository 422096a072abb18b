use indexmap::IndexMap;
use rhai::{Engine, EvalAltResult};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::bindings;
use super::runtime::{lock, BuildStackRef, ConfigErrorRef, RegistryRef, RuntimeHandle};
use crate::config::PipelineConfig;
use crate::error::Error;
use crate::logger::*;
use crate::task::{BuildStack, TaskRegistry};

/// Evaluates a rhakefile and collects the tasks it declares.
pub struct ScriptEngine {
    engine: Engine,
    registry: RegistryRef,
    build_stack: BuildStackRef,
    config_error: ConfigErrorRef,
    script_path: PathBuf,
}

impl ScriptEngine {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_root(&config.script_path, &config.root_dir, config.vars.clone())
    }

    fn with_root(script_path: &Path, root: &Path, vars: IndexMap<String, String>) -> Self {
        let mut engine = Engine::new();
        // Rhai's register_fn requires closures to be Send + Sync, so we use Arc<Mutex<_>>
        // even though access is effectively single-threaded.
        #[allow(clippy::arc_with_non_send_sync)]
        let registry = Arc::new(Mutex::new(TaskRegistry::new()));
        let mut stack = BuildStack::new();
        stack.set_script_root(root.to_path_buf());
        let build_stack = Arc::new(Mutex::new(stack));
        let config_error = Arc::new(Mutex::new(None));

        engine.set_max_expr_depths(256, 128);
        engine.on_debug(|text, source, pos| match source {
            Some(source) => debug!("script {} @ {}: {}", source, pos, text),
            None => debug!("script @ {}: {}", pos, text),
        });

        let runtime = RuntimeHandle::new(
            registry.clone(),
            build_stack.clone(),
            root.to_path_buf(),
            vars,
            config_error.clone(),
        );
        bindings::register_all(&mut engine, runtime);

        Self {
            engine,
            registry,
            build_stack,
            config_error,
            script_path: script_path.to_path_buf(),
        }
    }

    /// Compiles and runs the configured rhakefile.
    pub fn run_script(&mut self) -> Result<(), Error> {
        debug!("run_script({})", self.script_path.display());
        let result = self
            .engine
            .compile_file(self.script_path.clone())
            .and_then(|ast| {
                trace!("run_script: AST compiled successfully");
                self.engine.run_ast(&ast)
            });
        self.finish(result)
    }

    /// Runs script text directly, with relative paths resolved against the
    /// configured root.
    pub fn run_source(&mut self, source: &str) -> Result<(), Error> {
        let result = self.engine.run(source);
        self.finish(result)
    }

    fn finish(&mut self, result: Result<(), Box<EvalAltResult>>) -> Result<(), Error> {
        match result {
            Ok(()) => {
                trace!("script executed successfully");
                Ok(())
            }
            Err(err) => {
                lock(&self.build_stack).reset();
                match lock(&self.config_error).take() {
                    Some(config) => Err(config.into()),
                    None => Err(Error::Script(err)),
                }
            }
        }
    }

    /// Everything the script declared. The engine is left with an empty
    /// registry.
    pub fn into_registry(self) -> TaskRegistry {
        let registry = mem::take(&mut *lock(&self.registry));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::task::{Command, Verbosity};
    use std::fs;
    use tempfile::tempdir;

    fn engine_at(root: &Path) -> ScriptEngine {
        ScriptEngine::with_root(&root.join("rhakefile.rhai"), root, IndexMap::new())
    }

    fn load(source: &str) -> Result<TaskRegistry, Error> {
        let mut engine = engine_at(Path::new("/proj"));
        engine.run_source(source)?;
        Ok(engine.into_registry())
    }

    #[test]
    fn task_body_configures_descriptor() {
        let registry = load(
            r#"
            task("public_key", || {
                description("Generate public key.");
                file_dep("keys/fw_private_key.pem");
                targets(["keys/fw_public_key.pem"]);
                actions([["openssl", "ec", "-pubout"], "echo done"]);
                report("ls keys");
                clean(true);
                verbosity(2);
                env(#{ "LEVEL": 3 });
            });
            "#,
        )
        .expect("script loads");

        let task = registry.lookup("public_key").expect("registered");
        assert_eq!(task.description.as_deref(), Some("Generate public key."));
        assert_eq!(task.file_deps, [PathBuf::from("/proj/keys/fw_private_key.pem")]);
        assert_eq!(task.targets, [PathBuf::from("/proj/keys/fw_public_key.pem")]);
        assert_eq!(task.actions.len(), 3);
        assert_eq!(
            task.actions[0].command,
            Command::argv(["openssl", "ec", "-pubout"])
        );
        assert!(task.actions[2].advisory);
        assert!(task.cleanable);
        assert_eq!(task.verbosity, Verbosity::Always);
        assert_eq!(task.env.get("LEVEL").map(String::as_str), Some("3"));
    }

    #[test]
    fn family_generates_prefixed_members() {
        let registry = load(
            r#"
            family("sig_fw_images", "Create signed firmware images.", ["lwm2m", "mqtt"], |stem| {
                description(`Sign ${stem}`);
                targets(`signed/${stem}_sig.bin`);
                actions([`sign ${stem}`]);
            });
            "#,
        )
        .expect("script loads");

        let family = registry.family("sig_fw_images").expect("family");
        assert_eq!(family.members, ["sig_fw_images:lwm2m", "sig_fw_images:mqtt"]);
        assert_eq!(
            family.description.as_deref(),
            Some("Create signed firmware images.")
        );
        let mqtt = registry.lookup("sig_fw_images:mqtt").expect("member");
        assert_eq!(mqtt.targets, [PathBuf::from("/proj/signed/mqtt_sig.bin")]);
    }

    #[test]
    fn duplicate_task_keeps_config_identity() {
        let err = load(r#"task("a", || {}); task("a", || {});"#)
            .err()
            .expect("duplicate must fail");
        assert!(matches!(
            err,
            Error::Config(ConfigError::DuplicateTaskName(ref name)) if name == "a"
        ));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn conflicting_targets_fail_loading() {
        let err = load(
            r#"
            task("a", || { targets("out.bin"); });
            task("b", || { targets("./out.bin"); });
            "#,
        )
        .err()
        .expect("conflict must fail");
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn nested_task_is_a_script_error() {
        let err = load(r#"task("outer", || { task("inner", || {}); });"#)
            .err()
            .expect("nesting must fail");
        assert!(matches!(err, Error::Script(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn failed_body_does_not_register_task() {
        let mut engine = engine_at(Path::new("/proj"));
        assert!(engine
            .run_source(r#"task("broken", || { verbosity(9); });"#)
            .is_err());
        assert!(engine.into_registry().lookup("broken").is_none());
    }

    #[test]
    fn purge_and_default_task_register() {
        let registry = load(
            r#"
            task("build", || {});
            purge("purge", "Remove everything.", ["keys", "signed"]);
            default_task("build");
            "#,
        )
        .expect("script loads");
        let purge = registry.purge("purge").expect("purge");
        assert_eq!(
            purge.dirs,
            [PathBuf::from("/proj/keys"), PathBuf::from("/proj/signed")]
        );
        assert_eq!(registry.default_task().as_deref(), Some("build"));
    }

    #[test]
    fn vars_and_project_root_are_visible() {
        let mut vars = IndexMap::new();
        vars.insert("version".to_string(), "0.1.2".to_string());
        let mut engine =
            ScriptEngine::with_root(Path::new("/proj/rhakefile.rhai"), Path::new("/proj"), vars);
        engine
            .run_source(
                r#"
                let v = get_var("version", "0.0.0");
                let missing = get_var("nope", "fallback");
                task(`release-${v}`, || { description(`${project_root()} ${missing}`); });
                "#,
            )
            .expect("script loads");
        let registry = engine.into_registry();
        let task = registry.lookup("release-0.1.2").expect("task named by var");
        assert_eq!(task.description.as_deref(), Some("/proj fallback"));
    }

    #[test]
    fn firmware_pipeline_registers_families() {
        let registry = load(
            r#"
            firmware_pipeline(#{
                binaries: ["lwm2m", "mqtt"],
                version: "0.1.2",
                toolchain: "sh -c true",
            });
            "#,
        )
        .expect("script loads");
        assert!(registry.lookup("public_key").is_some());
        assert_eq!(
            registry.family("sig_fw_images").map(|f| f.members.len()),
            Some(2)
        );
        assert!(registry.purge("purge").is_some());
    }

    #[test]
    fn run_script_reads_file_from_disk() {
        let temp = tempdir().expect("temp dir");
        let script = temp.path().join("rhakefile.rhai");
        fs::write(&script, r#"task("hello", || { actions(["echo hi"]); });"#)
            .expect("write script");

        let mut engine = ScriptEngine::with_root(&script, temp.path(), IndexMap::new());
        engine.run_script().expect("script runs");
        assert!(engine.into_registry().lookup("hello").is_some());
    }
}
