use indexmap::IndexMap;
use rhai::EvalAltResult;
use std::fs;
use std::path::{Path, PathBuf};

use crate::task::builder::{FamilyBuilder, TaskBuilder};
use crate::task::model::{context_error, member_name, resolve_path, Action, Task, Verbosity};

#[derive(Clone, Debug)]
pub(crate) enum ContextFrame {
    Root,
    Family(FamilyBuilder),
    Task(TaskBuilder),
}

/// Tracks which `task()` / `family()` block the script is currently inside.
#[derive(Clone)]
pub struct BuildStack {
    context_stack: Vec<ContextFrame>,
    script_root: Option<PathBuf>,
}

impl Default for BuildStack {
    fn default() -> Self {
        Self {
            context_stack: vec![ContextFrame::Root],
            script_root: None,
        }
    }
}

impl BuildStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.context_stack.clear();
        self.context_stack.push(ContextFrame::Root);
    }

    pub fn set_script_root(&mut self, root: PathBuf) {
        self.script_root = Some(root);
    }

    pub(crate) fn begin_task(&mut self, name: &str) -> Result<(), Box<EvalAltResult>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(context_error("Task name cannot be empty."));
        }

        let builder = match self.context_stack.last() {
            Some(ContextFrame::Root) => TaskBuilder::new(name.to_string(), None),
            Some(ContextFrame::Family(family)) => TaskBuilder::new(
                member_name(&family.base, name),
                Some(family.base.clone()),
            ),
            Some(ContextFrame::Task(_)) => {
                return Err(context_error("Nested task() calls are not supported."))
            }
            None => return Err(context_error("context mismatch: context stack is empty.")),
        };
        self.context_stack.push(ContextFrame::Task(builder));
        Ok(())
    }

    pub(crate) fn end_task(&mut self) -> Result<Task, Box<EvalAltResult>> {
        match self.context_stack.pop() {
            Some(ContextFrame::Task(builder)) => Ok(builder.build()),
            Some(frame @ ContextFrame::Family(_)) => {
                self.context_stack.push(frame);
                Err(context_error(
                    "context mismatch: end_task() called while inside family().",
                ))
            }
            Some(ContextFrame::Root) => {
                self.context_stack.push(ContextFrame::Root);
                Err(context_error(
                    "context mismatch: end_task() called before task() was started.",
                ))
            }
            None => Err(context_error("context mismatch: context stack is empty.")),
        }
    }

    pub(crate) fn begin_family(&mut self, base: &str) -> Result<(), Box<EvalAltResult>> {
        let base = base.trim();
        if base.is_empty() {
            return Err(context_error("Family name cannot be empty."));
        }
        if base.contains(':') {
            return Err(context_error(format!(
                "Family name '{}' cannot contain ':'.",
                base
            )));
        }
        match self.context_stack.last() {
            Some(ContextFrame::Root) => {}
            Some(_) => {
                return Err(context_error(
                    "family() can only be used at the top level of the rhakefile.",
                ))
            }
            None => return Err(context_error("context mismatch: context stack is empty.")),
        }
        self.context_stack
            .push(ContextFrame::Family(FamilyBuilder::new(base.to_string())));
        Ok(())
    }

    pub(crate) fn end_family(&mut self) -> Result<FamilyBuilder, Box<EvalAltResult>> {
        match self.context_stack.pop() {
            Some(ContextFrame::Family(builder)) => Ok(builder),
            Some(frame @ ContextFrame::Task(_)) => {
                self.context_stack.push(frame);
                Err(context_error(
                    "context mismatch: task() scope was not closed before ending family().",
                ))
            }
            Some(ContextFrame::Root) => {
                self.context_stack.push(ContextFrame::Root);
                Err(context_error(
                    "context mismatch: end_family() called before family() was started.",
                ))
            }
            None => Err(context_error("context mismatch: context stack is empty.")),
        }
    }

    pub(crate) fn ensure_root(&self, label: &str) -> Result<(), Box<EvalAltResult>> {
        match self.context_stack.last() {
            Some(ContextFrame::Root) => Ok(()),
            _ => Err(context_error(format!(
                "{} can only be used at the top level of the rhakefile.",
                label
            ))),
        }
    }

    /// Drops the innermost open scope without registering it.
    pub(crate) fn abort(&mut self) {
        if self.context_stack.len() > 1 {
            self.context_stack.pop();
        }
    }

    pub(crate) fn set_family_description(&mut self, desc: &str) -> Result<(), Box<EvalAltResult>> {
        match self.context_stack.last_mut() {
            Some(ContextFrame::Family(builder)) => {
                builder.set_description(desc);
                Ok(())
            }
            _ => Err(context_error("family description requires an open family().")),
        }
    }

    pub fn set_description(&mut self, desc: &str) -> Result<(), Box<EvalAltResult>> {
        self.current_task("description()")?.set_description(desc);
        Ok(())
    }

    pub fn add_actions(&mut self, actions: Vec<Action>) -> Result<(), Box<EvalAltResult>> {
        let builder = self.current_task("actions()")?;
        for action in actions {
            builder.add_action(action);
        }
        Ok(())
    }

    pub fn add_file_deps(&mut self, paths: &[String]) -> Result<(), Box<EvalAltResult>> {
        let resolved = self.resolve_all(paths, "file_dep()")?;
        let builder = self.current_task("file_dep()")?;
        for path in resolved {
            builder.add_file_dep(&path);
        }
        Ok(())
    }

    pub fn add_targets(&mut self, paths: &[String]) -> Result<(), Box<EvalAltResult>> {
        let resolved = self.resolve_all(paths, "targets()")?;
        let builder = self.current_task("targets()")?;
        for path in resolved {
            builder.add_target(&path);
        }
        Ok(())
    }

    pub fn set_cleanable(&mut self, cleanable: bool) -> Result<(), Box<EvalAltResult>> {
        self.current_task("clean()")?.set_cleanable(cleanable);
        Ok(())
    }

    pub fn set_verbosity(&mut self, level: i64) -> Result<(), Box<EvalAltResult>> {
        let verbosity = Verbosity::from_level(level).ok_or_else(|| {
            context_error(format!("verbosity() expects 0, 1 or 2, got {}.", level))
        })?;
        self.current_task("verbosity()")?.set_verbosity(verbosity);
        Ok(())
    }

    pub fn set_env(&mut self, vars: IndexMap<String, String>) -> Result<(), Box<EvalAltResult>> {
        self.current_task("env()")?.extend_env(vars);
        Ok(())
    }

    pub fn set_directory(&mut self, path: &str) -> Result<(), Box<EvalAltResult>> {
        if self.current_task("dir()")?.has_working_dir() {
            return Err(context_error("dir() can only be defined once per task()."));
        }
        let resolved = self.resolve_directory(path)?;
        self.current_task("dir()")?.set_working_dir(resolved);
        Ok(())
    }

    fn current_task(&mut self, label: &str) -> Result<&mut TaskBuilder, Box<EvalAltResult>> {
        match self.context_stack.last_mut() {
            Some(ContextFrame::Task(builder)) => Ok(builder),
            Some(ContextFrame::Family(_)) | Some(ContextFrame::Root) => Err(context_error(
                format!("{} can only be used inside task() or family().", label),
            )),
            None => Err(context_error("context mismatch: context stack is empty.")),
        }
    }

    fn root(&self, label: &str) -> Result<&Path, Box<EvalAltResult>> {
        self.script_root.as_deref().ok_or_else(|| {
            context_error(format!(
                "{} cannot be used before the rhakefile root is known.",
                label
            ))
        })
    }

    fn resolve_all(
        &self,
        paths: &[String],
        label: &str,
    ) -> Result<Vec<PathBuf>, Box<EvalAltResult>> {
        let root = self.root(label)?;
        paths
            .iter()
            .map(|raw| {
                if raw.trim().is_empty() {
                    Err(context_error(format!("{} requires non-empty paths.", label)))
                } else {
                    Ok(resolve_path(root, raw))
                }
            })
            .collect()
    }

    fn resolve_directory(&self, path: &str) -> Result<PathBuf, Box<EvalAltResult>> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(context_error("dir() requires a non-empty path."));
        }
        let raw = Path::new(trimmed);
        let candidate = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.root("dir()")?.join(raw)
        };

        let normalized = candidate.canonicalize().map_err(|err| {
            context_error(format!(
                "dir(): unable to resolve '{}': {}",
                candidate.display(),
                err
            ))
        })?;

        let metadata = fs::metadata(&normalized).map_err(|err| {
            context_error(format!(
                "dir(): unable to inspect '{}': {}",
                normalized.display(),
                err
            ))
        })?;

        if !metadata.is_dir() {
            return Err(context_error(format!(
                "dir(): '{}' is not a directory.",
                normalized.display()
            )));
        }

        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::model::Command;
    use tempfile::tempdir;

    fn stack_at(root: &Path) -> BuildStack {
        let mut stack = BuildStack::new();
        stack.set_script_root(root.to_path_buf());
        stack
    }

    #[test]
    fn dir_sets_absolute_path_from_relative_input() {
        let temp = tempdir().expect("temp dir");
        let root = temp.path().join("workspace");
        let scripts = root.join("scripts");
        fs::create_dir_all(&scripts).expect("create scripts dir");

        let mut stack = stack_at(&root);
        stack.begin_task("demo").expect("begin task");
        stack.set_directory("scripts").expect("set dir");
        let task = stack.end_task().expect("end task with dir configured");

        let expected = scripts
            .canonicalize()
            .expect("canonicalize scripts directory");
        assert_eq!(task.working_dir.as_ref(), Some(&expected));
    }

    #[test]
    fn dir_rejects_second_invocation_in_same_task() {
        let temp = tempdir().expect("temp dir");
        fs::create_dir_all(temp.path().join("scripts")).expect("create scripts dir");

        let mut stack = stack_at(temp.path());
        stack.begin_task("dup").expect("begin task");
        stack.set_directory("scripts").expect("first dir()");
        assert!(stack.set_directory("scripts").is_err());
    }

    #[test]
    fn dir_requires_directory_to_exist() {
        let temp = tempdir().expect("temp dir");
        let mut stack = stack_at(temp.path());
        stack.begin_task("missing").expect("begin task");
        assert!(stack.set_directory("unknown_dir").is_err());
    }

    #[test]
    fn body_functions_require_task_scope() {
        let temp = tempdir().expect("temp dir");
        let mut stack = stack_at(temp.path());
        assert!(stack.set_directory("scripts").is_err());
        assert!(stack.add_targets(&["out.bin".to_string()]).is_err());
        assert!(stack.set_cleanable(true).is_err());
    }

    #[test]
    fn paths_resolve_against_script_root() {
        let mut stack = stack_at(Path::new("/proj"));
        stack.begin_task("public_key").expect("begin");
        stack
            .add_file_deps(&["keys/./fw_private_key.pem".to_string()])
            .expect("deps");
        stack
            .add_targets(&["/abs/pub.pem".to_string(), "keys/../pub.pem".to_string()])
            .expect("targets");
        stack
            .add_actions(vec![Action::new(Command::shell("openssl ec"))])
            .expect("actions");
        stack.set_verbosity(2).expect("verbosity");
        let task = stack.end_task().expect("end");

        assert_eq!(task.file_deps, [PathBuf::from("/proj/keys/fw_private_key.pem")]);
        assert_eq!(
            task.targets,
            [PathBuf::from("/abs/pub.pem"), PathBuf::from("/proj/pub.pem")]
        );
        assert_eq!(task.verbosity, Verbosity::Always);
        assert_eq!(task.actions.len(), 1);
    }

    #[test]
    fn family_members_are_prefixed() {
        let mut stack = stack_at(Path::new("/proj"));
        stack.begin_family("sign").expect("family");
        stack.set_family_description("Sign images").expect("desc");
        stack.begin_task("lwm2m").expect("member");
        let task = stack.end_task().expect("end member");
        assert_eq!(task.name, "sign:lwm2m");
        assert_eq!(task.family.as_deref(), Some("sign"));
        let (base, description) = stack.end_family().expect("end family").build();
        assert_eq!(base, "sign");
        assert_eq!(description.as_deref(), Some("Sign images"));
    }

    #[test]
    fn nesting_rules_are_enforced() {
        let mut stack = stack_at(Path::new("/proj"));
        stack.begin_task("outer").expect("outer");
        assert!(stack.begin_task("inner").is_err());
        assert!(stack.begin_family("fam").is_err());
        assert!(stack.end_family().is_err());
        stack.end_task().expect("outer still open");
        assert!(stack.end_task().is_err());
        assert!(stack.begin_family("a:b").is_err());
        assert!(stack.set_verbosity(1).is_err());
    }

    #[test]
    fn ensure_root_fails_inside_scopes() {
        let mut stack = stack_at(Path::new("/proj"));
        assert!(stack.ensure_root("purge()").is_ok());
        stack.begin_family("fam").expect("family");
        assert!(stack.ensure_root("purge()").is_err());
    }

    #[test]
    fn invalid_verbosity_is_rejected() {
        let mut stack = stack_at(Path::new("/proj"));
        stack.begin_task("t").expect("begin");
        assert!(stack.set_verbosity(3).is_err());
    }

    #[test]
    fn abort_discards_open_scope() {
        let mut stack = stack_at(Path::new("/proj"));
        stack.begin_task("half").expect("begin");
        stack.abort();
        assert!(stack.end_task().is_err());
        stack.abort();
        stack.begin_task("next").expect("root still usable");
    }
}
