use rhai::{EvalAltResult, Position};
use std::path::{Component, Path, PathBuf};

pub(crate) fn leaf_name(path: &str) -> &str {
    path.rsplit(':').next().unwrap_or(path)
}

pub(crate) fn member_name(base: &str, variant: &str) -> String {
    format!("{}:{}", base, variant)
}

pub(crate) fn context_error(msg: impl Into<String>) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(msg.into().into(), Position::NONE).into()
}

/// Lexically removes `.` and `..` components; never touches the filesystem,
/// since targets usually do not exist yet.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Joins `raw` onto `root` unless it is already absolute, then normalizes.
pub fn resolve_path(root: &Path, raw: &str) -> PathBuf {
    let raw = Path::new(raw.trim());
    if raw.is_absolute() {
        normalize_path(raw)
    } else {
        normalize_path(&root.join(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_name_is_variant() {
        assert_eq!(leaf_name("sign:lwm2m"), "lwm2m");
        assert_eq!(leaf_name("public_key"), "public_key");
    }

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(
            normalize_path(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
        assert_eq!(normalize_path(Path::new("../x")), PathBuf::from("../x"));
        assert_eq!(normalize_path(Path::new("/..")), PathBuf::from("/"));
        assert_eq!(normalize_path(Path::new("./")), PathBuf::from("."));
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        let root = Path::new("/project");
        assert_eq!(resolve_path(root, "keys/a.pem"), PathBuf::from("/project/keys/a.pem"));
        assert_eq!(resolve_path(root, "/tmp/b"), PathBuf::from("/tmp/b"));
    }
}
