//! Path sandbox.
//!
//! Resolves client-supplied paths against one canonical root directory and
//! rejects anything that would land outside it.

use std::path::{Component, Path, PathBuf};

use crate::error::{ConduitError, Result};

/// The directory tree the file service may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Canonicalize `root` once. Fails when the root does not exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = std::fs::canonicalize(root.as_ref())?;
        Ok(Self { root })
    }

    /// The canonical root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client path to an absolute path inside the root.
    ///
    /// Relative paths are joined onto the root. Absolute paths are accepted
    /// only when they already point inside it. `..` is resolved lexically
    /// before the containment check, which compares whole components so a
    /// sibling sharing the root's name as a prefix never matches.
    pub fn resolve(&self, client_path: &str) -> Result<PathBuf> {
        let joined = self.root.join(client_path);
        let resolved = normalize(&joined);
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(ConduitError::Forbidden)
        }
    }
}

/// Lexically remove `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sandbox() -> (TempDir, Sandbox) {
        let dir = TempDir::new().unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        (dir, sandbox)
    }

    #[test]
    fn test_root_is_canonical() {
        let (dir, sandbox) = sandbox();
        assert_eq!(sandbox.root(), std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_missing_root_fails() {
        let dir = TempDir::new().unwrap();
        assert!(Sandbox::new(dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_relative_paths_resolve_inside() {
        let (_dir, sandbox) = sandbox();
        let root = sandbox.root().to_path_buf();

        assert_eq!(sandbox.resolve("").unwrap(), root);
        assert_eq!(sandbox.resolve(".").unwrap(), root);
        assert_eq!(sandbox.resolve("a/b.txt").unwrap(), root.join("a").join("b.txt"));
        assert_eq!(sandbox.resolve("a/../b").unwrap(), root.join("b"));
        assert_eq!(sandbox.resolve("./a/./b").unwrap(), root.join("a").join("b"));
    }

    #[test]
    fn test_traversal_is_forbidden() {
        let (_dir, sandbox) = sandbox();
        for path in ["..", "../", "../etc/passwd", "a/../../x", "a/b/../../../"] {
            assert!(
                matches!(sandbox.resolve(path), Err(ConduitError::Forbidden)),
                "{path} should be forbidden"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_absolute_paths() {
        let (_dir, sandbox) = sandbox();
        assert!(matches!(
            sandbox.resolve("/etc/passwd"),
            Err(ConduitError::Forbidden)
        ));

        let inside = sandbox.root().join("notes.md");
        assert_eq!(sandbox.resolve(inside.to_str().unwrap()).unwrap(), inside);
    }

    #[test]
    fn test_sibling_with_common_prefix_is_forbidden() {
        let parent = TempDir::new().unwrap();
        let root = parent.path().join("alice");
        let sibling = parent.path().join("alice2");
        std::fs::create_dir(&root).unwrap();
        std::fs::create_dir(&sibling).unwrap();

        let sandbox = Sandbox::new(&root).unwrap();
        assert!(matches!(
            sandbox.resolve("../alice2/secret"),
            Err(ConduitError::Forbidden)
        ));

        let sibling = std::fs::canonicalize(&sibling).unwrap().join("secret");
        assert!(matches!(
            sandbox.resolve(sibling.to_str().unwrap()),
            Err(ConduitError::Forbidden)
        ));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("/../..")), PathBuf::from("/"));
    }
}
