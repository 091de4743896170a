//! Working-directory confinement for path arguments

use std::path::{Component, Path, PathBuf};

/// A path argument that resolves outside the sandbox root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEscapeError {
    pub path: String,
    pub root: PathBuf,
}

impl std::fmt::Display for PathEscapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Path {} is outside the permitted working directory {}",
            self.path,
            self.root.display()
        )
    }
}

impl std::error::Error for PathEscapeError {}

/// The single directory every path argument must resolve inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// The root is taken as given; callers pass an absolute path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: normalize(&root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        if self.root.as_os_str().is_empty() {
            Path::new(".")
        } else {
            &self.root
        }
    }

    fn contains(&self, path: &Path) -> bool {
        path.is_absolute() == self.root.is_absolute()
            && path
                .strip_prefix(&self.root)
                .map(|rest| !rest.components().any(|c| c == Component::ParentDir))
                .unwrap_or(false)
    }

    /// Resolve `path` against the root.
    ///
    /// Steps:
    /// 1. Join relative paths to the root; `~` is an ordinary name here
    /// 2. Fold `.` and `..` lexically and reject anything outside the root;
    ///    nothing touches the filesystem for a path rejected here
    /// 3. Canonicalize the deepest existing ancestor and reject it if a
    ///    symlink leads outside the canonical root
    ///
    /// Returns the normalized path, absolute whenever the root is.
    pub async fn resolve(&self, path: &str) -> Result<PathBuf, PathEscapeError> {
        let requested = Path::new(path);
        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.root.join(requested)
        };
        let resolved = normalize(&joined);

        if !self.contains(&resolved) {
            return Err(self.escape(path));
        }

        if let Some(real) = canonical_ancestor(&resolved, &self.root).await {
            let real_root = tokio::fs::canonicalize(self.root())
                .await
                .unwrap_or_else(|_| self.root().to_path_buf());
            if !real.starts_with(&real_root) {
                return Err(self.escape(path));
            }
        }

        Ok(resolved)
    }

    fn escape(&self, path: &str) -> PathEscapeError {
        PathEscapeError {
            path: path.to_string(),
            root: self.root().to_path_buf(),
        }
    }
}

/// Lexically fold `.` and `..`; `..` at the filesystem root stays there,
/// leading `..` of a relative path is kept.
fn normalize(path: &Path) -> PathBuf {
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
    out
}

/// Canonical form of the closest existing ancestor of `path` at or below `root`.
async fn canonical_ancestor(path: &Path, root: &Path) -> Option<PathBuf> {
    let mut current = Some(path);
    while let Some(candidate) = current.filter(|c| c.starts_with(root)) {
        if tokio::fs::symlink_metadata(candidate).await.is_ok() {
            return tokio::fs::canonicalize(candidate).await.ok();
        }
        current = candidate.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize(Path::new("/a/../../b")), PathBuf::from("/b"));
        assert_eq!(normalize(Path::new("/")), PathBuf::from("/"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[tokio::test]
    async fn test_relative_root_is_kept_as_given() {
        let sandbox = Sandbox::new("./calculator");
        assert_eq!(sandbox.root(), Path::new("calculator"));
        assert_eq!(
            sandbox.resolve("main.py").await.unwrap(),
            PathBuf::from("calculator/main.py")
        );
        assert!(sandbox.resolve("../secret.txt").await.is_err());

        let current = Sandbox::new(".");
        assert_eq!(current.root(), Path::new("."));
        assert_eq!(current.resolve("main.py").await.unwrap(), PathBuf::from("main.py"));
        assert!(current.resolve("../secret.txt").await.is_err());
        assert!(current.resolve("pkg/../../secret.txt").await.is_err());
        assert!(current.resolve("/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_tilde_stays_under_root() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("~")).unwrap();
        fs::write(temp.path().join("~").join("notes.txt"), "notes").unwrap();

        let sandbox = Sandbox::new(temp.path());
        let path = sandbox.resolve("~/notes.txt").await.unwrap();
        assert_eq!(path, temp.path().join("~").join("notes.txt"));
        assert_eq!(sandbox.resolve("~").await.unwrap(), temp.path().join("~"));
    }

    #[tokio::test]
    async fn test_resolve_relative_inside() {
        let sandbox = Sandbox::new("/workspace");
        let path = sandbox.resolve("pkg/calculator.py").await.unwrap();
        assert_eq!(path, PathBuf::from("/workspace/pkg/calculator.py"));
    }

    #[tokio::test]
    async fn test_resolve_dot_is_root() {
        let sandbox = Sandbox::new("/workspace");
        assert_eq!(sandbox.resolve(".").await.unwrap(), PathBuf::from("/workspace"));
        assert_eq!(sandbox.resolve("").await.unwrap(), PathBuf::from("/workspace"));
    }

    #[tokio::test]
    async fn test_resolve_traversal_escape() {
        let sandbox = Sandbox::new("/workspace");
        let err = sandbox.resolve("../secret.txt").await.unwrap_err();
        assert_eq!(err.path, "../secret.txt");
        assert!(err.to_string().contains("outside the permitted working directory"));

        assert!(sandbox.resolve("../../etc/passwd").await.is_err());
        assert!(sandbox.resolve("pkg/../../secret.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_inner_traversal_allowed() {
        let sandbox = Sandbox::new("/workspace");
        let path = sandbox.resolve("pkg/../main.py").await.unwrap();
        assert_eq!(path, PathBuf::from("/workspace/main.py"));
    }

    #[tokio::test]
    async fn test_resolve_absolute() {
        let sandbox = Sandbox::new("/workspace");
        assert!(sandbox.resolve("/etc/passwd").await.is_err());
        assert!(sandbox.resolve("/workspace-other/file").await.is_err());
        assert_eq!(
            sandbox.resolve("/workspace/main.py").await.unwrap(),
            PathBuf::from("/workspace/main.py")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_symlink_escape() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        let outside = temp.path().join("outside");
        fs::create_dir(&root).unwrap();
        fs::create_dir(&outside).unwrap();
        fs::write(outside.join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let sandbox = Sandbox::new(&root);
        assert!(sandbox.resolve("link/secret.txt").await.is_err());
        assert!(sandbox.resolve("link/new.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_nonexistent_inside_real_root() {
        let temp = TempDir::new().unwrap();
        let sandbox = Sandbox::new(temp.path());
        let path = sandbox.resolve("new/dir/file.txt").await.unwrap();
        assert!(path.starts_with(sandbox.root()));
        assert!(path.ends_with("new/dir/file.txt"));
    }
}
