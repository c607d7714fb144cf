use super::{Result, WorkspaceError};
use std::path::{Component, Path, PathBuf};

/// Resolves client-supplied relative paths against a fixed workspace root
/// and rejects anything that lands outside it.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// Creates the root if needed and canonicalizes it once.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// An empty path means the root itself. `.`/`..` and symlinks are
    /// resolved for the part of the path that exists; the rest is folded
    /// lexically.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let candidate = self.root.join(relative);

        let (existing, tail) = split_existing(&candidate);
        let mut resolved = existing.canonicalize()?;

        for component in tail.components() {
            match component {
                Component::Normal(segment) => resolved.push(segment),
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) => {
                    return Err(WorkspaceError::InvalidPath(relative.to_string()))
                }
            }
        }

        if resolved == self.root || resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(WorkspaceError::InvalidPath(relative.to_string()))
        }
    }

    /// Forward-slash path of `absolute` relative to the root.
    pub fn relative(&self, absolute: &Path) -> String {
        absolute
            .strip_prefix(&self.root)
            .unwrap_or(absolute)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Splits `path` into its longest existing ancestor and the remainder.
fn split_existing(path: &Path) -> (PathBuf, PathBuf) {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();

    while !existing.exists() {
        match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                existing = parent.to_path_buf();
            }
            // `..` or `.` as the last component: step up without a name.
            (None, Some(parent)) => {
                tail.push(existing.components().next_back().map_or_else(
                    Default::default,
                    |c| c.as_os_str().to_os_string(),
                ));
                existing = parent.to_path_buf();
            }
            (_, None) => break,
        }
    }

    let tail: PathBuf = tail.into_iter().rev().collect();
    (existing, tail)
}
