pub mod guard;
pub mod tree;

pub use guard::PathGuard;
pub use tree::TreeNode;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub type Result<T> = std::result::Result<T, WorkspaceError>;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Path-scoped file operations over the workspace root.
#[derive(Debug, Clone)]
pub struct Workspace {
    guard: Arc<PathGuard>,
}

impl Workspace {
    pub fn open_root(root: impl AsRef<Path>) -> Result<Self> {
        let guard = PathGuard::new(root)?;
        info!("Workspace root: {}", guard.root().display());
        Ok(Self {
            guard: Arc::new(guard),
        })
    }

    pub fn root(&self) -> &Path {
        self.guard.root()
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    pub async fn tree(&self) -> Result<TreeNode> {
        let guard = self.guard.clone();
        tokio::task::spawn_blocking(move || tree::build_tree(&guard))
            .await
            .map_err(|e| WorkspaceError::Io(std::io::Error::other(e)))?
    }

    pub async fn read(&self, path: &str) -> Result<String> {
        let target = self.guard.resolve(path)?;
        match tokio::fs::metadata(&target).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(WorkspaceError::NotFound(path.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkspaceError::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        let bytes = tokio::fs::read(&target).await?;
        debug!("Read {} bytes from {}", bytes.len(), target.display());
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn write(&self, path: &str, content: &[u8]) -> Result<PathBuf> {
        let target = self.guard.resolve(path)?;
        if target == self.guard.root() {
            return Err(WorkspaceError::InvalidPath(path.to_string()));
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        debug!("Wrote {} bytes to {}", content.len(), target.display());
        Ok(target)
    }

    /// Stores an uploaded file as `dest/filename` and returns its
    /// workspace-relative path. Only the final component of `filename`
    /// is used.
    pub async fn store_upload(&self, dest: &str, filename: &str, content: &[u8]) -> Result<String> {
        let name = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| WorkspaceError::InvalidPath(filename.to_string()))?;

        let dest = dest.trim_matches('/');
        let relative = if dest.is_empty() {
            name
        } else {
            format!("{}/{}", dest, name)
        };

        let target = self.write(&relative, content).await?;
        Ok(self.guard.relative(&target))
    }
}
