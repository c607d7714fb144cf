use crate::error::Result;
use crate::language::{LanguageSpec, StagePaths};
use std::path::Path;
use tempfile::TempDir;
use tracing::debug;

/// Exclusively-owned temporary directory for one execution.
///
/// Holds the generated source file and any compiler output. The directory
/// and everything in it is removed when the value is dropped, whichever way
/// the owning execution ends.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn create_in(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new().prefix("run-").tempdir_in(root)?;
        debug!("Allocated scratch dir: {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub async fn write_source(&self, spec: &LanguageSpec, code: &str) -> Result<StagePaths> {
        let paths = StagePaths::new(self.path(), &spec.source_filename);
        tokio::fs::write(&paths.source, code).await?;
        Ok(paths)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        debug!("Releasing scratch dir: {}", self.dir.path().display());
    }
}
