use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod filesystem;

pub use filesystem::{FilesystemStorage, WorkingDir};

/// Staging area failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("staging root '{}' cannot be created: {source}", path.display())]
    RootUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A directory tree that jobs stage their objects under
pub trait StagingArea: Send + Sync + std::fmt::Debug {
    fn root(&self) -> &Path;

    /// Create `name` below the root if missing
    fn ensure_subdir(&self, name: &str) -> StorageResult<PathBuf> {
        let path = self.root().join(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// A new, uniquely named directory `subdir/{prefix}XXXXXX`, removed when dropped
    fn unique_dir(&self, subdir: &str, prefix: &str) -> StorageResult<tempfile::TempDir> {
        let parent = self.ensure_subdir(subdir)?;
        Ok(tempfile::Builder::new().prefix(prefix).tempdir_in(&parent)?)
    }
}
