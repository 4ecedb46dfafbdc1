use crate::storage::{StagingArea, StorageError, StorageResult};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Subdirectory of the storage root holding job working directories
pub const JOBS_DIR: &str = "jobs";

/// Filesystem-based staging area
///
/// Every job gets its own working directory below `{root}/jobs`.
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    root_path: PathBuf,
}

impl FilesystemStorage {
    /// Create a new filesystem storage backend with the given root path
    pub fn new<P: AsRef<Path>>(root_path: P) -> StorageResult<Self> {
        let root_path = root_path.as_ref().to_path_buf();

        if !root_path.exists() {
            std::fs::create_dir_all(&root_path).map_err(|source| StorageError::RootUnavailable {
                path: root_path.clone(),
                source,
            })?;
        }

        // Keep the path as given; canonicalizing resolves symlinks such as
        // /var -> /private/var and breaks prefix comparisons against it.
        Ok(Self { root_path })
    }

    /// Create a fresh, uniquely named working directory for one job
    pub fn create_working_dir(&self, job_id: Uuid) -> StorageResult<WorkingDir> {
        let prefix = format!("job_{}_", job_id);
        let dir = self.unique_dir(JOBS_DIR, &prefix)?;
        debug!("Created working directory {}", dir.path().display());
        Ok(WorkingDir { dir })
    }
}

impl StagingArea for FilesystemStorage {
    fn root(&self) -> &Path {
        &self.root_path
    }
}

/// A job's private working directory.
///
/// The directory is removed by [`WorkingDir::close`], or on drop as a last resort.
#[derive(Debug)]
pub struct WorkingDir {
    dir: tempfile::TempDir,
}

impl WorkingDir {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory and everything staged in it.
    ///
    /// Failures are logged and returned; they never affect the job result.
    pub fn close(self) -> StorageResult<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|e| {
            warn!("Failed to remove working directory {}: {}", path.display(), e);
            StorageError::Io(e)
        })?;
        debug!("Removed working directory {}", path.display());
        Ok(())
    }
}
