//! One build per working directory.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::ResourceError;

pub const LOCK_FILE: &str = ".liveforge.lock";

/// Exclusive advisory lock on a working directory, held for the run.
pub struct WorkDirLock {
    file: File,
    path: PathBuf,
}

impl WorkDirLock {
    /// Take the lock without waiting. A second build against the same
    /// directory fails fast with [`ResourceError::Busy`].
    pub fn try_acquire(work_dir: &Path) -> Result<Self, ResourceError> {
        let io_err = |source| ResourceError::Io {
            path: work_dir.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(work_dir).map_err(io_err)?;

        let path = work_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(_) => Err(ResourceError::Busy(work_dir.to_path_buf())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDirLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
