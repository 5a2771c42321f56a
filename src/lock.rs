//! Advisory write lock
//!
//! One writer per repository, enforced with an exclusive `flock`-style lock
//! on the `lock` file. The engine only asks "is the write lock held?"; the
//! lock itself is released when the guard is dropped.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::Result;
use crate::PackError;

/// Lock state a [`crate::pack::PackCollection`] checks before mutating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Unlocked,
    Write,
}

/// Held exclusive lock on a repository's lock file
#[derive(Debug)]
pub struct WriteLock {
    path: PathBuf,
    file: File,
}

impl WriteLock {
    /// Try to take the lock without blocking
    ///
    /// Fails with `LockContention` if anyone else holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive()
            .map_err(|_| PackError::LockContention(path.to_path_buf()))?;

        tracing::debug!(path = %path.display(), "write lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), "failed to release write lock: {}", e);
        }
    }
}
