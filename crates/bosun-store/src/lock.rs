use crate::{io_at, StoreError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Exclusive advisory lock on a file, released on drop.
///
/// Serialises read-modify-write cycles between bosun processes (CLI, server,
/// hook invocations). It does not protect readers; those rely on atomic
/// replace.
pub struct StoreLock {
    lock_file: File,
}

impl StoreLock {
    fn open(lock_path: &Path) -> Result<File, StoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(io_at("create directory", parent))?;
        }
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
            .map_err(io_at("open lock file", lock_path))
    }

    pub fn acquire(lock_path: &Path) -> Result<Self, StoreError> {
        let file = Self::open(lock_path)?;
        file.lock_exclusive()
            .map_err(|e| StoreError::LockFailed(format!("{}: {e}", lock_path.display())))?;
        Ok(Self { lock_file: file })
    }

    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, StoreError> {
        let file = Self::open(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}
