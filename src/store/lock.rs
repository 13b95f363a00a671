//! Advisory store lock: an OS file lock held on `<store>.lock`.
//!
//! Writers hold it exclusively, readers shared. The kernel drops the lock
//! when the holding process exits, so a killed writer never leaves the
//! store locked. The lock file itself stays on disk.

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{PileupError, Result};

/// Lock file path for a store.
pub fn lock_path(store: &Path) -> PathBuf {
    let mut name = store.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Whether a writer currently holds the store.
pub fn is_locked(store: &Path) -> bool {
    let Ok(file) = File::open(lock_path(store)) else {
        return false;
    };
    matches!(file.try_lock_shared(), Err(TryLockError::WouldBlock))
}

/// How a [`StoreLock`] is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// One writer, no readers.
    Exclusive,
    /// Any number of readers, no writer.
    Shared,
}

/// Held store lock, released when the guard drops.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
    mode: LockMode,
    _file: File,
}

impl StoreLock {
    /// Take the write lock for `store`, failing with `StoreBusy` if any
    /// reader or writer holds it.
    pub fn acquire(store: &Path) -> Result<Self> {
        Self::acquire_with(store, LockMode::Exclusive)
    }

    /// Take a read lock for `store`, failing with `StoreBusy` while a writer holds it.
    pub fn acquire_shared(store: &Path) -> Result<Self> {
        Self::acquire_with(store, LockMode::Shared)
    }

    fn acquire_with(store: &Path, mode: LockMode) -> Result<Self> {
        let path = lock_path(store);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| PileupError::io(&path, e))?;
        let attempt = match mode {
            LockMode::Exclusive => file.try_lock(),
            LockMode::Shared => file.try_lock_shared(),
        };
        match attempt {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(PileupError::StoreBusy {
                    path: store.to_path_buf(),
                    lock: path,
                })
            }
            Err(TryLockError::Error(e)) => return Err(PileupError::io(&path, e)),
        }
        debug!(lock = %path.display(), ?mode, "acquired store lock");
        Ok(Self {
            path,
            mode,
            _file: file,
        })
    }

    /// Lock file held by this guard.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exclusive for writers, shared for readers.
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        debug!(lock = %self.path.display(), mode = ?self.mode, "released store lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_busy_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("cohort.qplp");
        let guard = StoreLock::acquire(&store).unwrap();
        assert!(is_locked(&store));
        let err = StoreLock::acquire(&store).unwrap_err();
        assert!(matches!(err, PileupError::StoreBusy { .. }));
        drop(guard);
        assert!(!is_locked(&store));
        StoreLock::acquire(&store).unwrap();
    }

    #[test]
    fn readers_share_but_block_writers() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("cohort.qplp");
        let first = StoreLock::acquire_shared(&store).unwrap();
        let second = StoreLock::acquire_shared(&store).unwrap();
        assert_eq!(first.mode(), LockMode::Shared);
        assert!(!is_locked(&store));
        assert!(matches!(
            StoreLock::acquire(&store),
            Err(PileupError::StoreBusy { .. })
        ));
        drop((first, second));
        assert_eq!(StoreLock::acquire(&store).unwrap().mode(), LockMode::Exclusive);
    }

    #[test]
    fn leaked_file_alone_does_not_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("cohort.qplp");
        std::fs::write(lock_path(&store), b"12345\n").unwrap();
        assert!(!is_locked(&store));
        StoreLock::acquire(&store).unwrap();
    }

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            lock_path(Path::new("/data/a.qplp")),
            PathBuf::from("/data/a.qplp.lock")
        );
    }
}
