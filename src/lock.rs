//! Single-instance guard for a discovery pass.
//!
//! The lock is an advisory `flock` on a fixed path per pipeline and group.
//! The kernel drops it when the file descriptor closes, so it is released on
//! every way out of the process: normal return, error propagation, panic,
//! or a termination signal.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

#[derive(thiserror::Error, Debug)]
pub enum LockError {
    #[error("Another instance holds the lock {0:?}")]
    Locked(PathBuf),
    #[error("Failed to create lock file {0:?}")]
    CreateFailed(PathBuf, #[source] io::Error),
    #[error("Failed to acquire lock {0:?}")]
    AcquireFailed(PathBuf, #[source] io::Error),
}

/// Holds the exclusive lock until dropped.
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Take the lock at `path` without waiting.
    /// Fails with `LockError::Locked` if another process (or another guard
    /// in this process) already holds it.
    pub fn try_acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| LockError::CreateFailed(path.to_path_buf(), e))?;
        }
        // must not truncate: the current holder's pid lives in this file.
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| LockError::CreateFailed(path.to_path_buf(), e))?;

        // fully qualified, so newer std's File::try_lock_exclusive isn't picked up:
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                log::debug!("lock {path:?} is held by another process");
                return Err(LockError::Locked(path.to_path_buf()));
            }
            Err(e) => return Err(LockError::AcquireFailed(path.to_path_buf(), e)),
        }

        log::debug!("acquired lock {path:?}");
        if let Err(e) = record_holder(&mut file) {
            log::warn!("could not record pid in lock file {path:?}: {e}");
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn record_holder(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    file.flush()
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // closing the file would release it too; unlocking explicitly
        // keeps the release visible in debug logs.
        if let Err(e) = FileExt::unlock(&self.file) {
            log::debug!("failed to unlock {:?}: {e}", self.path);
        } else {
            log::debug!("released lock {:?}", self.path);
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("path", &self.path).finish()
    }
}
