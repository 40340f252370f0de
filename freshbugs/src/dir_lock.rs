//! Exclusive lock over the stamp cache directory.
//!
//! Serializes whole invocations against each other so concurrent runs never
//! interleave reads and writes of the stamp file. The lock is a non-blocking
//! exclusive advisory lock on the directory's own descriptor: it dies with
//! the process, and a second invocation fails fast instead of queueing.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Errors from acquiring the cache directory lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("cache directory {} is locked by another freshbugs run", .path.display())]
    Busy { path: PathBuf },
    #[error("failed to lock cache directory {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A held lock on the cache directory.
///
/// Dropping the handle releases the lock, so it is released on every exit
/// path; `release` may also be called explicitly and is idempotent.
/// Acquisition is a constructor, so a handle can never re-acquire.
#[derive(Debug)]
pub struct CacheDirLock {
    handle: Option<File>,
    path: PathBuf,
}

impl CacheDirLock {
    /// Open `dir` for reading and take a non-blocking exclusive advisory
    /// lock on its descriptor. Fails immediately with [`LockError::Busy`]
    /// when any other handle holds the lock, in this process or another.
    pub fn acquire(dir: &Path) -> Result<Self, LockError> {
        let path = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());

        let handle = File::open(dir).map_err(|source| LockError::Io {
            path: path.clone(),
            source,
        })?;

        match handle.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                handle: Some(handle),
                path,
            }),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(LockError::Busy { path }),
            Err(source) => Err(LockError::Io { path, source }),
        }
    }

    /// Release the lock. No-op when already released.
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = FileExt::unlock(&handle);
        }
    }

    /// The locked directory, absolute where resolvable.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheDirLock {
    fn drop(&mut self) {
        self.release();
    }
}
