//! Advisory per-namespace file locks.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::ErrorCode;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("gave up waiting for {} after {waited:?}", path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("could not open lock file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LockError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Open { .. } => ErrorCode::StorageUnavailable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

/// Held lock on a namespace's `lock` file, released on drop.
///
/// Writers (`save`, `delete_before`) hold it exclusively; readers hold it
/// shared so a retention pass never removes a record mid-read.
#[derive(Debug)]
pub struct NamespaceLock {
    file: File,
    path: PathBuf,
    kind: LockKind,
}

impl NamespaceLock {
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if another holder keeps the lock past
    /// `timeout`, or [`LockError::Open`] if the lock file cannot be created.
    pub fn exclusive(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Self::acquire(path, timeout, LockKind::Exclusive)
    }

    /// # Errors
    ///
    /// Same as [`NamespaceLock::exclusive`].
    pub fn shared(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Self::acquire(path, timeout, LockKind::Shared)
    }

    fn acquire(path: &Path, timeout: Duration, kind: LockKind) -> Result<Self, LockError> {
        let open_err = |source| LockError::Open {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(open_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(open_err)?;

        let started = Instant::now();
        loop {
            let attempt = match kind {
                LockKind::Shared => FileExt::try_lock_shared(&file),
                LockKind::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            if attempt.is_ok() {
                tracing::trace!(path = %path.display(), ?kind, "namespace lock acquired");
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                    kind,
                });
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn kind(&self) -> LockKind {
        self.kind
    }
}

impl Drop for NamespaceLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    const SHORT: Duration = Duration::from_millis(30);

    #[test]
    fn exclusive_then_reacquire_after_drop() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("lock");

        let held = NamespaceLock::exclusive(&path, SHORT).expect("first");
        assert_eq!(held.kind(), LockKind::Exclusive);
        assert_eq!(held.path(), path.as_path());
        drop(held);

        NamespaceLock::exclusive(&path, SHORT).expect("second");
    }

    #[test]
    fn readers_share() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("lock");
        let _a = NamespaceLock::shared(&path, SHORT).expect("a");
        let _b = NamespaceLock::shared(&path, SHORT).expect("b");
    }

    #[test]
    fn writer_excludes_reader_and_writer() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("lock");
        let _held = NamespaceLock::exclusive(&path, SHORT).expect("held");

        let err = NamespaceLock::shared(&path, SHORT).expect_err("reader blocked");
        assert!(matches!(err, LockError::Timeout { ref path, .. } if path.ends_with("lock")));
        assert_eq!(err.code(), ErrorCode::LockContention);

        let err = NamespaceLock::exclusive(&path, SHORT).expect_err("writer blocked");
        assert!(matches!(err, LockError::Timeout { waited, .. } if waited >= SHORT));
    }

    #[test]
    fn reader_excludes_writer() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("lock");
        let _reader = NamespaceLock::shared(&path, SHORT).expect("reader");
        assert!(NamespaceLock::exclusive(&path, SHORT).is_err());
    }

    #[test]
    fn creates_namespace_dir() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("prod").join("lock");
        NamespaceLock::exclusive(&path, SHORT).expect("lock");
        assert!(path.is_file());
    }

    #[test]
    fn unopenable_path_is_storage_error() {
        let dir = TempDir::new().expect("tempdir");
        let blocker = dir.path().join("ns");
        fs::write(&blocker, "not a dir").expect("write");

        let err = NamespaceLock::exclusive(&blocker.join("lock"), SHORT).expect_err("open");
        assert!(matches!(err, LockError::Open { .. }));
        assert_eq!(err.code(), ErrorCode::StorageUnavailable);
    }

    #[test]
    fn waiter_proceeds_once_holder_releases() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("lock");
        let held = NamespaceLock::exclusive(&path, SHORT).expect("held");

        let (tx, rx) = mpsc::channel();
        let waiter_path = path.clone();
        let waiter = thread::spawn(move || {
            tx.send(()).expect("signal");
            NamespaceLock::exclusive(&waiter_path, Duration::from_secs(5)).map(|_| ())
        });

        rx.recv().expect("waiter started");
        thread::sleep(Duration::from_millis(50));
        drop(held);

        waiter.join().expect("join").expect("waiter acquires");
    }
}
