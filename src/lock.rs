//! Named reader/writer locks shared across processes.
//!
//! Each lock is backed by a `.<name>.lock` file and an OS advisory lock
//! (`flock` on Unix, `LockFileEx` on Windows). Any number of processes may
//! hold the shared lock at once; the exclusive lock excludes everyone.
//! Acquisition blocks without a timeout.
//!
//! A [`RwFileLock`] value refuses to be acquired twice before release,
//! which turns a self-deadlock into a [`Error::LockMisuse`] error.

use fs4::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    fn as_str(self) -> &'static str {
        match self {
            LockMode::Shared => "shared",
            LockMode::Exclusive => "exclusive",
        }
    }
}

/// Lock file path for a resource called `name` inside `dir`
pub fn lock_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!(".{}.lock", name))
}

#[derive(Debug)]
pub struct RwFileLock {
    name: String,
    path: PathBuf,
    held: Arc<AtomicBool>,
}

impl RwFileLock {
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: lock_path(dir, name),
            held: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this loader currently holds the lock
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Block until the shared lock is held
    pub fn read(&self) -> Result<LockGuard> {
        self.acquire(LockMode::Shared)
    }

    /// Block until the exclusive lock is held
    pub fn write(&self) -> Result<LockGuard> {
        self.acquire(LockMode::Exclusive)
    }

    /// Take the exclusive lock if nobody else holds it.
    ///
    /// Fails with `LockBusy` when another process owns the lock.
    pub fn try_write(&self) -> Result<LockGuard> {
        self.mark_held()?;
        let file = match self.open() {
            Ok(file) => file,
            Err(e) => {
                self.held.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!(lock = %self.name, mode = "exclusive", "lock acquired");
                Ok(self.guard(file, LockMode::Exclusive))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.held.store(false, Ordering::SeqCst);
                debug!(lock = %self.name, "lock busy");
                Err(Error::LockBusy {
                    name: self.name.clone(),
                })
            }
            Err(e) => {
                self.held.store(false, Ordering::SeqCst);
                Err(Error::io(
                    format!("Failed to lock {}", self.path.display()),
                    e,
                ))
            }
        }
    }

    fn acquire(&self, mode: LockMode) -> Result<LockGuard> {
        self.mark_held()?;

        let locked = self.open().and_then(|file| {
            let res = match mode {
                LockMode::Shared => FileExt::lock_shared(&file),
                LockMode::Exclusive => FileExt::lock_exclusive(&file),
            };
            res.map(|()| file).map_err(|e| {
                Error::io(format!("Failed to lock {}", self.path.display()), e)
            })
        });

        match locked {
            Ok(file) => {
                debug!(lock = %self.name, mode = mode.as_str(), "lock acquired");
                Ok(self.guard(file, mode))
            }
            Err(e) => {
                self.held.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn mark_held(&self) -> Result<()> {
        self.held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| Error::LockMisuse {
                name: self.name.clone(),
                detail: "already locked by this loader",
            })
    }

    fn open(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::io(
                    format!("Failed to create lock directory {}", parent.display()),
                    e,
                )
            })?;
        }

        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| Error::io(format!("Failed to open lock {}", self.path.display()), e))
    }

    fn guard(&self, file: File, mode: LockMode) -> LockGuard {
        LockGuard {
            name: self.name.clone(),
            mode,
            file: Some(file),
            held: Arc::clone(&self.held),
        }
    }
}

/// Held lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct LockGuard {
    name: String,
    mode: LockMode,
    file: Option<File>,
    held: Arc<AtomicBool>,
}

impl LockGuard {
    /// Release now, reporting failures that `Drop` would swallow
    pub fn release(mut self) -> Result<()> {
        self.unlock()
    }

    fn unlock(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };

        if !self.held.swap(false, Ordering::SeqCst) {
            return Err(Error::LockMisuse {
                name: self.name.clone(),
                detail: "released without being held",
            });
        }

        FileExt::unlock(&file)
            .map_err(|e| Error::io(format!("Failed to unlock {}", self.name), e))?;
        debug!(lock = %self.name, mode = self.mode.as_str(), "lock released");
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.unlock() {
            // Closing the file drops the OS lock anyway
            warn!(lock = %self.name, error = %e, "failed to release lock cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_lock_file_is_named_after_resource() {
        let temp = TempDir::new().unwrap();
        let lock = RwFileLock::new(temp.path(), "metadata");
        let guard = lock.write().unwrap();
        assert!(temp.path().join(".metadata.lock").exists());
        guard.release().unwrap();
    }

    #[test]
    fn test_reacquire_same_loader_is_misuse() {
        let temp = TempDir::new().unwrap();
        let lock = RwFileLock::new(temp.path(), "hashmap");

        let _guard = lock.read().unwrap();
        assert!(lock.is_held());

        let err = lock.write().unwrap_err();
        assert!(matches!(err, Error::LockMisuse { .. }));
        let err = lock.read().unwrap_err();
        assert!(matches!(err, Error::LockMisuse { .. }));
    }

    #[test]
    fn test_release_allows_reacquire() {
        let temp = TempDir::new().unwrap();
        let lock = RwFileLock::new(temp.path(), "hashmap");

        lock.write().unwrap().release().unwrap();
        assert!(!lock.is_held());
        drop(lock.read().unwrap());
        assert!(!lock.is_held());
        assert!(lock.write().is_ok());
    }

    #[test]
    fn test_shared_locks_coexist() {
        let temp = TempDir::new().unwrap();
        let a = RwFileLock::new(temp.path(), "hashmap");
        let b = RwFileLock::new(temp.path(), "hashmap");

        let _ga = a.read().unwrap();
        let _gb = b.read().unwrap();
    }

    #[test]
    fn test_try_write_reports_busy() {
        let temp = TempDir::new().unwrap();
        let a = RwFileLock::new(temp.path(), "run");
        let b = RwFileLock::new(temp.path(), "run");

        let guard = a.write().unwrap();
        assert!(matches!(
            b.try_write().unwrap_err(),
            Error::LockBusy { .. }
        ));
        assert!(!b.is_held());

        drop(guard);
        b.try_write().unwrap().release().unwrap();
    }

    #[test]
    fn test_writer_waits_for_reader() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();

        let reader = RwFileLock::new(&dir, "hashmap");
        let read_guard = reader.read().unwrap();

        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let writer = RwFileLock::new(&dir, "hashmap");
            let _guard = writer.write().unwrap();
            tx.send(()).unwrap();
        });

        // Writer must still be blocked while the shared lock is held
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        drop(read_guard);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
    }
}
