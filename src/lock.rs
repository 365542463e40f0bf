//! The per-directory write lock.
//!
//! At most one writable database may exist per directory. The lock is a
//! file created exclusively; holding the open handle marks the
//! directory as locked, and releasing removes the file. Readers never
//! take the lock.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Result, ShaleError};

/// File name of the write lock inside a database directory.
pub const LOCK_FILE_NAME: &str = "shalelock";

/// Why a lock attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockFailure {
    /// Another writer already holds the lock.
    InUse,
    /// The filesystem does not support the locking primitive.
    Unsupported,
    /// The process is out of file descriptors.
    FdLimit,
    /// Some other failure; the payload explains it when known.
    Unknown(String),
}

/// The write lock for one database directory.
#[derive(Debug)]
pub struct WriteLock {
    path: PathBuf,
    handle: Option<File>,
}

impl WriteLock {
    /// Create an unheld lock handle for the database at `dir`.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        WriteLock {
            path: dir.as_ref().join(LOCK_FILE_NAME),
            handle: None,
        }
    }

    /// Attempt to take the lock, classifying any failure.
    pub fn acquire(&mut self) -> std::result::Result<(), LockFailure> {
        if self.handle.is_some() {
            return Ok(());
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => {
                self.handle = Some(file);
                Ok(())
            }
            Err(e) => Err(classify(e)),
        }
    }

    /// Whether this handle currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.handle.is_some()
    }

    /// Release the lock if held.
    pub fn release(&mut self) {
        if self.handle.take().is_some() {
            // Removal failure leaves a stale lock file; nothing useful
            // can be done about it here.
            let _ = std::fs::remove_file(&self.path);
        }
    }

    /// Take the lock or convert the failure into the appropriate error.
    ///
    /// When `creating` is false and the failure is unexplained, the
    /// caller may be pointing at a directory with no database at all;
    /// `database_missing` distinguishes that case.
    pub fn acquire_for_database(
        &mut self,
        dir: &Path,
        creating: bool,
        database_missing: bool,
    ) -> Result<()> {
        let failure = match self.acquire() {
            Ok(()) => return Ok(()),
            Err(f) => f,
        };

        if let LockFailure::Unknown(_) = &failure {
            if !creating && database_missing {
                return Err(ShaleError::opening(format!(
                    "No shale database found at path {}",
                    dir.display()
                )));
            }
        }

        let mut msg = format!("Unable to acquire database write lock on {}", dir.display());
        match failure {
            LockFailure::InUse => msg.push_str(": already locked"),
            LockFailure::Unsupported => {
                msg.push_str(": locking probably not supported by this FS")
            }
            LockFailure::FdLimit => msg.push_str(": too many open files"),
            LockFailure::Unknown(explanation) => {
                if !explanation.is_empty() {
                    msg.push_str(": ");
                    msg.push_str(&explanation);
                }
            }
        }
        Err(ShaleError::lock(msg))
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn classify(e: std::io::Error) -> LockFailure {
    match e.kind() {
        ErrorKind::AlreadyExists => LockFailure::InUse,
        ErrorKind::Unsupported => LockFailure::Unsupported,
        _ => {
            // EMFILE / ENFILE have no stable ErrorKind.
            if let Some(code) = e.raw_os_error() {
                if code == 23 || code == 24 {
                    return LockFailure::FdLimit;
                }
            }
            LockFailure::Unknown(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let mut lock = WriteLock::new(dir.path());

        lock.acquire().unwrap();
        assert!(lock.is_held());
        assert!(dir.path().join(LOCK_FILE_NAME).exists());

        lock.release();
        assert!(!lock.is_held());
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
    }

    #[test]
    fn test_second_writer_is_in_use() {
        let dir = TempDir::new().unwrap();
        let mut first = WriteLock::new(dir.path());
        first.acquire().unwrap();

        let mut second = WriteLock::new(dir.path());
        assert_eq!(second.acquire(), Err(LockFailure::InUse));
    }

    #[test]
    fn test_missing_directory_without_database_is_opening_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let mut lock = WriteLock::new(&missing);
        match lock.acquire_for_database(&missing, false, true) {
            Err(ShaleError::DatabaseOpening(_)) => {}
            other => panic!("expected DatabaseOpening, got {other:?}"),
        }
    }

    #[test]
    fn test_release_on_drop() {
        let dir = TempDir::new().unwrap();
        {
            let mut lock = WriteLock::new(dir.path());
            lock.acquire().unwrap();
        }
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
    }
}
