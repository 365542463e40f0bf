//! The `iamshale` version file.
//!
//! A tiny on-disk marker written once when a database is created. It
//! identifies the directory as a shale database of a supported format
//! version and carries the UUID that names this physical database
//! instance for replication.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{Result, ShaleError};

/// File name of the version marker inside a database directory.
pub const VERSION_FILE_NAME: &str = "iamshale";

const VERSION_MAGIC: &[u8] = b"IAmShale";
const FORMAT_VERSION: u8 = 1;

/// Handle for the version file of one database directory.
#[derive(Debug)]
pub struct VersionFile {
    path: PathBuf,
    uuid: Option<Uuid>,
}

impl VersionFile {
    /// Create a handle for the version file in `dir`. No I/O happens
    /// until [`create`](Self::create) or
    /// [`read_and_check`](Self::read_and_check) is called.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        VersionFile {
            path: dir.as_ref().join(VERSION_FILE_NAME),
            uuid: None,
        }
    }

    /// Write a fresh version file with a newly generated UUID,
    /// replacing any existing one.
    pub fn create(&mut self) -> Result<()> {
        let uuid = Uuid::new_v4();
        let mut buf = Vec::with_capacity(VERSION_MAGIC.len() + 1 + 16);
        buf.extend_from_slice(VERSION_MAGIC);
        buf.push(FORMAT_VERSION);
        buf.extend_from_slice(uuid.as_bytes());

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(&buf)?;
        file.sync_all()?;

        self.uuid = Some(uuid);
        Ok(())
    }

    /// Read the version file and validate the magic and format version.
    pub fn read_and_check(&mut self) -> Result<()> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ShaleError::opening(format!(
                    "No version file found at {}",
                    self.path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        if buf.len() != VERSION_MAGIC.len() + 1 + 16 {
            return Err(ShaleError::corrupt(format!(
                "Version file {} has unexpected size",
                self.path.display()
            )));
        }
        if &buf[..VERSION_MAGIC.len()] != VERSION_MAGIC {
            return Err(ShaleError::corrupt(format!(
                "Version file {} does not contain the expected magic string",
                self.path.display()
            )));
        }
        let format = buf[VERSION_MAGIC.len()];
        if format != FORMAT_VERSION {
            return Err(ShaleError::corrupt(format!(
                "Version file {} is format {format}, expected {FORMAT_VERSION}",
                self.path.display()
            )));
        }

        let mut uuid_bytes = [0u8; 16];
        uuid_bytes.copy_from_slice(&buf[VERSION_MAGIC.len() + 1..]);
        self.uuid = Some(Uuid::from_bytes(uuid_bytes));
        Ok(())
    }

    /// The UUID identifying this physical database instance.
    ///
    /// Only valid after a successful [`create`](Self::create) or
    /// [`read_and_check`](Self::read_and_check).
    pub fn uuid(&self) -> Uuid {
        self.uuid.unwrap_or_else(Uuid::nil)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_read() {
        let dir = TempDir::new().unwrap();

        let mut version = VersionFile::new(dir.path());
        version.create().unwrap();
        let created_uuid = version.uuid();
        assert!(!created_uuid.is_nil());

        let mut reread = VersionFile::new(dir.path());
        reread.read_and_check().unwrap();
        assert_eq!(reread.uuid(), created_uuid);
    }

    #[test]
    fn test_missing_file_is_opening_error() {
        let dir = TempDir::new().unwrap();
        let mut version = VersionFile::new(dir.path());
        match version.read_and_check() {
            Err(ShaleError::DatabaseOpening(_)) => {}
            other => panic!("expected DatabaseOpening, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(VERSION_FILE_NAME),
            b"NotShale\x01----------------",
        )
        .unwrap();

        let mut version = VersionFile::new(dir.path());
        match version.read_and_check() {
            Err(ShaleError::DatabaseCorrupt(_)) => {}
            other => panic!("expected DatabaseCorrupt, got {other:?}"),
        }
    }

    #[test]
    fn test_recreate_changes_uuid() {
        let dir = TempDir::new().unwrap();
        let mut version = VersionFile::new(dir.path());
        version.create().unwrap();
        let first = version.uuid();
        version.create().unwrap();
        assert_ne!(version.uuid(), first);
    }
}
