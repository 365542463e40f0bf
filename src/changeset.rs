//! The binary changeset format.
//!
//! A changeset file `changes<N>` describes the block-level difference
//! between revision `N` and its successor across all six tables:
//!
//! - magic string, format version (packed)
//! - start revision, end revision (packed)
//! - one flag byte (0 = safe to apply to a live follower)
//! - per table, in the order termlist, synonym, spelling, record,
//!   position, postlist: a self-delimiting run of changed-block records
//!   followed by the table's new base image
//! - a trailing `\0` plus the packed end revision, appended only after
//!   the record table has committed
//!
//! A follower that finds the trailing revision missing can discard the
//! file: the sender had not yet made the end revision live.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Result, ShaleError};
use crate::util::pack::{read_uint, write_uint};

/// Magic string opening every changeset file.
pub const CHANGES_MAGIC: &[u8] = b"ShaleChanges";

/// Current changeset format version.
pub const CHANGES_VERSION: u64 = 1;

/// Record tag ending a table's changed-block run.
pub const CHANGES_END_OF_BLOCKS: u8 = 0;

/// Record tag introducing one changed block (block number, byte length,
/// block bytes).
pub const CHANGES_BLOCK: u8 = 1;

/// Record tag introducing a table's new base image (byte length, bytes).
pub const CHANGES_BASE: u8 = 2;

/// File name of the changeset starting at `revision`.
pub fn changeset_file_name(revision: u64) -> String {
    format!("changes{revision}")
}

/// Write the changeset header.
pub fn write_changeset_header<W: Write>(
    out: &mut W,
    start_revision: u64,
    end_revision: u64,
    dangerous: bool,
) -> Result<()> {
    out.write_all(CHANGES_MAGIC)?;
    write_uint(out, CHANGES_VERSION)?;
    write_uint(out, start_revision)?;
    write_uint(out, end_revision)?;
    write_uint(out, u64::from(dangerous))?;
    Ok(())
}

/// Parse a changeset header from a reader, returning the start and end
/// revisions. Any short read or mismatch is a [`ShaleError::Database`].
pub fn read_changeset_revisions<R: Read>(reader: &mut R) -> Result<(u64, u64)> {
    let mut magic = vec![0u8; CHANGES_MAGIC.len()];
    reader
        .read_exact(&mut magic)
        .map_err(|_| ShaleError::database("Changeset too short to hold the magic string"))?;
    if magic != CHANGES_MAGIC {
        return Err(ShaleError::database(
            "Changeset does not contain valid magic string",
        ));
    }

    let version = read_uint(reader)
        .map_err(|_| ShaleError::database("Couldn't read a valid version number for changeset"))?;
    if version != CHANGES_VERSION {
        return Err(ShaleError::database(format!(
            "Unsupported changeset version {version}"
        )));
    }

    let start = read_uint(reader)
        .map_err(|_| ShaleError::database("Couldn't read a valid start revision from changeset"))?;
    let end = read_uint(reader)
        .map_err(|_| ShaleError::database("Couldn't read a valid end revision for changeset"))?;
    Ok((start, end))
}

/// Read the start and end revisions from the changeset file at `path`.
pub fn get_changeset_revisions<P: AsRef<Path>>(path: P) -> Result<(u64, u64)> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| {
        ShaleError::database(format!("Couldn't open changeset {} to read: {e}", path.display()))
    })?;
    read_changeset_revisions(&mut file)
        .map_err(|e| ShaleError::database(format!("Changeset at {}: {e}", path.display())))
}
