//! Double-buffered base files.
//!
//! Each table has two base files, `.baseA` and `.baseB`. A base holds
//! the root of one committed revision: the revision number, block
//! accounting, and the leaf directory. Committing a new revision writes
//! the base slot *not* currently in use, so the previous revision stays
//! readable throughout. A CRC32 trailer detects torn writes; an invalid
//! base is simply ignored in favor of its sibling.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::table::leaf::LeafRef;
use crate::util::pack::{pack_bytes, pack_uint, unpack_bytes, unpack_uint};

const BASE_MAGIC: &[u8] = b"ShaleTbl";
const BASE_FORMAT: u64 = 1;

/// Which of the two base slots a revision lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseSlot {
    A,
    B,
}

impl BaseSlot {
    /// The sibling slot.
    pub fn other(self) -> BaseSlot {
        match self {
            BaseSlot::A => BaseSlot::B,
            BaseSlot::B => BaseSlot::A,
        }
    }

    /// File-name suffix for this slot.
    pub fn suffix(self) -> &'static str {
        match self {
            BaseSlot::A => ".baseA",
            BaseSlot::B => ".baseB",
        }
    }

    /// Path of this slot's base file for the table at `stem`.
    pub fn path(self, stem: &Path) -> PathBuf {
        let mut name = stem.as_os_str().to_os_string();
        name.push(self.suffix());
        PathBuf::from(name)
    }
}

/// The decoded contents of one base file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseFile {
    pub revision: u64,
    pub block_size: u32,
    pub next_block: u32,
    pub entry_count: u64,
    pub leaves: Vec<LeafRef>,
}

impl BaseFile {
    /// An empty base at revision zero.
    pub fn empty(block_size: u32) -> Self {
        BaseFile {
            revision: 0,
            block_size,
            next_block: 0,
            entry_count: 0,
            leaves: Vec::new(),
        }
    }

    /// Serialize, including the CRC32 trailer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(BASE_MAGIC);
        pack_uint(&mut buf, BASE_FORMAT);
        pack_uint(&mut buf, self.revision);
        pack_uint(&mut buf, u64::from(self.block_size));
        pack_uint(&mut buf, u64::from(self.next_block));
        pack_uint(&mut buf, self.entry_count);
        pack_uint(&mut buf, self.leaves.len() as u64);
        for leaf in &self.leaves {
            pack_bytes(&mut buf, &leaf.first_key);
            pack_uint(&mut buf, u64::from(leaf.block));
            pack_uint(&mut buf, u64::from(leaf.len));
            pack_uint(&mut buf, leaf.entries);
        }
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decode base bytes; `None` if the magic, layout or CRC is wrong.
    pub fn decode(bytes: &[u8]) -> Option<BaseFile> {
        if bytes.len() < BASE_MAGIC.len() + 4 {
            return None;
        }
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let crc = u32::from_le_bytes(crc_bytes.try_into().ok()?);
        if crc32fast::hash(body) != crc {
            return None;
        }
        if &body[..BASE_MAGIC.len()] != BASE_MAGIC {
            return None;
        }

        let mut rest = &body[BASE_MAGIC.len()..];
        let decode = |rest: &mut &[u8]| -> Result<BaseFile> {
            let format = unpack_uint(rest)?;
            if format != BASE_FORMAT {
                return Err(crate::error::ShaleError::corrupt("unknown base format"));
            }
            let revision = unpack_uint(rest)?;
            let block_size = unpack_uint(rest)? as u32;
            let next_block = unpack_uint(rest)? as u32;
            let entry_count = unpack_uint(rest)?;
            let n_leaves = unpack_uint(rest)? as usize;
            let mut leaves = Vec::with_capacity(n_leaves);
            for _ in 0..n_leaves {
                let first_key = unpack_bytes(rest)?;
                let block = unpack_uint(rest)? as u32;
                let len = unpack_uint(rest)? as u32;
                let entries = unpack_uint(rest)?;
                leaves.push(LeafRef {
                    first_key,
                    block,
                    len,
                    entries,
                });
            }
            Ok(BaseFile {
                revision,
                block_size,
                next_block,
                entry_count,
                leaves,
            })
        };
        decode(&mut rest).ok().filter(|_| rest.is_empty())
    }

    /// Read the base in `slot` for the table at `stem`; `None` when the
    /// file is missing or fails validation.
    pub fn read(stem: &Path, slot: BaseSlot) -> Result<Option<BaseFile>> {
        let path = slot.path(stem);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(BaseFile::decode(&buf))
    }

    /// Durably write this base into `slot` for the table at `stem`.
    pub fn write(&self, stem: &Path, slot: BaseSlot) -> Result<()> {
        let path = slot.path(stem);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(&self.encode())?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> BaseFile {
        BaseFile {
            revision: 42,
            block_size: 8192,
            next_block: 7,
            entry_count: 123,
            leaves: vec![
                LeafRef {
                    first_key: b"aardvark".to_vec(),
                    block: 2,
                    len: 5000,
                    entries: 40,
                },
                LeafRef {
                    first_key: b"molehill".to_vec(),
                    block: 5,
                    len: 900,
                    entries: 83,
                },
            ],
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let base = sample();
        let decoded = BaseFile::decode(&base.encode()).unwrap();
        assert_eq!(decoded, base);
    }

    #[test]
    fn test_corrupt_crc_rejected() {
        let mut bytes = sample().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(BaseFile::decode(&bytes).is_none());
    }

    #[test]
    fn test_truncated_base_rejected() {
        let bytes = sample().encode();
        assert!(BaseFile::decode(&bytes[..bytes.len() / 2]).is_none());
        assert!(BaseFile::decode(b"").is_none());
    }

    #[test]
    fn test_read_write_both_slots() {
        let dir = TempDir::new().unwrap();
        let stem = dir.path().join("postlist");

        let base = sample();
        base.write(&stem, BaseSlot::A).unwrap();

        let mut newer = sample();
        newer.revision = 43;
        newer.write(&stem, BaseSlot::B).unwrap();

        assert_eq!(BaseFile::read(&stem, BaseSlot::A).unwrap().unwrap(), base);
        assert_eq!(BaseFile::read(&stem, BaseSlot::B).unwrap().unwrap(), newer);
    }

    #[test]
    fn test_missing_base_is_none() {
        let dir = TempDir::new().unwrap();
        let stem = dir.path().join("record");
        assert!(BaseFile::read(&stem, BaseSlot::A).unwrap().is_none());
    }
}
