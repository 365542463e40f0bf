//! The revision-numbered ordered key/value table.
//!
//! Each table owns one data file of copy-on-write blocks plus two
//! alternating base files (see [`base`]). Mutations are buffered in
//! memory; [`Table::flush_db`] appends the affected leaves as fresh
//! blocks, and [`Table::commit`] durably publishes a new revision by
//! writing the base slot not currently in use. Blocks belonging to a
//! committed revision are never rewritten, which is what makes readers
//! immune to a concurrent writer.
//!
//! Tables also know how to stream the set of blocks written since the
//! last commit, which is how changeset files are produced.

pub mod base;
pub mod leaf;

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::changeset::{CHANGES_BASE, CHANGES_BLOCK, CHANGES_END_OF_BLOCKS};
use crate::error::{Result, ShaleError};
use crate::table::base::{BaseFile, BaseSlot};
use crate::table::leaf::{decode_leaf, encode_leaf, split_into_leaves, LeafRef};
use crate::util::pack::write_uint;

/// Longest key a table accepts.
pub const KEY_LIMIT: usize = 252;

/// Block size used when none is configured.
pub const DEFAULT_BLOCK_SIZE: u32 = 8192;

const CACHE_LIMIT: usize = 1024;

type LeafEntries = Arc<Vec<(Vec<u8>, Vec<u8>)>>;

/// One of the six stores making up a database.
#[derive(Debug)]
pub struct Table {
    name: &'static str,
    stem: PathBuf,
    readonly: bool,
    inner: RwLock<Inner>,
}

#[derive(Debug)]
struct Inner {
    block_size: u32,
    /// Whether the table's files are open. A missing optional table
    /// stays unopened and reads as empty.
    open: bool,
    open_slot: Option<BaseSlot>,
    open_revision: u64,
    latest_revision: u64,
    next_block: u32,
    entry_count: u64,
    leaves: Vec<LeafRef>,
    buffer: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    changed_blocks: BTreeMap<u32, u32>,
    modified: bool,
    file: Option<File>,
    cache: AHashMap<u32, LeafEntries>,
}

impl Table {
    /// Create a handle for the table `name` under `dir`. No I/O happens
    /// until one of the open or create methods is called.
    pub fn new<P: AsRef<Path>>(dir: P, name: &'static str, readonly: bool) -> Self {
        Table {
            name,
            stem: dir.as_ref().join(name),
            readonly,
            inner: RwLock::new(Inner {
                block_size: DEFAULT_BLOCK_SIZE,
                open: false,
                open_slot: None,
                open_revision: 0,
                latest_revision: 0,
                next_block: 0,
                entry_count: 0,
                leaves: Vec::new(),
                buffer: BTreeMap::new(),
                changed_blocks: BTreeMap::new(),
                modified: false,
                file: None,
                cache: AHashMap::new(),
            }),
        }
    }

    /// The table's name (also its file-name stem).
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn db_path(&self) -> PathBuf {
        let mut name = self.stem.as_os_str().to_os_string();
        name.push(".DB");
        PathBuf::from(name)
    }

    /// Whether the table exists on disk.
    pub fn exists(&self) -> bool {
        self.db_path().exists()
            && (BaseSlot::A.path(&self.stem).exists() || BaseSlot::B.path(&self.stem).exists())
    }

    /// Create the table's files from scratch and open them at revision
    /// zero, discarding anything that was there before.
    pub fn create_and_open(&self, block_size: u32) -> Result<()> {
        if self.readonly {
            return Err(ShaleError::invalid_operation(format!(
                "Table {} is read-only",
                self.name
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.db_path())?;

        let base = BaseFile::empty(block_size);
        base.write(&self.stem, BaseSlot::A)?;
        let base_b = BaseSlot::B.path(&self.stem);
        if base_b.exists() {
            std::fs::remove_file(&base_b)?;
        }

        let mut inner = self.inner.write();
        inner.block_size = block_size;
        inner.open = true;
        inner.open_slot = Some(BaseSlot::A);
        inner.open_revision = 0;
        inner.latest_revision = 0;
        inner.next_block = 0;
        inner.entry_count = 0;
        inner.leaves.clear();
        inner.buffer.clear();
        inner.changed_blocks.clear();
        inner.modified = false;
        inner.file = Some(file);
        inner.cache.clear();
        Ok(())
    }

    /// Open the latest valid revision.
    pub fn open_latest(&self) -> Result<()> {
        let a = BaseFile::read(&self.stem, BaseSlot::A)?;
        let b = BaseFile::read(&self.stem, BaseSlot::B)?;

        let best = match (&a, &b) {
            (Some(a_base), Some(b_base)) => {
                if a_base.revision >= b_base.revision {
                    Some((a_base.clone(), BaseSlot::A))
                } else {
                    Some((b_base.clone(), BaseSlot::B))
                }
            }
            (Some(a_base), None) => Some((a_base.clone(), BaseSlot::A)),
            (None, Some(b_base)) => Some((b_base.clone(), BaseSlot::B)),
            (None, None) => None,
        };

        let (base, slot) = match best {
            Some(found) => found,
            None => {
                if !self.exists() {
                    return Err(ShaleError::opening(format!(
                        "Table {} does not exist at {}",
                        self.name,
                        self.stem.display()
                    )));
                }
                return Err(ShaleError::corrupt(format!(
                    "Table {} has no valid base file",
                    self.name
                )));
            }
        };

        let latest = base.revision;
        self.install(base, slot, latest)
    }

    /// Try to open the table at exactly `revision`.
    ///
    /// Returns `Ok(false)` if no valid base holds that revision. A table
    /// whose files are missing entirely opens vacuously as empty, so
    /// optional tables never block a consistent open.
    pub fn open_at(&self, revision: u64) -> Result<bool> {
        if !self.exists() {
            let mut inner = self.inner.write();
            inner.open = false;
            inner.open_slot = None;
            inner.open_revision = 0;
            inner.latest_revision = 0;
            inner.next_block = 0;
            inner.entry_count = 0;
            inner.leaves.clear();
            inner.buffer.clear();
            inner.changed_blocks.clear();
            inner.modified = false;
            inner.file = None;
            inner.cache.clear();
            return Ok(true);
        }

        let a = BaseFile::read(&self.stem, BaseSlot::A)?;
        let b = BaseFile::read(&self.stem, BaseSlot::B)?;
        let latest = a
            .as_ref()
            .map(|base| base.revision)
            .max(b.as_ref().map(|base| base.revision))
            .unwrap_or(0);

        let found = if a.as_ref().is_some_and(|base| base.revision == revision) {
            a.map(|base| (base, BaseSlot::A))
        } else if b.as_ref().is_some_and(|base| base.revision == revision) {
            b.map(|base| (base, BaseSlot::B))
        } else {
            None
        };

        match found {
            Some((base, slot)) => {
                self.install(base, slot, latest)?;
                Ok(true)
            }
            None => {
                self.inner.write().latest_revision = latest;
                Ok(false)
            }
        }
    }

    fn install(&self, base: BaseFile, slot: BaseSlot, latest: u64) -> Result<()> {
        let file = if self.readonly {
            File::open(self.db_path())?
        } else {
            OpenOptions::new().read(true).write(true).open(self.db_path())?
        };

        let mut inner = self.inner.write();
        inner.block_size = base.block_size;
        inner.open = true;
        inner.open_slot = Some(slot);
        inner.open_revision = base.revision;
        inner.latest_revision = latest;
        inner.next_block = base.next_block;
        inner.entry_count = base.entry_count;
        inner.leaves = base.leaves;
        inner.buffer.clear();
        inner.changed_blocks.clear();
        inner.modified = false;
        inner.file = Some(file);
        inner.cache.clear();
        Ok(())
    }

    /// Close the table's files. The handle can be reopened later.
    pub fn close(&self) {
        let mut inner = self.inner.write();
        inner.open = false;
        inner.file = None;
        inner.buffer.clear();
        inner.changed_blocks.clear();
        inner.cache.clear();
        inner.modified = false;
    }

    /// Whether the table's files are currently open.
    pub fn is_open(&self) -> bool {
        self.inner.read().open
    }

    /// Whether there are uncommitted modifications.
    pub fn is_modified(&self) -> bool {
        self.inner.read().modified
    }

    /// The revision this handle has open.
    pub fn open_revision(&self) -> u64 {
        self.inner.read().open_revision
    }

    /// The highest revision present in either base file, as of the last
    /// open or commit.
    pub fn latest_revision(&self) -> u64 {
        self.inner.read().latest_revision
    }

    /// The table's block size.
    pub fn block_size(&self) -> u32 {
        self.inner.read().block_size
    }

    /// Set the block size to use if the table is created lazily. Has no
    /// effect on an open table.
    pub fn set_block_size(&self, block_size: u32) {
        let mut inner = self.inner.write();
        if !inner.open {
            inner.block_size = block_size;
        }
    }

    /// Look up `key`, seeing buffered modifications first.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.write();
        if let Some(op) = inner.buffer.get(key) {
            return Ok(op.clone());
        }
        inner.disk_get(key)
    }

    /// Buffer an insert or replacement of `key`.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.readonly {
            return Err(ShaleError::invalid_operation(format!(
                "Table {} is read-only",
                self.name
            )));
        }
        if key.len() > KEY_LIMIT {
            return Err(ShaleError::database(format!(
                "Key too long for table {}: {} bytes",
                self.name,
                key.len()
            )));
        }
        let mut inner = self.inner.write();
        inner.buffer.insert(key.to_vec(), Some(value.to_vec()));
        inner.modified = true;
        Ok(())
    }

    /// Buffer a deletion of `key`. Deleting an absent key is a no-op at
    /// flush time.
    pub fn del(&self, key: &[u8]) -> Result<()> {
        if self.readonly {
            return Err(ShaleError::invalid_operation(format!(
                "Table {} is read-only",
                self.name
            )));
        }
        let mut inner = self.inner.write();
        inner.buffer.insert(key.to_vec(), None);
        inner.modified = true;
        Ok(())
    }

    /// Number of entries, counting buffered modifications.
    pub fn entry_count(&self) -> Result<u64> {
        let mut inner = self.inner.write();
        let mut count = inner.entry_count as i64;
        let ops: Vec<(Vec<u8>, bool)> = inner
            .buffer
            .iter()
            .map(|(k, v)| (k.clone(), v.is_some()))
            .collect();
        for (key, inserts) in ops {
            let on_disk = inner.disk_get(&key)?.is_some();
            match (inserts, on_disk) {
                (true, false) => count += 1,
                (false, true) => count -= 1,
                _ => {}
            }
        }
        Ok(count.max(0) as u64)
    }

    /// All entries whose key starts with `prefix`, in key order, with
    /// buffered modifications applied.
    pub fn prefix_entries(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut inner = self.inner.write();
        let upper = prefix_successor(prefix);

        let mut disk: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        if inner.open && !inner.leaves.is_empty() {
            let start = inner
                .leaves
                .partition_point(|leaf| leaf.first_key.as_slice() <= prefix)
                .saturating_sub(1);
            for i in start..inner.leaves.len() {
                let leaf = inner.leaves[i].clone();
                if let Some(up) = &upper {
                    if leaf.first_key.as_slice() >= up.as_slice() {
                        break;
                    }
                }
                let entries = inner.load_leaf(&leaf)?;
                for (key, value) in entries.iter() {
                    if key.as_slice() < prefix {
                        continue;
                    }
                    if let Some(up) = &upper {
                        if key.as_slice() >= up.as_slice() {
                            break;
                        }
                    }
                    disk.push((key.clone(), value.clone()));
                }
            }
        }

        // Merge the buffered range over the on-disk run; the buffer wins.
        let mut merged = Vec::with_capacity(disk.len());
        let mut disk_iter = disk.into_iter().peekable();
        for (key, op) in inner.buffer.range(prefix.to_vec()..) {
            if let Some(up) = &upper {
                if key.as_slice() >= up.as_slice() {
                    break;
                }
            }
            while let Some((dk, _)) = disk_iter.peek() {
                if dk.as_slice() < key.as_slice() {
                    let (dk, dv) = disk_iter.next().unwrap();
                    merged.push((dk, dv));
                } else {
                    break;
                }
            }
            if let Some((dk, _)) = disk_iter.peek() {
                if dk.as_slice() == key.as_slice() {
                    disk_iter.next();
                }
            }
            if let Some(value) = op {
                merged.push((key.clone(), value.clone()));
            }
        }
        merged.extend(disk_iter);
        Ok(merged)
    }

    /// Write all buffered modifications out as copy-on-write leaves.
    ///
    /// A no-op when the buffer is empty. The new leaves are not part of
    /// any committed revision until [`commit`](Self::commit) runs.
    pub fn flush_db(&self) -> Result<()> {
        if self.readonly {
            return Err(ShaleError::invalid_operation(format!(
                "Table {} is read-only",
                self.name
            )));
        }
        let mut inner = self.inner.write();
        inner.flush_locked(&self.db_path())
    }

    /// Durably publish `revision`, making the current leaf set its
    /// contents. Any still-buffered modifications are flushed first.
    ///
    /// When `changes` is given, the new base image is appended to it as
    /// a self-delimiting record, followed by `tail` if present.
    pub fn commit(
        &self,
        revision: u64,
        changes: Option<&mut dyn Write>,
        tail: Option<&[u8]>,
    ) -> Result<()> {
        if self.readonly {
            return Err(ShaleError::invalid_operation(format!(
                "Table {} is read-only",
                self.name
            )));
        }
        let mut inner = self.inner.write();
        if !inner.buffer.is_empty() {
            inner.flush_locked(&self.db_path())?;
        }

        if !inner.open && inner.file.is_none() {
            // An absent optional table that was never written stays
            // absent; there is nothing to publish.
            if let Some(w) = changes {
                if let Some(t) = tail {
                    w.write_all(t)?;
                }
            }
            return Ok(());
        }

        if revision <= inner.latest_revision {
            return Err(ShaleError::database(format!(
                "Commit revision {revision} for table {} is not above the latest revision {}",
                self.name, inner.latest_revision
            )));
        }

        let base = BaseFile {
            revision,
            block_size: inner.block_size,
            next_block: inner.next_block,
            entry_count: inner.entry_count,
            leaves: inner.leaves.clone(),
        };

        if let Some(file) = inner.file.as_mut() {
            file.sync_all()?;
        }
        let slot = inner.open_slot.map(BaseSlot::other).unwrap_or(BaseSlot::A);
        base.write(&self.stem, slot)?;

        if let Some(w) = changes {
            let bytes = base.encode();
            w.write_all(&[CHANGES_BASE])?;
            write_uint(w, bytes.len() as u64)?;
            w.write_all(&bytes)?;
            if let Some(t) = tail {
                w.write_all(t)?;
            }
        }

        inner.open = true;
        inner.open_slot = Some(slot);
        inner.open_revision = revision;
        inner.latest_revision = revision;
        inner.changed_blocks.clear();
        inner.modified = false;
        Ok(())
    }

    /// Drop all uncommitted modifications, restoring the state of the
    /// open revision.
    pub fn cancel(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.buffer.clear();
        inner.modified = false;
        if inner.changed_blocks.is_empty() {
            return Ok(());
        }

        // Leaves were flushed but never committed; reload the open base.
        match inner.open_slot {
            Some(slot) => {
                let base = BaseFile::read(&self.stem, slot)?.ok_or_else(|| {
                    ShaleError::corrupt(format!(
                        "Base file for table {} vanished during cancel",
                        self.name
                    ))
                })?;
                inner.leaves = base.leaves;
                inner.next_block = base.next_block;
                inner.entry_count = base.entry_count;
            }
            None => {
                // Lazily created and never committed: back to absent.
                inner.leaves.clear();
                inner.next_block = 0;
                inner.entry_count = 0;
                inner.open = false;
                inner.file = None;
            }
        }
        inner.changed_blocks.clear();
        inner.cache.clear();
        Ok(())
    }

    /// Stream the blocks written since the last commit as a
    /// self-delimiting record sequence.
    pub fn write_changed_blocks(&self, out: &mut dyn Write) -> Result<()> {
        let mut inner = self.inner.write();
        let blocks: Vec<(u32, u32)> = inner.changed_blocks.iter().map(|(b, l)| (*b, *l)).collect();
        for (block, len) in blocks {
            let bytes = inner.read_block(block, len)?;
            out.write_all(&[CHANGES_BLOCK])?;
            write_uint(out, u64::from(block))?;
            write_uint(out, u64::from(len))?;
            out.write_all(&bytes)?;
        }
        out.write_all(&[CHANGES_END_OF_BLOCKS])?;
        Ok(())
    }
}

impl Inner {
    fn disk_get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if !self.open || self.leaves.is_empty() {
            return Ok(None);
        }
        let idx = self
            .leaves
            .partition_point(|leaf| leaf.first_key.as_slice() <= key);
        if idx == 0 {
            return Ok(None);
        }
        let leaf = self.leaves[idx - 1].clone();
        let entries = self.load_leaf(&leaf)?;
        match entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
            Ok(pos) => Ok(Some(entries[pos].1.clone())),
            Err(_) => Ok(None),
        }
    }

    fn read_block(&mut self, block: u32, len: u32) -> Result<Vec<u8>> {
        let block_size = self.block_size;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| ShaleError::database("Table data file is not open"))?;
        file.seek(SeekFrom::Start(u64::from(block) * u64::from(block_size)))?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn load_leaf(&mut self, leaf: &LeafRef) -> Result<LeafEntries> {
        if let Some(cached) = self.cache.get(&leaf.block) {
            return Ok(cached.clone());
        }
        let bytes = self.read_block(leaf.block, leaf.len)?;
        let entries = Arc::new(decode_leaf(&bytes)?);
        if self.cache.len() >= CACHE_LIMIT {
            self.cache.clear();
        }
        self.cache.insert(leaf.block, entries.clone());
        Ok(entries)
    }

    fn flush_locked(&mut self, db_path: &Path) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        if !self.open && self.file.is_none() {
            // First write to a lazily created optional table.
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(db_path)?;
            self.file = Some(file);
            self.open = true;
            self.open_slot = None;
            self.leaves.clear();
            self.next_block = 0;
            self.entry_count = 0;
        }

        let buffer = std::mem::take(&mut self.buffer);
        let old_leaves = std::mem::take(&mut self.leaves);

        // Partition the buffered ops by the leaf whose key range owns
        // them. Keys below the first leaf fold into leaf zero.
        let mut ops_by_leaf: Vec<Vec<(Vec<u8>, Option<Vec<u8>>)>> =
            (0..old_leaves.len().max(1)).map(|_| Vec::new()).collect();
        for (key, op) in buffer {
            let idx = if old_leaves.is_empty() {
                0
            } else {
                old_leaves
                    .partition_point(|leaf| leaf.first_key.as_slice() <= key.as_slice())
                    .saturating_sub(1)
            };
            ops_by_leaf[idx].push((key, op));
        }

        let mut new_leaves = Vec::with_capacity(old_leaves.len());
        let mut new_count = 0u64;

        if old_leaves.is_empty() {
            let entries: Vec<(Vec<u8>, Vec<u8>)> = ops_by_leaf
                .remove(0)
                .into_iter()
                .filter_map(|(k, op)| op.map(|v| (k, v)))
                .collect();
            self.append_run(entries, &mut new_leaves, &mut new_count)?;
        } else {
            for (i, leaf) in old_leaves.into_iter().enumerate() {
                let ops = std::mem::take(&mut ops_by_leaf[i]);
                if ops.is_empty() {
                    new_count += leaf.entries;
                    new_leaves.push(leaf);
                    continue;
                }
                let mut map: BTreeMap<Vec<u8>, Vec<u8>> =
                    self.load_leaf(&leaf)?.iter().cloned().collect();
                for (key, op) in ops {
                    match op {
                        Some(value) => {
                            map.insert(key, value);
                        }
                        None => {
                            map.remove(&key);
                        }
                    }
                }
                let entries: Vec<(Vec<u8>, Vec<u8>)> = map.into_iter().collect();
                self.append_run(entries, &mut new_leaves, &mut new_count)?;
            }
        }

        self.leaves = new_leaves;
        self.entry_count = new_count;
        self.modified = true;
        Ok(())
    }

    fn append_run(
        &mut self,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        out: &mut Vec<LeafRef>,
        count: &mut u64,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let target = (self.block_size as usize).saturating_sub(64).max(256);
        let block_size = self.block_size;
        for chunk in split_into_leaves(entries, target) {
            let bytes = encode_leaf(&chunk);
            let block = self.next_block;
            let span = (bytes.len() as u32).div_ceil(block_size).max(1);
            {
                let file = self
                    .file
                    .as_mut()
                    .ok_or_else(|| ShaleError::database("Table data file is not open"))?;
                file.seek(SeekFrom::Start(u64::from(block) * u64::from(block_size)))?;
                file.write_all(&bytes)?;
            }
            self.next_block += span;
            self.changed_blocks.insert(block, bytes.len() as u32);
            let leaf = LeafRef {
                first_key: chunk[0].0.clone(),
                block,
                len: bytes.len() as u32,
                entries: chunk.len() as u64,
            };
            *count += leaf.entries;
            if self.cache.len() >= CACHE_LIMIT {
                self.cache.clear();
            }
            self.cache.insert(block, Arc::new(chunk));
            out.push(leaf);
        }
        Ok(())
    }
}

/// Smallest byte string strictly greater than every string with the
/// given prefix, or `None` if there is none.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(&last) = upper.last() {
        if last < 0xff {
            *upper.last_mut().unwrap() += 1;
            return Some(upper);
        }
        upper.pop();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn writable(dir: &TempDir) -> Table {
        let table = Table::new(dir.path(), "postlist", false);
        table.create_and_open(2048).unwrap();
        table
    }

    #[test]
    fn test_create_then_get_set() {
        let dir = TempDir::new().unwrap();
        let table = writable(&dir);

        assert_eq!(table.get(b"missing").unwrap(), None);
        table.set(b"alpha", b"1").unwrap();
        assert_eq!(table.get(b"alpha").unwrap(), Some(b"1".to_vec()));
        assert!(table.is_modified());

        table.del(b"alpha").unwrap();
        assert_eq!(table.get(b"alpha").unwrap(), None);
    }

    #[test]
    fn test_commit_and_reopen() {
        let dir = TempDir::new().unwrap();
        let table = writable(&dir);
        table.set(b"alpha", b"1").unwrap();
        table.set(b"beta", b"2").unwrap();
        table.flush_db().unwrap();
        table.commit(1, None, None).unwrap();
        assert!(!table.is_modified());
        assert_eq!(table.open_revision(), 1);

        let reader = Table::new(dir.path(), "postlist", true);
        reader.open_latest().unwrap();
        assert_eq!(reader.open_revision(), 1);
        assert_eq!(reader.get(b"alpha").unwrap(), Some(b"1".to_vec()));
        assert_eq!(reader.get(b"beta").unwrap(), Some(b"2".to_vec()));
        assert_eq!(reader.entry_count().unwrap(), 2);
    }

    #[test]
    fn test_bases_alternate_and_old_revision_survives() {
        let dir = TempDir::new().unwrap();
        let table = writable(&dir);
        table.set(b"k", b"v1").unwrap();
        table.commit(1, None, None).unwrap();

        // A reader pinned at revision 1 while the writer moves on.
        let reader = Table::new(dir.path(), "postlist", true);
        assert!(reader.open_at(1).unwrap());

        table.set(b"k", b"v2").unwrap();
        table.commit(2, None, None).unwrap();

        assert_eq!(reader.get(b"k").unwrap(), Some(b"v1".to_vec()));
        assert!(reader.open_at(2).unwrap());
        assert_eq!(reader.get(b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_open_at_missing_revision() {
        let dir = TempDir::new().unwrap();
        let table = writable(&dir);
        table.set(b"k", b"v").unwrap();
        table.commit(1, None, None).unwrap();
        table.set(b"k", b"w").unwrap();
        table.commit(2, None, None).unwrap();
        table.set(b"k", b"x").unwrap();
        table.commit(3, None, None).unwrap();

        // Revision 1's base slot has been recycled by revision 3.
        let reader = Table::new(dir.path(), "postlist", true);
        assert!(!reader.open_at(1).unwrap());
        assert_eq!(reader.latest_revision(), 3);
    }

    #[test]
    fn test_cancel_discards_buffer() {
        let dir = TempDir::new().unwrap();
        let table = writable(&dir);
        table.set(b"keep", b"1").unwrap();
        table.commit(1, None, None).unwrap();

        table.set(b"drop", b"2").unwrap();
        table.del(b"keep").unwrap();
        table.cancel().unwrap();

        assert!(!table.is_modified());
        assert_eq!(table.get(b"keep").unwrap(), Some(b"1".to_vec()));
        assert_eq!(table.get(b"drop").unwrap(), None);
    }

    #[test]
    fn test_cancel_after_flush_restores_committed_state() {
        let dir = TempDir::new().unwrap();
        let table = writable(&dir);
        table.set(b"keep", b"1").unwrap();
        table.commit(1, None, None).unwrap();

        table.set(b"extra", b"2").unwrap();
        table.flush_db().unwrap();
        table.cancel().unwrap();

        assert_eq!(table.get(b"extra").unwrap(), None);
        assert_eq!(table.get(b"keep").unwrap(), Some(b"1".to_vec()));
        assert_eq!(table.entry_count().unwrap(), 1);
    }

    #[test]
    fn test_prefix_entries_merges_buffer() {
        let dir = TempDir::new().unwrap();
        let table = writable(&dir);
        table.set(b"ab1", b"disk").unwrap();
        table.set(b"ab2", b"disk").unwrap();
        table.set(b"zz", b"disk").unwrap();
        table.commit(1, None, None).unwrap();

        table.set(b"ab2", b"buffered").unwrap();
        table.set(b"ab3", b"buffered").unwrap();
        table.del(b"ab1").unwrap();

        let entries = table.prefix_entries(b"ab").unwrap();
        assert_eq!(
            entries,
            vec![
                (b"ab2".to_vec(), b"buffered".to_vec()),
                (b"ab3".to_vec(), b"buffered".to_vec()),
            ]
        );

        let all = table.prefix_entries(b"").unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_many_entries_split_across_leaves() {
        let dir = TempDir::new().unwrap();
        let table = writable(&dir);
        for i in 0..500u32 {
            let key = format!("key{i:05}");
            table.set(key.as_bytes(), &i.to_le_bytes()).unwrap();
        }
        table.commit(1, None, None).unwrap();

        assert_eq!(table.entry_count().unwrap(), 500);
        assert_eq!(
            table.get(b"key00257").unwrap(),
            Some(257u32.to_le_bytes().to_vec())
        );

        // Update a value in the middle; only some leaves rewrite.
        table.set(b"key00257", b"updated").unwrap();
        table.commit(2, None, None).unwrap();
        assert_eq!(table.get(b"key00257").unwrap(), Some(b"updated".to_vec()));
        assert_eq!(table.entry_count().unwrap(), 500);
    }

    #[test]
    fn test_key_length_limit() {
        let dir = TempDir::new().unwrap();
        let table = writable(&dir);
        let long_key = vec![b'x'; KEY_LIMIT + 1];
        assert!(table.set(&long_key, b"v").is_err());
        let ok_key = vec![b'x'; KEY_LIMIT];
        assert!(table.set(&ok_key, b"v").is_ok());
    }

    #[test]
    fn test_absent_optional_table_opens_vacuously() {
        let dir = TempDir::new().unwrap();
        let table = Table::new(dir.path(), "spelling", false);
        assert!(!table.exists());
        assert!(table.open_at(7).unwrap());
        assert!(!table.is_open());
        assert_eq!(table.get(b"word").unwrap(), None);
        assert_eq!(table.entry_count().unwrap(), 0);
    }

    #[test]
    fn test_lazy_creation_on_first_write() {
        let dir = TempDir::new().unwrap();
        let table = Table::new(dir.path(), "spelling", false);
        assert!(table.open_at(3).unwrap());

        table.set(b"word", b"\x05").unwrap();
        table.flush_db().unwrap();
        table.commit(4, None, None).unwrap();
        assert!(table.exists());

        let reader = Table::new(dir.path(), "spelling", true);
        assert!(reader.open_at(4).unwrap());
        assert_eq!(reader.get(b"word").unwrap(), Some(b"\x05".to_vec()));
    }

    #[test]
    fn test_changed_blocks_stream() {
        let dir = TempDir::new().unwrap();
        let table = writable(&dir);
        table.set(b"k", b"v").unwrap();
        table.flush_db().unwrap();

        let mut out = Vec::new();
        table.write_changed_blocks(&mut out).unwrap();
        assert_eq!(out[0], CHANGES_BLOCK);
        assert_eq!(*out.last().unwrap(), CHANGES_END_OF_BLOCKS);

        table.commit(1, None, None).unwrap();
        let mut after = Vec::new();
        table.write_changed_blocks(&mut after).unwrap();
        assert_eq!(after, vec![CHANGES_END_OF_BLOCKS]);
    }

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(b"abc"), Some(b"abd".to_vec()));
        assert_eq!(prefix_successor(&[0x61, 0xff]), Some(vec![0x62]));
        assert_eq!(prefix_successor(&[0xff, 0xff]), None);
        assert_eq!(prefix_successor(b""), None);
    }
}
