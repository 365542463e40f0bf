//! Per-document value slots and per-slot statistics.
//!
//! Values live in the postlist table (one entry per slot/document
//! pair plus one statistics entry per slot); the termlist table keeps a
//! small per-document record of which slots are used, so deleting a
//! document does not require scanning the slot streams. The manager
//! buffers all mutations until [`ValueManager::merge_changes`] pushes
//! them into the tables as part of a flush.

use std::collections::BTreeMap;

use ahash::AHashMap;

use crate::document::Document;
use crate::error::Result;
use crate::postlist::{value_key, value_stats_key, PostlistTable};
use crate::termlist::TermListTable;
use crate::util::pack::{pack_bytes, pack_uint, unpack_bytes, unpack_uint};
use crate::{DocId, Slot};

/// Statistics for one value slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueStats {
    /// Number of documents with a value in the slot.
    pub freq: u32,

    /// Smallest value in the slot (bytewise).
    pub lower_bound: Vec<u8>,

    /// Largest value in the slot (bytewise).
    pub upper_bound: Vec<u8>,
}

impl ValueStats {
    fn encode(&self) -> Vec<u8> {
        let mut blob = Vec::new();
        pack_uint(&mut blob, u64::from(self.freq));
        pack_bytes(&mut blob, &self.lower_bound);
        pack_bytes(&mut blob, &self.upper_bound);
        blob
    }

    fn decode(blob: &[u8]) -> Result<ValueStats> {
        let mut rest = blob;
        let freq = unpack_uint(&mut rest)? as u32;
        let lower_bound = unpack_bytes(&mut rest)?;
        let upper_bound = unpack_bytes(&mut rest)?;
        Ok(ValueStats {
            freq,
            lower_bound,
            upper_bound,
        })
    }
}

/// Buffers value mutations for the writable database.
#[derive(Debug, Default)]
pub struct ValueManager {
    /// Per-document slot changes; `None` removes the slot's value.
    changes: BTreeMap<DocId, BTreeMap<Slot, Option<Vec<u8>>>>,

    /// Pending absolute slot statistics.
    stats_changes: AHashMap<Slot, ValueStats>,
}

impl ValueManager {
    pub fn new() -> Self {
        ValueManager::default()
    }

    /// Drop all buffered state.
    pub fn reset(&mut self) {
        self.changes.clear();
        self.stats_changes.clear();
    }

    /// Whether there is buffered state to merge.
    pub fn is_modified(&self) -> bool {
        !self.changes.is_empty() || !self.stats_changes.is_empty()
    }

    fn stats_for(&mut self, slot: Slot, postlist: &PostlistTable) -> Result<ValueStats> {
        if let Some(stats) = self.stats_changes.get(&slot) {
            return Ok(stats.clone());
        }
        match postlist.table.get(&value_stats_key(slot))? {
            Some(blob) => ValueStats::decode(&blob),
            None => Ok(ValueStats::default()),
        }
    }

    /// Buffer the values of a brand-new document.
    pub fn add_document(
        &mut self,
        did: DocId,
        doc: &Document,
        postlist: &PostlistTable,
    ) -> Result<()> {
        for (slot, value) in doc.values() {
            let mut stats = self.stats_for(slot, postlist)?;
            if stats.freq == 0 {
                stats.lower_bound = value.to_vec();
                stats.upper_bound = value.to_vec();
            } else {
                if value < stats.lower_bound.as_slice() {
                    stats.lower_bound = value.to_vec();
                }
                if value > stats.upper_bound.as_slice() {
                    stats.upper_bound = value.to_vec();
                }
            }
            stats.freq += 1;
            self.stats_changes.insert(slot, stats);

            self.changes
                .entry(did)
                .or_default()
                .insert(slot, Some(value.to_vec()));
        }
        Ok(())
    }

    /// Buffer the removal of all of a document's values.
    pub fn delete_document(
        &mut self,
        did: DocId,
        postlist: &PostlistTable,
        termlist: &TermListTable,
    ) -> Result<()> {
        let slots: Vec<Slot> = match self.changes.get(&did) {
            Some(pending) => pending
                .iter()
                .filter_map(|(slot, v)| v.is_some().then_some(*slot))
                .collect(),
            None => {
                if termlist.table.is_open() {
                    termlist.slots_used(did)?
                } else {
                    Vec::new()
                }
            }
        };

        let mut removal: BTreeMap<Slot, Option<Vec<u8>>> = BTreeMap::new();
        for slot in slots {
            let mut stats = self.stats_for(slot, postlist)?;
            stats.freq = stats.freq.saturating_sub(1);
            if stats.freq == 0 {
                // The bounds no longer describe anything.
                stats.lower_bound.clear();
                stats.upper_bound.clear();
            }
            self.stats_changes.insert(slot, stats);
            removal.insert(slot, None);
        }
        self.changes.insert(did, removal);
        Ok(())
    }

    /// Buffer a replacement of a document's values.
    pub fn replace_document(
        &mut self,
        did: DocId,
        doc: &Document,
        postlist: &PostlistTable,
        termlist: &TermListTable,
    ) -> Result<()> {
        self.delete_document(did, postlist, termlist)?;
        // Layer the new values over the removals buffered above.
        for (slot, value) in doc.values() {
            let mut stats = self.stats_for(slot, postlist)?;
            if stats.freq == 0 {
                stats.lower_bound = value.to_vec();
                stats.upper_bound = value.to_vec();
            } else {
                if value < stats.lower_bound.as_slice() {
                    stats.lower_bound = value.to_vec();
                }
                if value > stats.upper_bound.as_slice() {
                    stats.upper_bound = value.to_vec();
                }
            }
            stats.freq += 1;
            self.stats_changes.insert(slot, stats);
            self.changes
                .entry(did)
                .or_default()
                .insert(slot, Some(value.to_vec()));
        }
        Ok(())
    }

    /// Push all buffered value state into the tables' write buffers.
    pub fn merge_changes(
        &mut self,
        postlist: &PostlistTable,
        termlist: &TermListTable,
    ) -> Result<()> {
        for (did, slots) in std::mem::take(&mut self.changes) {
            let used: Vec<Slot> = slots
                .iter()
                .filter_map(|(slot, v)| v.is_some().then_some(*slot))
                .collect();
            if termlist.table.is_open() || !used.is_empty() {
                if used.is_empty() {
                    termlist.delete_slots_used(did)?;
                } else {
                    termlist.set_slots_used(did, &used)?;
                }
            }
            for (slot, op) in slots {
                match op {
                    Some(value) => postlist.table.set(&value_key(slot, did), &value)?,
                    None => postlist.table.del(&value_key(slot, did))?,
                }
            }
        }

        for (slot, stats) in self.stats_changes.drain() {
            if stats.freq == 0 {
                postlist.table.del(&value_stats_key(slot))?;
            } else {
                postlist.table.set(&value_stats_key(slot), &stats.encode())?;
            }
        }
        Ok(())
    }

    /// The value of `did` in `slot`, seeing buffered changes first.
    pub fn get_value(
        &self,
        did: DocId,
        slot: Slot,
        postlist: &PostlistTable,
    ) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.changes.get(&did) {
            if let Some(op) = pending.get(&slot) {
                return Ok(op.clone());
            }
        }
        postlist.table.get(&value_key(slot, did))
    }

    /// Number of documents with a value in `slot`.
    pub fn value_freq(&self, slot: Slot, postlist: &PostlistTable) -> Result<u32> {
        if let Some(stats) = self.stats_changes.get(&slot) {
            return Ok(stats.freq);
        }
        match postlist.table.get(&value_stats_key(slot))? {
            Some(blob) => Ok(ValueStats::decode(&blob)?.freq),
            None => Ok(0),
        }
    }

    /// Lower bound on the values in `slot`.
    pub fn value_lower_bound(&self, slot: Slot, postlist: &PostlistTable) -> Result<Vec<u8>> {
        if let Some(stats) = self.stats_changes.get(&slot) {
            return Ok(stats.lower_bound.clone());
        }
        match postlist.table.get(&value_stats_key(slot))? {
            Some(blob) => Ok(ValueStats::decode(&blob)?.lower_bound),
            None => Ok(Vec::new()),
        }
    }

    /// Upper bound on the values in `slot`.
    pub fn value_upper_bound(&self, slot: Slot, postlist: &PostlistTable) -> Result<Vec<u8>> {
        if let Some(stats) = self.stats_changes.get(&slot) {
            return Ok(stats.upper_bound.clone());
        }
        match postlist.table.get(&value_stats_key(slot))? {
            Some(blob) => Ok(ValueStats::decode(&blob)?.upper_bound),
            None => Ok(Vec::new()),
        }
    }

    /// All `(did, value)` pairs in `slot`, in document-id order, as
    /// currently stored in the table.
    pub fn value_stream(&self, slot: Slot, postlist: &PostlistTable) -> Result<Vec<(DocId, Vec<u8>)>> {
        let prefix = {
            let key = value_key(slot, 0);
            key[..key.len() - 4].to_vec()
        };
        let entries = postlist.table.prefix_entries(&prefix)?;
        let mut stream = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let id_bytes: [u8; 4] = key[key.len() - 4..]
                .try_into()
                .map_err(|_| crate::error::ShaleError::corrupt("Malformed value key"))?;
            stream.push((DocId::from_be_bytes(id_bytes), value));
        }
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> (PostlistTable, TermListTable) {
        let postlist = PostlistTable::new(dir.path(), false);
        postlist.table.create_and_open(2048).unwrap();
        let termlist = TermListTable::new(dir.path(), false);
        termlist.table.create_and_open(2048).unwrap();
        (postlist, termlist)
    }

    fn doc_with_values(values: &[(Slot, &[u8])]) -> Document {
        let mut doc = Document::new();
        for (slot, value) in values {
            doc.set_value(*slot, value);
        }
        doc
    }

    #[test]
    fn test_add_then_read_buffered() {
        let dir = TempDir::new().unwrap();
        let (postlist, _termlist) = open(&dir);
        let mut values = ValueManager::new();

        let doc = doc_with_values(&[(0, b"alpha"), (3, b"omega")]);
        values.add_document(1, &doc, &postlist).unwrap();

        assert!(values.is_modified());
        assert_eq!(
            values.get_value(1, 0, &postlist).unwrap(),
            Some(b"alpha".to_vec())
        );
        assert_eq!(values.value_freq(0, &postlist).unwrap(), 1);
        assert_eq!(values.value_lower_bound(0, &postlist).unwrap(), b"alpha");
    }

    #[test]
    fn test_merge_then_delete() {
        let dir = TempDir::new().unwrap();
        let (postlist, termlist) = open(&dir);
        let mut values = ValueManager::new();

        values
            .add_document(1, &doc_with_values(&[(2, b"aa")]), &postlist)
            .unwrap();
        values
            .add_document(2, &doc_with_values(&[(2, b"zz")]), &postlist)
            .unwrap();
        values.merge_changes(&postlist, &termlist).unwrap();
        assert!(!values.is_modified());

        assert_eq!(values.value_freq(2, &postlist).unwrap(), 2);
        assert_eq!(values.value_lower_bound(2, &postlist).unwrap(), b"aa");
        assert_eq!(values.value_upper_bound(2, &postlist).unwrap(), b"zz");
        assert_eq!(termlist.slots_used(1).unwrap(), vec![2]);
        assert_eq!(
            values.value_stream(2, &postlist).unwrap(),
            vec![(1, b"aa".to_vec()), (2, b"zz".to_vec())]
        );

        values.delete_document(1, &postlist, &termlist).unwrap();
        values.merge_changes(&postlist, &termlist).unwrap();

        assert_eq!(values.value_freq(2, &postlist).unwrap(), 1);
        assert_eq!(values.get_value(1, 2, &postlist).unwrap(), None);
        assert!(termlist.slots_used(1).unwrap().is_empty());
        assert_eq!(
            values.value_stream(2, &postlist).unwrap(),
            vec![(2, b"zz".to_vec())]
        );
    }

    #[test]
    fn test_replace_document_values() {
        let dir = TempDir::new().unwrap();
        let (postlist, termlist) = open(&dir);
        let mut values = ValueManager::new();

        values
            .add_document(1, &doc_with_values(&[(0, b"old"), (1, b"keep")]), &postlist)
            .unwrap();
        values.merge_changes(&postlist, &termlist).unwrap();

        values
            .replace_document(1, &doc_with_values(&[(0, b"new")]), &postlist, &termlist)
            .unwrap();
        values.merge_changes(&postlist, &termlist).unwrap();

        assert_eq!(
            values.get_value(1, 0, &postlist).unwrap(),
            Some(b"new".to_vec())
        );
        assert_eq!(values.get_value(1, 1, &postlist).unwrap(), None);
        assert_eq!(values.value_freq(1, &postlist).unwrap(), 0);
        assert_eq!(termlist.slots_used(1).unwrap(), vec![0]);
    }

    #[test]
    fn test_last_delete_clears_stats() {
        let dir = TempDir::new().unwrap();
        let (postlist, termlist) = open(&dir);
        let mut values = ValueManager::new();

        values
            .add_document(1, &doc_with_values(&[(5, b"only")]), &postlist)
            .unwrap();
        values.merge_changes(&postlist, &termlist).unwrap();

        values.delete_document(1, &postlist, &termlist).unwrap();
        values.merge_changes(&postlist, &termlist).unwrap();

        assert_eq!(values.value_freq(5, &postlist).unwrap(), 0);
        assert!(values.value_lower_bound(5, &postlist).unwrap().is_empty());
        assert!(postlist.table.get(&value_stats_key(5)).unwrap().is_none());
    }

    #[test]
    fn test_reset_discards_buffer() {
        let dir = TempDir::new().unwrap();
        let (postlist, _termlist) = open(&dir);
        let mut values = ValueManager::new();

        values
            .add_document(1, &doc_with_values(&[(0, b"x")]), &postlist)
            .unwrap();
        values.reset();

        assert!(!values.is_modified());
        assert_eq!(values.get_value(1, 0, &postlist).unwrap(), None);
        assert_eq!(values.value_freq(0, &postlist).unwrap(), 0);
    }
}
