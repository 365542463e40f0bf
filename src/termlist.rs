//! The termlist table: per-document term lists and value-slot records.
//!
//! For each document the table stores the document length and the
//! sorted (term, wdf) list, which is what makes document deletion and
//! replacement possible without scanning the postlist table. The value
//! manager additionally keeps a small per-document record here listing
//! which value slots the document uses.

use std::path::Path;

use crate::document::Document;
use crate::error::{Result, ShaleError};
use crate::record::doc_key;
use crate::table::Table;
use crate::util::pack::{pack_bytes, pack_uint, unpack_bytes, unpack_uint};
use crate::{DocId, Slot};

const SLOTS_SUFFIX: u8 = 0x01;

fn slots_key(did: DocId) -> [u8; 5] {
    let key = doc_key(did);
    [key[0], key[1], key[2], key[3], SLOTS_SUFFIX]
}

/// One entry of a stored term list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermListEntry {
    pub term: Vec<u8>,
    pub wdf: u32,
}

/// A decoded per-document term list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermListData {
    /// The document length recorded when the list was written.
    pub doclen: u32,

    /// Entries in term order.
    pub terms: Vec<TermListEntry>,
}

/// The termlist table.
#[derive(Debug)]
pub struct TermListTable {
    pub(crate) table: Table,
}

impl TermListTable {
    pub fn new<P: AsRef<Path>>(dir: P, readonly: bool) -> Self {
        TermListTable {
            table: Table::new(dir, "termlist", readonly),
        }
    }

    /// Store the term list of `doc` under `did`.
    pub fn set_termlist(&self, did: DocId, doc: &Document, doclen: u32) -> Result<()> {
        let mut blob = Vec::new();
        pack_uint(&mut blob, u64::from(doclen));
        pack_uint(&mut blob, doc.term_count() as u64);
        for (term, data) in doc.terms() {
            pack_bytes(&mut blob, term);
            pack_uint(&mut blob, u64::from(data.wdf));
        }
        self.table.set(&doc_key(did), &blob)
    }

    /// Remove the term list for `did`.
    pub fn delete_termlist(&self, did: DocId) -> Result<()> {
        self.table.del(&doc_key(did))
    }

    /// Fetch and decode the term list for `did`.
    pub fn termlist(&self, did: DocId) -> Result<TermListData> {
        let blob = self
            .table
            .get(&doc_key(did))?
            .ok_or_else(|| ShaleError::doc_not_found(format!("Document {did} not found")))?;

        let mut rest = blob.as_slice();
        let doclen = unpack_uint(&mut rest)? as u32;
        let count = unpack_uint(&mut rest)? as usize;
        let mut terms = Vec::with_capacity(count);
        for _ in 0..count {
            let term = unpack_bytes(&mut rest)?;
            let wdf = unpack_uint(&mut rest)? as u32;
            terms.push(TermListEntry { term, wdf });
        }
        if !rest.is_empty() {
            return Err(ShaleError::corrupt(format!(
                "Trailing bytes in term list for document {did}"
            )));
        }
        Ok(TermListData { doclen, terms })
    }

    /// Record which value slots `did` uses.
    pub fn set_slots_used(&self, did: DocId, slots: &[Slot]) -> Result<()> {
        let mut blob = Vec::new();
        pack_uint(&mut blob, slots.len() as u64);
        for slot in slots {
            pack_uint(&mut blob, u64::from(*slot));
        }
        self.table.set(&slots_key(did), &blob)
    }

    /// The value slots `did` uses; empty when none are recorded.
    pub fn slots_used(&self, did: DocId) -> Result<Vec<Slot>> {
        let blob = match self.table.get(&slots_key(did))? {
            Some(blob) => blob,
            None => return Ok(Vec::new()),
        };
        let mut rest = blob.as_slice();
        let count = unpack_uint(&mut rest)? as usize;
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            slots.push(unpack_uint(&mut rest)? as Slot);
        }
        Ok(slots)
    }

    /// Remove the slots-used record for `did`.
    pub fn delete_slots_used(&self, did: DocId) -> Result<()> {
        self.table.del(&slots_key(did))
    }
}
