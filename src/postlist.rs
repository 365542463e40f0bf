//! The postlist table: term posting lists, document lengths, value
//! streams, collection statistics and user metadata.
//!
//! The table's key space is namespaced so all of these coexist:
//!
//! - the empty key holds the collection statistics
//! - `00 C0` + key holds user metadata
//! - `00 D0` + docid holds a document's length
//! - `00 D1` + slot holds per-slot value statistics
//! - `00 D8` + slot + docid holds one document value
//! - everything else is a term key: the zero-escaped term followed by
//!   `00 00`
//!
//! Zero-escaping (`00` becomes `00 FF`) keeps term keys disjoint from
//! the internal prefixes even for terms containing zero bytes, and
//! preserves both ordering and prefixes for range scans.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, ShaleError};
use crate::record::doc_key;
use crate::table::Table;
use crate::util::pack::{
    escape_preserving_sort, pack_uint, unescape_preserving_sort, unpack_uint,
};
use crate::{DocId, Slot};

/// Longest term a database accepts, in bytes. Terms containing zero
/// bytes lose one byte of headroom per zero, since those escape to two
/// bytes in the key encoding.
pub const MAX_SAFE_TERM_LENGTH: usize = 245;

/// Prefix of user metadata keys.
pub const METADATA_PREFIX: &[u8] = &[0x00, 0xc0];

const DOCLEN_PREFIX: &[u8] = &[0x00, 0xd0];
const VALUE_STATS_PREFIX: &[u8] = &[0x00, 0xd1];
const VALUE_PREFIX: &[u8] = &[0x00, 0xd8];
const TERM_KEY_TERMINATOR: &[u8] = &[0x00, 0x00];

/// Whether `term` is too long to store.
pub fn term_too_long(term: &[u8]) -> bool {
    let zeros = term.iter().filter(|&&b| b == 0).count();
    term.len() + zeros > MAX_SAFE_TERM_LENGTH
}

pub(crate) fn term_key(term: &[u8]) -> Vec<u8> {
    let mut key = escape_preserving_sort(term);
    key.extend_from_slice(TERM_KEY_TERMINATOR);
    key
}

/// Decode a term key back to the term, or `None` for internal keys.
pub(crate) fn term_from_key(key: &[u8]) -> Option<Vec<u8>> {
    if key.is_empty() {
        return None;
    }
    if key[0] == 0 && key.get(1) != Some(&0xff) {
        return None;
    }
    let stripped = key.strip_suffix(TERM_KEY_TERMINATOR)?;
    unescape_preserving_sort(stripped).ok()
}

pub(crate) fn doclen_key(did: DocId) -> Vec<u8> {
    let mut key = Vec::with_capacity(6);
    key.extend_from_slice(DOCLEN_PREFIX);
    key.extend_from_slice(&doc_key(did));
    key
}

pub(crate) fn value_stats_key(slot: Slot) -> Vec<u8> {
    let mut key = Vec::with_capacity(6);
    key.extend_from_slice(VALUE_STATS_PREFIX);
    key.extend_from_slice(&slot.to_be_bytes());
    key
}

pub(crate) fn value_key(slot: Slot, did: DocId) -> Vec<u8> {
    let mut key = Vec::with_capacity(10);
    key.extend_from_slice(VALUE_PREFIX);
    key.extend_from_slice(&slot.to_be_bytes());
    key.extend_from_slice(&doc_key(did));
    key
}

pub(crate) fn metadata_key(user_key: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + user_key.len());
    key.extend_from_slice(METADATA_PREFIX);
    key.extend_from_slice(user_key);
    key
}

/// One posting: a document and the term's frequency within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub did: DocId,
    pub wdf: u32,
}

/// A decoded posting list for one term.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingListData {
    pub termfreq: u32,
    pub collfreq: u64,
    /// Postings in ascending document-id order.
    pub postings: Vec<Posting>,
}

fn encode_posting_list(data: &PostingListData) -> Vec<u8> {
    let mut blob = Vec::new();
    pack_uint(&mut blob, u64::from(data.termfreq));
    pack_uint(&mut blob, data.collfreq);
    pack_uint(&mut blob, data.postings.len() as u64);
    let mut prev = 0u32;
    for (i, posting) in data.postings.iter().enumerate() {
        let delta = if i == 0 {
            posting.did
        } else {
            posting.did - prev
        };
        pack_uint(&mut blob, u64::from(delta));
        pack_uint(&mut blob, u64::from(posting.wdf));
        prev = posting.did;
    }
    blob
}

fn decode_posting_list(blob: &[u8]) -> Result<PostingListData> {
    let mut rest = blob;
    let termfreq = unpack_uint(&mut rest)? as u32;
    let collfreq = unpack_uint(&mut rest)?;
    let count = unpack_uint(&mut rest)? as usize;
    let mut postings = Vec::with_capacity(count);
    let mut did = 0u32;
    for i in 0..count {
        let delta = unpack_uint(&mut rest)? as u32;
        did = if i == 0 { delta } else { did + delta };
        let wdf = unpack_uint(&mut rest)? as u32;
        postings.push(Posting { did, wdf });
    }
    if !rest.is_empty() {
        return Err(ShaleError::corrupt("Trailing bytes in posting list"));
    }
    Ok(PostingListData {
        termfreq,
        collfreq,
        postings,
    })
}

/// A buffered change to one posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingChange {
    /// The document gains the term with this wdf.
    Add(u32),
    /// The document loses the term.
    Delete,
    /// The document already had the term; the wdf changes to this.
    Modify(u32),
}

/// A buffered document length: set, or deleted since the last flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferedLen {
    Set(u32),
    Deleted,
}

/// Buffered term-frequency and collection-frequency deltas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreqDelta {
    pub termfreq: i64,
    pub collfreq: i64,
}

/// Buffered posting-list modifications for one term.
pub type ModifiedPostings = BTreeMap<DocId, PostingChange>;

/// The postlist table.
#[derive(Debug)]
pub struct PostlistTable {
    pub(crate) table: Table,
}

impl PostlistTable {
    pub fn new<P: AsRef<Path>>(dir: P, readonly: bool) -> Self {
        PostlistTable {
            table: Table::new(dir, "postlist", readonly),
        }
    }

    /// The raw collection-statistics entry.
    pub(crate) fn get_stats_entry(&self) -> Result<Option<Vec<u8>>> {
        self.table.get(b"")
    }

    /// Buffer a rewrite of the collection-statistics entry.
    pub(crate) fn set_stats_entry(&self, blob: &[u8]) -> Result<()> {
        self.table.set(b"", blob)
    }

    /// Whether any document contains `term`.
    pub fn term_exists(&self, term: &[u8]) -> Result<bool> {
        Ok(self.table.get(&term_key(term))?.is_some())
    }

    /// Number of documents containing `term`.
    pub fn get_termfreq(&self, term: &[u8]) -> Result<u32> {
        match self.table.get(&term_key(term))? {
            Some(blob) => Ok(decode_posting_list(&blob)?.termfreq),
            None => Ok(0),
        }
    }

    /// Total occurrences of `term` across all documents.
    pub fn get_collection_freq(&self, term: &[u8]) -> Result<u64> {
        match self.table.get(&term_key(term))? {
            Some(blob) => Ok(decode_posting_list(&blob)?.collfreq),
            None => Ok(0),
        }
    }

    /// The full posting list for `term`; empty when the term is unused.
    pub fn postlist(&self, term: &[u8]) -> Result<PostingListData> {
        match self.table.get(&term_key(term))? {
            Some(blob) => decode_posting_list(&blob),
            None => Ok(PostingListData::default()),
        }
    }

    /// Whether a document with this id exists.
    pub fn document_exists(&self, did: DocId) -> Result<bool> {
        Ok(self.table.get(&doclen_key(did))?.is_some())
    }

    /// The committed length of document `did`.
    pub fn get_doclength(&self, did: DocId) -> Result<u32> {
        let blob = self
            .table
            .get(&doclen_key(did))?
            .ok_or_else(|| ShaleError::doc_not_found(format!("Document {did} not found")))?;
        let mut rest = blob.as_slice();
        let len = unpack_uint(&mut rest)? as u32;
        if !rest.is_empty() {
            return Err(ShaleError::corrupt(format!(
                "Trailing bytes in document length entry for {did}"
            )));
        }
        Ok(len)
    }

    /// All documents with their lengths, in ascending id order.
    pub fn all_docs(&self) -> Result<Vec<(DocId, u32)>> {
        let entries = self.table.prefix_entries(DOCLEN_PREFIX)?;
        let mut docs = Vec::with_capacity(entries.len());
        for (key, blob) in entries {
            let id_bytes: [u8; 4] = key[DOCLEN_PREFIX.len()..]
                .try_into()
                .map_err(|_| ShaleError::corrupt("Malformed document length key"))?;
            let mut rest = blob.as_slice();
            let len = unpack_uint(&mut rest)? as u32;
            docs.push((DocId::from_be_bytes(id_bytes), len));
        }
        Ok(docs)
    }

    /// All terms with a posting list, optionally restricted to a
    /// prefix, with their frequencies.
    pub fn all_terms(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, u32, u64)>> {
        let scan_prefix = escape_preserving_sort(prefix);
        let entries = self.table.prefix_entries(&scan_prefix)?;
        let mut terms = Vec::new();
        for (key, blob) in entries {
            if let Some(term) = term_from_key(&key) {
                let data = decode_posting_list(&blob)?;
                terms.push((term, data.termfreq, data.collfreq));
            }
        }
        Ok(terms)
    }

    /// Fetch a metadata value; absent keys read as empty.
    pub fn get_metadata(&self, user_key: &[u8]) -> Result<Vec<u8>> {
        Ok(self.table.get(&metadata_key(user_key))?.unwrap_or_default())
    }

    /// Buffer a metadata update; an empty value deletes the entry.
    pub fn set_metadata(&self, user_key: &[u8], value: &[u8]) -> Result<()> {
        if value.is_empty() {
            self.table.del(&metadata_key(user_key))
        } else {
            self.table.set(&metadata_key(user_key), value)
        }
    }

    /// All metadata keys starting with `prefix`.
    pub fn metadata_keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut scan = METADATA_PREFIX.to_vec();
        scan.extend_from_slice(prefix);
        let entries = self.table.prefix_entries(&scan)?;
        Ok(entries
            .into_iter()
            .map(|(key, _)| key[METADATA_PREFIX.len()..].to_vec())
            .collect())
    }

    /// Merge one flush window's buffered changes into the table.
    ///
    /// Applies the per-document length map, then rewrites each modified
    /// term's posting list, folding in the buffered frequency deltas.
    /// This is the single point where postings become table entries.
    pub fn merge_changes(
        &self,
        mod_plists: &BTreeMap<Vec<u8>, ModifiedPostings>,
        doclens: &BTreeMap<DocId, BufferedLen>,
        freq_deltas: &BTreeMap<Vec<u8>, FreqDelta>,
    ) -> Result<()> {
        for (&did, len) in doclens {
            match len {
                BufferedLen::Set(len) => {
                    let mut blob = Vec::new();
                    pack_uint(&mut blob, u64::from(*len));
                    self.table.set(&doclen_key(did), &blob)?;
                }
                BufferedLen::Deleted => {
                    self.table.del(&doclen_key(did))?;
                }
            }
        }

        for (term, changes) in mod_plists {
            let key = term_key(term);
            let mut data = match self.table.get(&key)? {
                Some(blob) => decode_posting_list(&blob)?,
                None => PostingListData::default(),
            };

            if let Some(delta) = freq_deltas.get(term) {
                data.termfreq = (i64::from(data.termfreq) + delta.termfreq).max(0) as u32;
                data.collfreq = (data.collfreq as i64 + delta.collfreq).max(0) as u64;
            }

            let mut postings: BTreeMap<DocId, u32> =
                data.postings.iter().map(|p| (p.did, p.wdf)).collect();
            for (&did, change) in changes {
                match change {
                    PostingChange::Add(wdf) | PostingChange::Modify(wdf) => {
                        postings.insert(did, *wdf);
                    }
                    PostingChange::Delete => {
                        postings.remove(&did);
                    }
                }
            }

            if postings.is_empty() {
                self.table.del(&key)?;
            } else {
                data.postings = postings
                    .into_iter()
                    .map(|(did, wdf)| Posting { did, wdf })
                    .collect();
                self.table.set(&key, &encode_posting_list(&data))?;
            }
        }
        Ok(())
    }
}
