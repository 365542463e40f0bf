//! The in-memory document representation.
//!
//! A [`Document`] carries an opaque data blob, a term list with
//! within-document frequencies and optional positions, and a set of
//! value slots. Documents returned by a writable database's
//! `open_document` remember where they came from and which parts have
//! been touched, so replacing such a document back into the same
//! database can skip rewriting the untouched parts.

use std::collections::BTreeMap;

use crate::{DocId, Slot};

/// Term payload inside a document: frequency plus optional positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermData {
    /// Within-document frequency.
    pub wdf: u32,

    /// Sorted, deduplicated term positions. Empty when the term carries
    /// no positional information.
    pub positions: Vec<u32>,
}

/// Provenance of a document opened from a writable database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DocOrigin {
    pub token: u64,
    pub did: DocId,
}

/// A document to be added to, or read from, a database.
#[derive(Debug, Clone, Default)]
pub struct Document {
    data: Vec<u8>,
    terms: BTreeMap<Vec<u8>, TermData>,
    values: BTreeMap<Slot, Vec<u8>>,
    origin: Option<DocOrigin>,
    terms_modified: bool,
    data_modified: bool,
    values_modified: bool,
}

impl Document {
    /// Create an empty document. Every part of a fresh document counts
    /// as modified.
    pub fn new() -> Self {
        Document {
            terms_modified: true,
            data_modified: true,
            values_modified: true,
            ..Document::default()
        }
    }

    /// Build a document from stored parts, remembering its origin.
    pub(crate) fn from_store(
        data: Vec<u8>,
        terms: BTreeMap<Vec<u8>, TermData>,
        values: BTreeMap<Slot, Vec<u8>>,
        origin: Option<DocOrigin>,
    ) -> Self {
        Document {
            data,
            terms,
            values,
            origin,
            terms_modified: false,
            data_modified: false,
            values_modified: false,
        }
    }

    /// The opaque record data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replace the record data.
    pub fn set_data<B: Into<Vec<u8>>>(&mut self, data: B) {
        self.data = data.into();
        self.data_modified = true;
    }

    /// Add `wdf_inc` occurrences of `term` without positions.
    pub fn add_term(&mut self, term: &[u8], wdf_inc: u32) {
        let entry = self.terms.entry(term.to_vec()).or_default();
        entry.wdf += wdf_inc;
        self.terms_modified = true;
    }

    /// Add an occurrence of `term` at `position`.
    pub fn add_posting(&mut self, term: &[u8], position: u32, wdf_inc: u32) {
        let entry = self.terms.entry(term.to_vec()).or_default();
        entry.wdf += wdf_inc;
        if let Err(idx) = entry.positions.binary_search(&position) {
            entry.positions.insert(idx, position);
        }
        self.terms_modified = true;
    }

    /// Remove `term` entirely.
    pub fn remove_term(&mut self, term: &[u8]) {
        if self.terms.remove(term).is_some() {
            self.terms_modified = true;
        }
    }

    /// Iterate the document's terms in sorted order.
    pub fn terms(&self) -> impl Iterator<Item = (&[u8], &TermData)> {
        self.terms.iter().map(|(t, d)| (t.as_slice(), d))
    }

    /// Number of distinct terms.
    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// The document length: the sum of all within-document frequencies.
    pub fn doclen(&self) -> u32 {
        self.terms.values().map(|d| d.wdf).sum()
    }

    /// Set the value in `slot`.
    pub fn set_value(&mut self, slot: Slot, value: &[u8]) {
        self.values.insert(slot, value.to_vec());
        self.values_modified = true;
    }

    /// Remove the value in `slot`.
    pub fn remove_value(&mut self, slot: Slot) {
        if self.values.remove(&slot).is_some() {
            self.values_modified = true;
        }
    }

    /// The value in `slot`, if any.
    pub fn value(&self, slot: Slot) -> Option<&[u8]> {
        self.values.get(&slot).map(|v| v.as_slice())
    }

    /// Iterate the document's values in slot order.
    pub fn values(&self) -> impl Iterator<Item = (Slot, &[u8])> {
        self.values.iter().map(|(s, v)| (*s, v.as_slice()))
    }

    pub(crate) fn origin(&self) -> Option<DocOrigin> {
        self.origin
    }

    pub(crate) fn terms_modified(&self) -> bool {
        self.terms_modified
    }

    pub(crate) fn data_modified(&self) -> bool {
        self.data_modified
    }

    pub(crate) fn values_modified(&self) -> bool {
        self.values_modified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terms_and_doclen() {
        let mut doc = Document::new();
        doc.add_term(b"alpha", 1);
        doc.add_term(b"beta", 2);
        doc.add_term(b"alpha", 1);

        assert_eq!(doc.term_count(), 2);
        assert_eq!(doc.doclen(), 4);
    }

    #[test]
    fn test_postings_sorted_and_deduplicated() {
        let mut doc = Document::new();
        doc.add_posting(b"t", 7, 1);
        doc.add_posting(b"t", 3, 1);
        doc.add_posting(b"t", 7, 1);

        let (_, data) = doc.terms().next().unwrap();
        assert_eq!(data.positions, vec![3, 7]);
        assert_eq!(data.wdf, 3);
    }

    #[test]
    fn test_fresh_document_is_fully_modified() {
        let doc = Document::new();
        assert!(doc.terms_modified());
        assert!(doc.data_modified());
        assert!(doc.values_modified());
    }

    #[test]
    fn test_stored_document_tracks_dirty_parts() {
        let mut doc = Document::from_store(b"data".to_vec(), BTreeMap::new(), BTreeMap::new(), None);
        assert!(!doc.terms_modified());
        assert!(!doc.data_modified());
        assert!(!doc.values_modified());

        doc.set_value(3, b"v");
        assert!(doc.values_modified());
        assert!(!doc.terms_modified());
        assert!(!doc.data_modified());

        doc.add_term(b"t", 1);
        assert!(doc.terms_modified());
    }

    #[test]
    fn test_values() {
        let mut doc = Document::new();
        doc.set_value(5, b"five");
        doc.set_value(1, b"one");
        assert_eq!(doc.value(5), Some(b"five".as_slice()));
        assert_eq!(doc.value(2), None);

        let slots: Vec<Slot> = doc.values().map(|(s, _)| s).collect();
        assert_eq!(slots, vec![1, 5]);

        doc.remove_value(5);
        assert_eq!(doc.value(5), None);
    }
}
