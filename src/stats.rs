//! Collection-wide statistics.
//!
//! The stats live in the postlist table under the distinguished empty
//! key and are rewritten on every flush. They track the last assigned
//! document id, the live document count, the total document length, and
//! the bounds needed by ranking code.

use crate::error::{Result, ShaleError};
use crate::postlist::PostlistTable;
use crate::util::pack::{pack_uint, unpack_uint};
use crate::DocId;

/// Statistics about the whole document collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionStats {
    last_docid: DocId,
    doc_count: u32,
    total_doclen: u64,
    wdf_upper_bound: u32,
    doclen_lower_bound: u32,
    doclen_upper_bound: u32,
}

impl CollectionStats {
    /// Reset everything to the empty-collection state.
    pub fn zero(&mut self) {
        *self = CollectionStats::default();
    }

    /// Load the stats entry from the postlist table. A missing entry
    /// means a freshly created database and reads as all zeros.
    pub fn read(&mut self, postlist: &PostlistTable) -> Result<()> {
        let blob = match postlist.get_stats_entry()? {
            Some(blob) => blob,
            None => {
                self.zero();
                return Ok(());
            }
        };

        let mut rest = blob.as_slice();
        let decoded = (|| -> Result<CollectionStats> {
            let last_docid = unpack_uint(&mut rest)? as DocId;
            let doc_count = unpack_uint(&mut rest)? as u32;
            let total_doclen = unpack_uint(&mut rest)?;
            let wdf_upper_bound = unpack_uint(&mut rest)? as u32;
            let doclen_lower_bound = unpack_uint(&mut rest)? as u32;
            let doclen_upper_bound = unpack_uint(&mut rest)? as u32;
            Ok(CollectionStats {
                last_docid,
                doc_count,
                total_doclen,
                wdf_upper_bound,
                doclen_lower_bound,
                doclen_upper_bound,
            })
        })();

        match decoded {
            Ok(stats) if rest.is_empty() => {
                *self = stats;
                Ok(())
            }
            _ => Err(ShaleError::corrupt("Collection statistics failed to decode")),
        }
    }

    /// Write the stats entry into the postlist table's buffer.
    pub fn write(&self, postlist: &PostlistTable) -> Result<()> {
        let mut blob = Vec::new();
        pack_uint(&mut blob, u64::from(self.last_docid));
        pack_uint(&mut blob, u64::from(self.doc_count));
        pack_uint(&mut blob, self.total_doclen);
        pack_uint(&mut blob, u64::from(self.wdf_upper_bound));
        pack_uint(&mut blob, u64::from(self.doclen_lower_bound));
        pack_uint(&mut blob, u64::from(self.doclen_upper_bound));
        postlist.set_stats_entry(&blob)
    }

    /// Account for a new document of the given length.
    pub fn add_document(&mut self, doclen: u32) {
        if self.doc_count == 0 || doclen < self.doclen_lower_bound {
            self.doclen_lower_bound = doclen;
        }
        if doclen > self.doclen_upper_bound {
            self.doclen_upper_bound = doclen;
        }
        self.doc_count += 1;
        self.total_doclen += u64::from(doclen);
    }

    /// Account for the removal of a document of the given length. The
    /// length bounds stay as (possibly loose) bounds.
    pub fn delete_document(&mut self, doclen: u32) {
        self.doc_count = self.doc_count.saturating_sub(1);
        self.total_doclen = self.total_doclen.saturating_sub(u64::from(doclen));
    }

    /// Raise the within-document-frequency upper bound if needed.
    pub fn check_wdf(&mut self, wdf: u32) {
        if wdf > self.wdf_upper_bound {
            self.wdf_upper_bound = wdf;
        }
    }

    /// Allocate the next unused document id.
    pub fn next_docid(&mut self) -> Result<DocId> {
        if self.last_docid == DocId::MAX {
            return Err(ShaleError::database(
                "Run out of document ids - gaps must be compacted before more documents can be added",
            ));
        }
        self.last_docid += 1;
        Ok(self.last_docid)
    }

    /// The highest document id ever assigned.
    pub fn last_docid(&self) -> DocId {
        self.last_docid
    }

    /// Raise the last-assigned document id watermark.
    pub fn set_last_docid(&mut self, did: DocId) {
        self.last_docid = did;
    }

    /// Number of live documents.
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Sum of all live document lengths.
    pub fn total_doclen(&self) -> u64 {
        self.total_doclen
    }

    /// Upper bound on any within-document frequency.
    pub fn wdf_upper_bound(&self) -> u32 {
        self.wdf_upper_bound
    }

    /// Lower bound on any document length.
    pub fn doclen_lower_bound(&self) -> u32 {
        self.doclen_lower_bound
    }

    /// Upper bound on any document length.
    pub fn doclen_upper_bound(&self) -> u32 {
        self.doclen_upper_bound
    }
}
