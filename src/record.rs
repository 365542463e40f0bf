//! The record table: opaque document data keyed by document id.

use std::path::Path;

use crate::error::{Result, ShaleError};
use crate::table::Table;
use crate::DocId;

/// Big-endian key for a document id.
pub(crate) fn doc_key(did: DocId) -> [u8; 4] {
    did.to_be_bytes()
}

/// The record table. Deliberately the last table created, so its
/// presence implies the whole database exists.
#[derive(Debug)]
pub struct RecordTable {
    pub(crate) table: Table,
}

impl RecordTable {
    pub fn new<P: AsRef<Path>>(dir: P, readonly: bool) -> Self {
        RecordTable {
            table: Table::new(dir, "record", readonly),
        }
    }

    /// Store (or overwrite) the record data for `did`.
    pub fn replace_record(&self, data: &[u8], did: DocId) -> Result<()> {
        self.table.set(&doc_key(did), data)
    }

    /// Fetch the record data for `did`.
    pub fn get_record(&self, did: DocId) -> Result<Vec<u8>> {
        self.table
            .get(&doc_key(did))?
            .ok_or_else(|| ShaleError::doc_not_found(format!("Document {did} not found")))
    }

    /// Delete the record for `did`, failing if it does not exist.
    pub fn delete_record(&self, did: DocId) -> Result<()> {
        if self.table.get(&doc_key(did))?.is_none() {
            return Err(ShaleError::doc_not_found(format!(
                "Document {did} not found"
            )));
        }
        self.table.del(&doc_key(did))
    }

    /// Number of documents, counting buffered modifications.
    pub fn doccount(&self) -> Result<u32> {
        Ok(self.table.entry_count()? as u32)
    }
}
