//! The position table: per-(document, term) position lists.
//!
//! Positions are stored as a count followed by delta-coded packed
//! integers. The codec is private to this module; everything else deals
//! in plain sorted `u32` slices.

use std::path::Path;

use crate::error::{Result, ShaleError};
use crate::record::doc_key;
use crate::table::Table;
use crate::util::pack::{pack_uint, unpack_uint};
use crate::DocId;

fn position_key(did: DocId, term: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + term.len());
    key.extend_from_slice(&doc_key(did));
    key.extend_from_slice(term);
    key
}

fn encode_positions(positions: &[u32]) -> Vec<u8> {
    let mut blob = Vec::new();
    pack_uint(&mut blob, positions.len() as u64);
    let mut prev = 0u32;
    for (i, &pos) in positions.iter().enumerate() {
        let delta = if i == 0 { pos } else { pos - prev };
        pack_uint(&mut blob, u64::from(delta));
        prev = pos;
    }
    blob
}

fn decode_positions(blob: &[u8]) -> Result<Vec<u32>> {
    let mut rest = blob;
    let count = unpack_uint(&mut rest)? as usize;
    let mut positions = Vec::with_capacity(count);
    let mut current = 0u32;
    for i in 0..count {
        let delta = unpack_uint(&mut rest)? as u32;
        current = if i == 0 { delta } else { current + delta };
        positions.push(current);
    }
    if !rest.is_empty() {
        return Err(ShaleError::corrupt("Trailing bytes in position list"));
    }
    Ok(positions)
}

/// The position table.
#[derive(Debug)]
pub struct PositionTable {
    pub(crate) table: Table,
}

impl PositionTable {
    pub fn new<P: AsRef<Path>>(dir: P, readonly: bool) -> Self {
        PositionTable {
            table: Table::new(dir, "position", readonly),
        }
    }

    /// Store the position list for `(did, term)`. `positions` must be
    /// sorted ascending; an empty list removes the entry instead.
    pub fn set_positionlist(&self, did: DocId, term: &[u8], positions: &[u32]) -> Result<()> {
        if positions.is_empty() {
            return self.delete_positionlist(did, term);
        }
        self.table
            .set(&position_key(did, term), &encode_positions(positions))
    }

    /// Remove the position list for `(did, term)`. Removing an absent
    /// list is a no-op.
    pub fn delete_positionlist(&self, did: DocId, term: &[u8]) -> Result<()> {
        self.table.del(&position_key(did, term))
    }

    /// The positions of `term` in `did`; empty when none are stored.
    pub fn positionlist(&self, did: DocId, term: &[u8]) -> Result<Vec<u32>> {
        match self.table.get(&position_key(did, term))? {
            Some(blob) => decode_positions(&blob),
            None => Ok(Vec::new()),
        }
    }

    /// Whether any position list is stored at all.
    pub fn has_positions(&self) -> Result<bool> {
        Ok(self.table.entry_count()? > 0)
    }
}
