//! Leaf block encoding.
//!
//! A leaf is a sorted run of key/value entries serialized into one or
//! more contiguous fixed-size blocks of the table's data file. Leaves
//! are immutable once written; updates rewrite the affected leaves as
//! freshly appended blocks.

use crate::error::{Result, ShaleError};
use crate::util::pack::{pack_bytes, pack_uint, unpack_bytes, unpack_uint};

/// Reference to one leaf in a table's data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafRef {
    /// Smallest key stored in the leaf.
    pub first_key: Vec<u8>,

    /// First block number the leaf occupies.
    pub block: u32,

    /// Serialized byte length (may span multiple blocks).
    pub len: u32,

    /// Number of entries in the leaf.
    pub entries: u64,
}

impl LeafRef {
    /// Number of blocks the leaf occupies.
    pub fn span(&self, block_size: u32) -> u32 {
        self.len.div_ceil(block_size).max(1)
    }
}

/// Serialize a sorted entry run into leaf bytes.
pub fn encode_leaf(entries: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    let mut buf = Vec::new();
    pack_uint(&mut buf, entries.len() as u64);
    for (key, value) in entries {
        pack_bytes(&mut buf, key);
        pack_bytes(&mut buf, value);
    }
    buf
}

/// Decode leaf bytes back into the entry run.
pub fn decode_leaf(mut bytes: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let count = unpack_uint(&mut bytes)? as usize;
    let mut entries = Vec::with_capacity(count);
    let mut prev: Option<Vec<u8>> = None;
    for _ in 0..count {
        let key = unpack_bytes(&mut bytes)?;
        let value = unpack_bytes(&mut bytes)?;
        if let Some(p) = &prev {
            if *p >= key {
                return Err(ShaleError::corrupt("leaf keys out of order"));
            }
        }
        prev = Some(key.clone());
        entries.push((key, value));
    }
    Ok(entries)
}

/// Split a sorted entry run into leaves of roughly `target` serialized
/// bytes each. A single oversized entry gets a leaf of its own.
pub fn split_into_leaves(
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    target: usize,
) -> Vec<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut leaves = Vec::new();
    let mut current: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    let mut current_bytes = 0usize;

    for entry in entries {
        let entry_bytes = entry.0.len() + entry.1.len() + 20;
        if !current.is_empty() && current_bytes + entry_bytes > target {
            leaves.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += entry_bytes;
        current.push(entry);
    }
    if !current.is_empty() {
        leaves.push(current);
    }
    leaves
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(k: &[u8], v: &[u8]) -> (Vec<u8>, Vec<u8>) {
        (k.to_vec(), v.to_vec())
    }

    #[test]
    fn test_leaf_round_trip() {
        let entries = vec![
            entry(b"alpha", b"1"),
            entry(b"beta", b""),
            entry(b"gamma", &[0, 1, 2, 3]),
        ];
        let encoded = encode_leaf(&entries);
        assert_eq!(decode_leaf(&encoded).unwrap(), entries);
    }

    #[test]
    fn test_empty_leaf() {
        let encoded = encode_leaf(&[]);
        assert_eq!(decode_leaf(&encoded).unwrap(), vec![]);
    }

    #[test]
    fn test_out_of_order_leaf_is_corrupt() {
        let mut buf = Vec::new();
        pack_uint(&mut buf, 2);
        pack_bytes(&mut buf, b"b");
        pack_bytes(&mut buf, b"");
        pack_bytes(&mut buf, b"a");
        pack_bytes(&mut buf, b"");
        assert!(decode_leaf(&buf).is_err());
    }

    #[test]
    fn test_split_respects_target() {
        let entries: Vec<_> = (0u32..100)
            .map(|i| (format!("key{i:04}").into_bytes(), vec![0u8; 30]))
            .collect();
        let leaves = split_into_leaves(entries.clone(), 200);
        assert!(leaves.len() > 1);

        let flattened: Vec<_> = leaves.into_iter().flatten().collect();
        assert_eq!(flattened, entries);
    }

    #[test]
    fn test_split_oversized_entry() {
        let entries = vec![entry(b"big", &vec![0u8; 10_000]), entry(b"small", b"x")];
        let leaves = split_into_leaves(entries, 100);
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0].len(), 1);
    }

    #[test]
    fn test_leaf_span() {
        let leaf = LeafRef {
            first_key: vec![],
            block: 0,
            len: 10_000,
            entries: 1,
        };
        assert_eq!(leaf.span(4096), 3);
        let tiny = LeafRef {
            first_key: vec![],
            block: 0,
            len: 0,
            entries: 0,
        };
        assert_eq!(tiny.span(4096), 1);
    }
}
