//! The synonym table: per-term synonym sets.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::Result;
use crate::table::Table;
use crate::util::pack::{pack_bytes, pack_uint, unpack_bytes, unpack_uint};

/// The synonym table.
#[derive(Debug)]
pub struct SynonymTable {
    pub(crate) table: Table,
}

impl SynonymTable {
    pub fn new<P: AsRef<Path>>(dir: P, readonly: bool) -> Self {
        SynonymTable {
            table: Table::new(dir, "synonym", readonly),
        }
    }

    fn read_set(&self, term: &[u8]) -> Result<BTreeSet<Vec<u8>>> {
        let blob = match self.table.get(term)? {
            Some(blob) => blob,
            None => return Ok(BTreeSet::new()),
        };
        let mut rest = blob.as_slice();
        let count = unpack_uint(&mut rest)? as usize;
        let mut set = BTreeSet::new();
        for _ in 0..count {
            set.insert(unpack_bytes(&mut rest)?);
        }
        Ok(set)
    }

    fn write_set(&self, term: &[u8], set: &BTreeSet<Vec<u8>>) -> Result<()> {
        if set.is_empty() {
            return self.table.del(term);
        }
        let mut blob = Vec::new();
        pack_uint(&mut blob, set.len() as u64);
        for synonym in set {
            pack_bytes(&mut blob, synonym);
        }
        self.table.set(term, &blob)
    }

    /// Add `synonym` to `term`'s synonym set.
    pub fn add_synonym(&self, term: &[u8], synonym: &[u8]) -> Result<()> {
        let mut set = self.read_set(term)?;
        if set.insert(synonym.to_vec()) {
            self.write_set(term, &set)?;
        }
        Ok(())
    }

    /// Remove `synonym` from `term`'s synonym set.
    pub fn remove_synonym(&self, term: &[u8], synonym: &[u8]) -> Result<()> {
        let mut set = self.read_set(term)?;
        if set.remove(synonym) {
            self.write_set(term, &set)?;
        }
        Ok(())
    }

    /// Remove all synonyms of `term`.
    pub fn clear_synonyms(&self, term: &[u8]) -> Result<()> {
        self.table.del(term)
    }

    /// The synonyms of `term`, in sorted order.
    pub fn synonyms(&self, term: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self.read_set(term)?.into_iter().collect())
    }

    /// All terms with synonyms, optionally restricted to a prefix.
    pub fn keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let entries = self.table.prefix_entries(prefix)?;
        Ok(entries.into_iter().map(|(key, _)| key).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> SynonymTable {
        let synonym = SynonymTable::new(dir.path(), false);
        synonym.table.create_and_open(2048).unwrap();
        synonym
    }

    #[test]
    fn test_add_and_list() {
        let dir = TempDir::new().unwrap();
        let synonym = open(&dir);

        synonym.add_synonym(b"car", b"automobile").unwrap();
        synonym.add_synonym(b"car", b"auto").unwrap();
        synonym.add_synonym(b"car", b"auto").unwrap();

        assert_eq!(
            synonym.synonyms(b"car").unwrap(),
            vec![b"auto".to_vec(), b"automobile".to_vec()]
        );
        assert_eq!(synonym.keys(b"").unwrap(), vec![b"car".to_vec()]);
        assert!(synonym.synonyms(b"boat").unwrap().is_empty());
    }

    #[test]
    fn test_remove_and_clear() {
        let dir = TempDir::new().unwrap();
        let synonym = open(&dir);

        synonym.add_synonym(b"big", b"large").unwrap();
        synonym.add_synonym(b"big", b"huge").unwrap();

        synonym.remove_synonym(b"big", b"large").unwrap();
        assert_eq!(synonym.synonyms(b"big").unwrap(), vec![b"huge".to_vec()]);

        // Removing the last synonym drops the key.
        synonym.remove_synonym(b"big", b"huge").unwrap();
        assert!(synonym.keys(b"").unwrap().is_empty());

        synonym.add_synonym(b"fast", b"quick").unwrap();
        synonym.clear_synonyms(b"fast").unwrap();
        assert!(synonym.synonyms(b"fast").unwrap().is_empty());
    }

    #[test]
    fn test_keys_by_prefix() {
        let dir = TempDir::new().unwrap();
        let synonym = open(&dir);

        synonym.add_synonym(b"color", b"colour").unwrap();
        synonym.add_synonym(b"cold", b"chilly").unwrap();
        synonym.add_synonym(b"warm", b"hot").unwrap();

        assert_eq!(
            synonym.keys(b"col").unwrap(),
            vec![b"cold".to_vec(), b"color".to_vec()]
        );
    }
}
