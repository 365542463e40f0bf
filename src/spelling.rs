//! The spelling table: word frequencies backing spelling correction.
//!
//! The table maps words to packed frequencies. Mutations go through the
//! table's write buffer, so spelling data participates in the shared
//! commit and changeset protocol like every other table.

use std::path::Path;

use crate::error::Result;
use crate::table::Table;
use crate::util::pack::{pack_uint, unpack_uint};

/// The spelling table.
#[derive(Debug)]
pub struct SpellingTable {
    pub(crate) table: Table,
}

impl SpellingTable {
    pub fn new<P: AsRef<Path>>(dir: P, readonly: bool) -> Self {
        SpellingTable {
            table: Table::new(dir, "spelling", readonly),
        }
    }

    /// Raise `word`'s frequency by `freq_inc`.
    pub fn add_word(&self, word: &[u8], freq_inc: u32) -> Result<()> {
        if word.is_empty() || freq_inc == 0 {
            return Ok(());
        }
        let freq = self.word_frequency(word)? + freq_inc;
        let mut blob = Vec::new();
        pack_uint(&mut blob, u64::from(freq));
        self.table.set(word, &blob)
    }

    /// Lower `word`'s frequency by `freq_dec`, removing the word when
    /// it reaches zero.
    pub fn remove_word(&self, word: &[u8], freq_dec: u32) -> Result<()> {
        if word.is_empty() {
            return Ok(());
        }
        let freq = self.word_frequency(word)?;
        if freq <= freq_dec {
            return self.table.del(word);
        }
        let mut blob = Vec::new();
        pack_uint(&mut blob, u64::from(freq - freq_dec));
        self.table.set(word, &blob)
    }

    /// The frequency of `word`; zero when unknown.
    pub fn word_frequency(&self, word: &[u8]) -> Result<u32> {
        match self.table.get(word)? {
            Some(blob) => {
                let mut rest = blob.as_slice();
                Ok(unpack_uint(&mut rest)? as u32)
            }
            None => Ok(0),
        }
    }

    /// All words starting with `prefix`, with their frequencies.
    pub fn words(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, u32)>> {
        let entries = self.table.prefix_entries(prefix)?;
        let mut words = Vec::with_capacity(entries.len());
        for (word, blob) in entries {
            let mut rest = blob.as_slice();
            words.push((word, unpack_uint(&mut rest)? as u32));
        }
        Ok(words)
    }
}
