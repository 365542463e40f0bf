//! Database orchestration.
//!
//! This module ties the six tables, the version file, the value manager
//! and the collection statistics together: the consistent-revision open
//! protocol, the atomic multi-table commit, and the read-only
//! [`Database`] handle. The writable flavor lives in [`writable`].

pub mod writable;

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;
use uuid::Uuid;

use crate::changeset::{changeset_file_name, write_changeset_header};
use crate::document::{DocOrigin, Document, TermData};
use crate::error::{Result, ShaleError};
use crate::position::PositionTable;
use crate::postlist::{Posting, PostingListData, PostlistTable};
use crate::record::RecordTable;
use crate::spelling::SpellingTable;
use crate::stats::CollectionStats;
use crate::synonym::SynonymTable;
use crate::termlist::{TermListData, TermListTable};
use crate::util::pack::pack_uint;
use crate::values::ValueManager;
use crate::version::VersionFile;
use crate::{DocId, Revision, Slot};

pub use writable::WritableDatabase;

/// How to open a writable database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The database must already exist.
    Open,
    /// The database must not exist yet.
    Create,
    /// Create the database if it is missing.
    CreateOrOpen,
    /// Wipe any existing database and create a fresh one. The new
    /// database gets a new UUID, so replication followers discard their
    /// incremental state and fall back to a full copy.
    CreateOrOverwrite,
}

/// Bound on the consistent-open retry loop.
const OPEN_RETRIES: u32 = 100;

/// A posting list opened from a database snapshot.
#[derive(Debug, Clone)]
pub enum PostingList {
    /// Every document, as the contiguous run `1..=doccount`.
    ContiguousAllDocs { doccount: u32 },
    /// Every document, by explicit id (the id space has gaps).
    AllDocs(Vec<(DocId, u32)>),
    /// One term's postings.
    Term(PostingListData),
}

impl PostingList {
    /// Number of postings in the list.
    pub fn len(&self) -> usize {
        match self {
            PostingList::ContiguousAllDocs { doccount } => *doccount as usize,
            PostingList::AllDocs(docs) => docs.len(),
            PostingList::Term(data) => data.postings.len(),
        }
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate the postings in ascending document-id order. All-docs
    /// lists report a wdf of one.
    pub fn iter(&self) -> Box<dyn Iterator<Item = Posting> + '_> {
        match self {
            PostingList::ContiguousAllDocs { doccount } => {
                Box::new((1..=*doccount).map(|did| Posting { did, wdf: 1 }))
            }
            PostingList::AllDocs(docs) => {
                Box::new(docs.iter().map(|&(did, _)| Posting { did, wdf: 1 }))
            }
            PostingList::Term(data) => Box::new(data.postings.iter().copied()),
        }
    }
}

/// Shared state of a database handle: the tables, version file, value
/// manager and cached statistics.
#[derive(Debug)]
pub(crate) struct DbInner {
    pub(crate) dir: PathBuf,
    pub(crate) version: VersionFile,
    pub(crate) postlist: PostlistTable,
    pub(crate) position: PositionTable,
    pub(crate) termlist: TermListTable,
    pub(crate) synonym: SynonymTable,
    pub(crate) spelling: SpellingTable,
    pub(crate) record: RecordTable,
    pub(crate) value_manager: ValueManager,
    pub(crate) stats: CollectionStats,
    pub(crate) closed: bool,
}

impl DbInner {
    pub(crate) fn new<P: AsRef<Path>>(dir: P, readonly: bool) -> Self {
        let dir = dir.as_ref().to_path_buf();
        DbInner {
            version: VersionFile::new(&dir),
            postlist: PostlistTable::new(&dir, readonly),
            position: PositionTable::new(&dir, readonly),
            termlist: TermListTable::new(&dir, readonly),
            synonym: SynonymTable::new(&dir, readonly),
            spelling: SpellingTable::new(&dir, readonly),
            record: RecordTable::new(&dir, readonly),
            value_manager: ValueManager::new(),
            stats: CollectionStats::default(),
            closed: false,
            dir,
        }
    }

    /// Whether a database exists in the directory. The record table is
    /// created last, so its presence implies all the others.
    pub(crate) fn database_exists(&self) -> bool {
        self.record.table.exists() && self.postlist.table.exists()
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ShaleError::database("Database has been closed"));
        }
        Ok(())
    }

    /// Create all six tables from scratch. The postlist table goes
    /// first and the record table last, so a half-created database is
    /// never mistaken for a whole one.
    pub(crate) fn create_and_open_tables(&mut self, block_size: u32) -> Result<()> {
        self.version.create()?;
        self.postlist.table.create_and_open(block_size)?;
        self.position.table.create_and_open(block_size)?;
        self.termlist.table.create_and_open(block_size)?;
        self.synonym.table.create_and_open(block_size)?;
        self.spelling.table.create_and_open(block_size)?;
        self.record.table.create_and_open(block_size)?;

        if self.record.table.open_revision() != self.postlist.table.open_revision() {
            return Err(ShaleError::create(
                "Newly created tables are not in consistent state",
            ));
        }
        self.stats.zero();
        self.value_manager.reset();
        self.closed = false;
        Ok(())
    }

    /// Open all tables at the latest consistent revision.
    ///
    /// The record table is opened first: it is the last table written
    /// during a commit, so any revision present in it was fully
    /// committed and the other tables either hold that revision or have
    /// already moved past it. If one of them has moved on, the record
    /// table is reread and the attempt repeats at the newer revision.
    pub(crate) fn open_tables_consistent(&mut self) -> Result<()> {
        let cur_rev = self.record.table.open_revision();
        if cur_rev == 0 {
            self.version.read_and_check()?;
        }

        self.record.table.open_latest()?;
        let mut revision = self.record.table.open_revision();

        if cur_rev != 0 && cur_rev == revision {
            // Reopening with an unchanged revision; the snapshot stands.
            return Ok(());
        }

        // The optional tables may not exist yet; seed their block size
        // from the record table in case they get created.
        let block_size = self.record.table.block_size();
        self.position.table.set_block_size(block_size);
        self.termlist.table.set_block_size(block_size);
        self.synonym.table.set_block_size(block_size);
        self.spelling.table.set_block_size(block_size);

        self.value_manager.reset();

        let mut fully_opened = false;
        let mut tries_left = OPEN_RETRIES;
        while !fully_opened && tries_left > 0 {
            tries_left -= 1;
            if self.spelling.table.open_at(revision)?
                && self.synonym.table.open_at(revision)?
                && self.termlist.table.open_at(revision)?
                && self.position.table.open_at(revision)?
                && self.postlist.table.open_at(revision)?
            {
                fully_opened = true;
            } else {
                // Either a later commit has recycled this revision (the
                // record table will show a newer one), or the database
                // is corrupt (it won't).
                self.record.table.open_latest()?;
                let new_revision = self.record.table.open_revision();
                if revision == new_revision {
                    return Err(ShaleError::corrupt(
                        "Cannot open tables at consistent revisions",
                    ));
                }
                revision = new_revision;
            }
        }

        if !fully_opened {
            return Err(ShaleError::modified(
                "Cannot open tables at stable revision - changing too fast",
            ));
        }

        self.stats.read(&self.postlist)?;
        self.closed = false;
        Ok(())
    }

    /// Open all tables at exactly `revision`.
    pub(crate) fn open_tables(&mut self, revision: Revision) -> Result<()> {
        self.version.read_and_check()?;
        if !self.record.table.open_at(revision)? {
            return Err(ShaleError::database(format!(
                "Couldn't open record table at revision {revision}"
            )));
        }

        let block_size = self.record.table.block_size();
        self.position.table.set_block_size(block_size);
        self.termlist.table.set_block_size(block_size);
        self.synonym.table.set_block_size(block_size);
        self.spelling.table.set_block_size(block_size);

        self.value_manager.reset();

        for (name, opened) in [
            ("spelling", self.spelling.table.open_at(revision)?),
            ("synonym", self.synonym.table.open_at(revision)?),
            ("termlist", self.termlist.table.open_at(revision)?),
            ("position", self.position.table.open_at(revision)?),
            ("postlist", self.postlist.table.open_at(revision)?),
        ] {
            if !opened {
                return Err(ShaleError::database(format!(
                    "Couldn't open {name} table at revision {revision}"
                )));
            }
        }
        self.stats.read(&self.postlist)?;
        Ok(())
    }

    /// The open revision. Any table would do; the postlist table is the
    /// one guaranteed open in every handle.
    pub(crate) fn revision(&self) -> Revision {
        self.postlist.table.open_revision()
    }

    /// The revision the next commit will use. The postlist table is
    /// always the first committed, so it carries the highest latest
    /// revision after a crash mid-commit.
    pub(crate) fn next_revision(&self) -> Revision {
        self.postlist.table.latest_revision() + 1
    }

    pub(crate) fn any_modified(&self) -> bool {
        self.postlist.table.is_modified()
            || self.position.table.is_modified()
            || self.termlist.table.is_modified()
            || self.value_manager.is_modified()
            || self.synonym.table.is_modified()
            || self.spelling.table.is_modified()
            || self.record.table.is_modified()
    }

    /// The commit engine: merge buffered values, flush every table,
    /// optionally emit a changeset, then commit the tables with the
    /// record table last. Committing the record table is what publishes
    /// the revision; a crash before that leaves the old revision live.
    pub(crate) fn set_revision_number(
        &mut self,
        new_revision: Revision,
        max_changesets: u32,
        dangerous: bool,
    ) -> Result<()> {
        debug!(
            "committing revision {new_revision} in {}",
            self.dir.display()
        );

        self.value_manager
            .merge_changes(&self.postlist, &self.termlist)?;

        self.postlist.table.flush_db()?;
        self.position.table.flush_db()?;
        self.termlist.table.flush_db()?;
        self.synonym.table.flush_db()?;
        self.spelling.table.flush_db()?;
        self.record.table.flush_db()?;

        let mut changes: Option<(File, PathBuf)> = None;
        if max_changesets > 0 {
            let old_revision = self.revision();
            if old_revision > 0 {
                // No changeset for the very first revision.
                let path = self.dir.join(changeset_file_name(old_revision));
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)
                    .map_err(|e| {
                        ShaleError::database(format!(
                            "Couldn't open changeset {} to write: {e}",
                            path.display()
                        ))
                    })?;
                changes = Some((file, path));
            }
        }

        let result =
            self.commit_tables(new_revision, changes.as_mut().map(|(file, _)| file), dangerous);
        if let Err(e) = result {
            // Don't leave a half-written changeset for a follower to
            // trip over.
            if let Some((_, path)) = changes.take() {
                let _ = std::fs::remove_file(path);
            }
            return Err(e);
        }
        Ok(())
    }

    fn commit_tables(
        &mut self,
        new_revision: Revision,
        mut changes: Option<&mut File>,
        dangerous: bool,
    ) -> Result<()> {
        if let Some(out) = changes.as_mut() {
            let old_revision = self.revision();
            write_changeset_header(*out, old_revision, new_revision, dangerous)?;

            // Changed blocks, postlist last so it ends up warmest in the
            // follower's page cache, position just before it.
            self.termlist.table.write_changed_blocks(*out)?;
            self.synonym.table.write_changed_blocks(*out)?;
            self.spelling.table.write_changed_blocks(*out)?;
            self.record.table.write_changed_blocks(*out)?;
            self.position.table.write_changed_blocks(*out)?;
            self.postlist.table.write_changed_blocks(*out)?;
        }

        fn as_write<'a>(changes: &'a mut Option<&mut File>) -> Option<&'a mut dyn Write> {
            changes.as_deref_mut().map(|file| file as &mut dyn Write)
        }

        self.postlist
            .table
            .commit(new_revision, as_write(&mut changes), None)?;
        self.position
            .table
            .commit(new_revision, as_write(&mut changes), None)?;
        self.termlist
            .table
            .commit(new_revision, as_write(&mut changes), None)?;
        self.synonym
            .table
            .commit(new_revision, as_write(&mut changes), None)?;
        self.spelling
            .table
            .commit(new_revision, as_write(&mut changes), None)?;

        // The record table commits last, appending the changeset tail
        // once its base is durable. A follower that finds the tail
        // missing knows the end revision never went live.
        let tail = changes.as_ref().map(|_| {
            let mut tail = vec![0u8];
            pack_uint(&mut tail, new_revision);
            tail
        });
        self.record
            .table
            .commit(new_revision, as_write(&mut changes), tail.as_deref())?;
        Ok(())
    }

    /// Drop buffered state in every table and the value manager.
    pub(crate) fn cancel_tables(&mut self) -> Result<()> {
        self.postlist.table.cancel()?;
        self.position.table.cancel()?;
        self.termlist.table.cancel()?;
        self.value_manager.reset();
        self.synonym.table.cancel()?;
        self.spelling.table.cancel()?;
        self.record.table.cancel()?;
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        self.postlist.table.close();
        self.position.table.close();
        self.termlist.table.close();
        self.synonym.table.close();
        self.spelling.table.close();
        self.record.table.close();
        self.closed = true;
    }

    // --- read queries shared by both handles ---

    pub(crate) fn doc_count(&self) -> Result<u32> {
        self.ensure_open()?;
        self.record.doccount()
    }

    pub(crate) fn avg_length(&self) -> Result<f64> {
        let doccount = self.doc_count()?;
        if doccount == 0 {
            return Ok(0.0);
        }
        Ok(self.stats.total_doclen() as f64 / f64::from(doccount))
    }

    pub(crate) fn doc_length(&self, did: DocId) -> Result<u32> {
        self.ensure_open()?;
        self.postlist.get_doclength(did)
    }

    pub(crate) fn open_postlist(&self, term: &[u8]) -> Result<PostingList> {
        self.ensure_open()?;
        if term.is_empty() {
            let doccount = self.doc_count()?;
            if self.stats.last_docid() == doccount {
                return Ok(PostingList::ContiguousAllDocs { doccount });
            }
            return Ok(PostingList::AllDocs(self.postlist.all_docs()?));
        }
        Ok(PostingList::Term(self.postlist.postlist(term)?))
    }

    pub(crate) fn open_termlist(&self, did: DocId) -> Result<TermListData> {
        self.ensure_open()?;
        if !self.termlist.table.is_open() {
            return Err(ShaleError::feature_unavailable("Database has no termlist"));
        }
        self.termlist.termlist(did)
    }

    pub(crate) fn build_document(&self, did: DocId, origin: Option<DocOrigin>) -> Result<Document> {
        let data = match self.record.get_record(did) {
            Ok(data) => data,
            Err(ShaleError::DocNotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut terms = BTreeMap::new();
        if self.termlist.table.is_open() {
            match self.termlist.termlist(did) {
                Ok(tl) => {
                    for entry in tl.terms {
                        let positions = self.position.positionlist(did, &entry.term)?;
                        terms.insert(
                            entry.term,
                            TermData {
                                wdf: entry.wdf,
                                positions,
                            },
                        );
                    }
                }
                Err(ShaleError::DocNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let mut values = BTreeMap::new();
        for slot in self.termlist.slots_used(did)? {
            if let Some(value) = self.value_manager.get_value(did, slot, &self.postlist)? {
                values.insert(slot, value);
            }
        }

        Ok(Document::from_store(data, terms, values, origin))
    }
}

/// A read-only database handle.
///
/// Readers open a consistent snapshot and never block the writer: a
/// committed revision's blocks are immutable, and the double-buffered
/// base files keep the snapshot's roots intact until it reopens.
#[derive(Debug)]
pub struct Database {
    pub(crate) inner: DbInner,
}

impl Database {
    /// Open the database at `dir` read-only, at the latest consistent
    /// revision.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let mut inner = DbInner::new(dir, true);
        inner.open_tables_consistent()?;
        Ok(Database { inner })
    }

    /// Move this handle to the latest consistent revision. The observed
    /// revision never decreases.
    pub fn reopen(&mut self) -> Result<()> {
        self.inner.open_tables_consistent()
    }

    /// Close the handle. Further operations fail.
    pub fn close(&mut self) {
        self.inner.close();
    }

    /// The UUID identifying this physical database instance.
    pub fn uuid(&self) -> Uuid {
        self.inner.version.uuid()
    }

    /// The open revision.
    pub fn revision(&self) -> Revision {
        self.inner.revision()
    }

    /// Number of documents.
    pub fn doc_count(&self) -> Result<u32> {
        self.inner.doc_count()
    }

    /// The highest document id ever assigned.
    pub fn last_docid(&self) -> DocId {
        self.inner.stats.last_docid()
    }

    /// Average document length, zero for an empty database.
    pub fn avg_length(&self) -> Result<f64> {
        self.inner.avg_length()
    }

    /// Sum of all document lengths.
    pub fn total_length(&self) -> u64 {
        self.inner.stats.total_doclen()
    }

    /// The length of document `did`.
    pub fn doc_length(&self, did: DocId) -> Result<u32> {
        self.inner.doc_length(did)
    }

    /// Number of documents containing `term`.
    pub fn term_freq(&self, term: &[u8]) -> Result<u32> {
        self.inner.ensure_open()?;
        self.inner.postlist.get_termfreq(term)
    }

    /// Total occurrences of `term` across the collection.
    pub fn collection_freq(&self, term: &[u8]) -> Result<u64> {
        self.inner.ensure_open()?;
        self.inner.postlist.get_collection_freq(term)
    }

    /// Whether any document contains `term`.
    pub fn term_exists(&self, term: &[u8]) -> Result<bool> {
        self.inner.ensure_open()?;
        self.inner.postlist.term_exists(term)
    }

    /// Whether the database stores any positional information.
    pub fn has_positions(&self) -> Result<bool> {
        self.inner.ensure_open()?;
        self.inner.position.has_positions()
    }

    /// Open the posting list for `term`; an empty term yields the
    /// all-documents list.
    pub fn postlist(&self, term: &[u8]) -> Result<PostingList> {
        self.inner.open_postlist(term)
    }

    /// Open the term list of document `did`.
    pub fn termlist(&self, did: DocId) -> Result<TermListData> {
        self.inner.open_termlist(did)
    }

    /// All terms with a posting list, restricted to `prefix`, with
    /// their term and collection frequencies.
    pub fn all_terms(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, u32, u64)>> {
        self.inner.ensure_open()?;
        self.inner.postlist.all_terms(prefix)
    }

    /// The positions of `term` within document `did`.
    pub fn positionlist(&self, did: DocId, term: &[u8]) -> Result<Vec<u32>> {
        self.inner.ensure_open()?;
        self.inner.position.positionlist(did, term)
    }

    /// Open document `did`. A strict open (`lazy` false) verifies the
    /// document exists first.
    pub fn open_document(&self, did: DocId, lazy: bool) -> Result<Document> {
        self.inner.ensure_open()?;
        if !lazy {
            let _ = self.inner.doc_length(did)?;
        }
        self.inner.build_document(did, None)
    }

    /// The value of document `did` in `slot`.
    pub fn value(&self, did: DocId, slot: Slot) -> Result<Option<Vec<u8>>> {
        self.inner.ensure_open()?;
        self.inner
            .value_manager
            .get_value(did, slot, &self.inner.postlist)
    }

    /// Number of documents with a value in `slot`.
    pub fn value_freq(&self, slot: Slot) -> Result<u32> {
        self.inner.ensure_open()?;
        self.inner.value_manager.value_freq(slot, &self.inner.postlist)
    }

    /// Lower bound on the values in `slot`.
    pub fn value_lower_bound(&self, slot: Slot) -> Result<Vec<u8>> {
        self.inner.ensure_open()?;
        self.inner
            .value_manager
            .value_lower_bound(slot, &self.inner.postlist)
    }

    /// Upper bound on the values in `slot`.
    pub fn value_upper_bound(&self, slot: Slot) -> Result<Vec<u8>> {
        self.inner.ensure_open()?;
        self.inner
            .value_manager
            .value_upper_bound(slot, &self.inner.postlist)
    }

    /// All `(did, value)` pairs in `slot`, in document-id order.
    pub fn value_stream(&self, slot: Slot) -> Result<Vec<(DocId, Vec<u8>)>> {
        self.inner.ensure_open()?;
        self.inner
            .value_manager
            .value_stream(slot, &self.inner.postlist)
    }

    /// The spelling frequency of `word`.
    pub fn spelling_frequency(&self, word: &[u8]) -> Result<u32> {
        self.inner.ensure_open()?;
        self.inner.spelling.word_frequency(word)
    }

    /// All spelling words starting with `prefix`.
    pub fn spelling_words(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, u32)>> {
        self.inner.ensure_open()?;
        self.inner.spelling.words(prefix)
    }

    /// The synonyms of `term`.
    pub fn synonyms(&self, term: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.inner.ensure_open()?;
        self.inner.synonym.synonyms(term)
    }

    /// All terms with synonyms, restricted to `prefix`.
    pub fn synonym_keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.inner.ensure_open()?;
        self.inner.synonym.keys(prefix)
    }

    /// Fetch a metadata value; absent keys read as empty.
    pub fn metadata(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.inner.ensure_open()?;
        self.inner.postlist.get_metadata(key)
    }

    /// All metadata keys starting with `prefix`.
    pub fn metadata_keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.inner.ensure_open()?;
        self.inner.postlist.metadata_keys(prefix)
    }
}
