//! The writable database handle.
//!
//! All mutations land in an in-memory write buffer first: per-term
//! frequency deltas, per-document lengths, and per-term posting-list
//! modification maps. The buffer drains into the postlist table through
//! a single `merge_changes` call per flush window, which keeps the
//! expensive table work amortized across many documents.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use log::debug;
use uuid::Uuid;

use crate::config::{DatabaseConfig, ResolvedConfig};
use crate::database::{Action, DbInner, PostingList};
use crate::document::{DocOrigin, Document};
use crate::error::{Result, ShaleError};
use crate::lock::WriteLock;
use crate::postlist::{
    term_too_long, BufferedLen, FreqDelta, ModifiedPostings, Posting, PostingChange,
    MAX_SAFE_TERM_LENGTH,
};
use crate::stats::CollectionStats;
use crate::termlist::TermListData;
use crate::{DocId, Revision, Slot};

/// The writable database handle. At most one exists per directory,
/// guarded by the write lock.
#[derive(Debug)]
pub struct WritableDatabase {
    inner: DbInner,
    lock: WriteLock,
    config: ResolvedConfig,

    freq_deltas: BTreeMap<Vec<u8>, FreqDelta>,
    doclens: BTreeMap<DocId, BufferedLen>,
    mod_plists: BTreeMap<Vec<u8>, ModifiedPostings>,
    change_count: u32,

    /// Statistics as last written to the postlist table; flushing is
    /// skipped entirely when nothing has moved.
    stats_snapshot: CollectionStats,

    in_transaction: bool,
    modify_shortcut: Option<DocOrigin>,
    next_origin_token: u64,
}

impl WritableDatabase {
    /// Open or create the database at `dir` with default configuration.
    pub fn open<P: AsRef<Path>>(dir: P, action: Action) -> Result<Self> {
        Self::with_config(dir, action, DatabaseConfig::default())
    }

    /// Open or create the database at `dir`.
    pub fn with_config<P: AsRef<Path>>(
        dir: P,
        action: Action,
        config: DatabaseConfig,
    ) -> Result<Self> {
        let dir: PathBuf = dir.as_ref().to_path_buf();
        let config = config.resolve();
        let mut inner = DbInner::new(&dir, false);
        let mut lock = WriteLock::new(&dir);

        if action != Action::Open && !inner.database_exists() {
            match std::fs::metadata(&dir) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    return Err(ShaleError::create(format!(
                        "Cannot create directory {}: path exists and is not a directory",
                        dir.display()
                    )));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    std::fs::create_dir_all(&dir).map_err(|e| {
                        ShaleError::create(format!(
                            "Cannot create directory {}: {e}",
                            dir.display()
                        ))
                    })?;
                }
                Err(e) => {
                    return Err(ShaleError::create(format!(
                        "Cannot create directory {}: {e}",
                        dir.display()
                    )));
                }
            }
            lock.acquire_for_database(&dir, true, false)?;
            inner.create_and_open_tables(config.block_size)?;
            return Ok(Self::assemble(inner, lock, config));
        }

        if action == Action::Create {
            return Err(ShaleError::create(format!(
                "Can't create new database at {}: a database already exists \
                 and I was told not to overwrite it",
                dir.display()
            )));
        }

        let missing = !inner.database_exists();
        lock.acquire_for_database(&dir, false, missing)?;

        if action == Action::CreateOrOverwrite {
            remove_stale_changesets(&dir)?;
            inner.create_and_open_tables(config.block_size)?;
            return Ok(Self::assemble(inner, lock, config));
        }

        inner.open_tables_consistent()?;

        let mut db = Self::assemble(inner, lock, config);
        if db.inner.record.table.open_revision() != db.inner.postlist.table.latest_revision() {
            // A crash landed between the postlist commit and the record
            // commit; produce a fresh consistent revision.
            let next = db.inner.next_revision();
            debug!("recovering interrupted commit by moving to revision {next}");
            db.inner
                .set_revision_number(next, config.max_changesets, config.dangerous_changesets)?;
        }
        Ok(db)
    }

    fn assemble(inner: DbInner, lock: WriteLock, config: ResolvedConfig) -> Self {
        let stats_snapshot = inner.stats.clone();
        WritableDatabase {
            inner,
            lock,
            config,
            freq_deltas: BTreeMap::new(),
            doclens: BTreeMap::new(),
            mod_plists: BTreeMap::new(),
            change_count: 0,
            stats_snapshot,
            in_transaction: false,
            modify_shortcut: None,
            next_origin_token: 1,
        }
    }

    // --- mutation API ---

    /// Add a document under the next unused id, returning the id.
    pub fn add_document(&mut self, doc: &Document) -> Result<DocId> {
        self.inner.ensure_open()?;
        let did = self.inner.stats.next_docid()?;
        if let Err(e) = self.add_document_inner(did, doc) {
            self.cancel()?;
            return Err(e);
        }
        self.after_change()?;
        Ok(did)
    }

    fn add_document_inner(&mut self, did: DocId, doc: &Document) -> Result<()> {
        // Record first, then values, then postings.
        self.inner.record.replace_record(doc.data(), did)?;
        self.inner
            .value_manager
            .add_document(did, doc, &self.inner.postlist)?;

        let mut new_doclen = 0u32;
        for (term, data) in doc.terms() {
            let wdf = data.wdf;
            new_doclen += wdf;
            self.inner.stats.check_wdf(wdf);

            if term_too_long(term) {
                return Err(ShaleError::invalid_argument(format!(
                    "Term too long (> {MAX_SAFE_TERM_LENGTH}): {}",
                    String::from_utf8_lossy(term)
                )));
            }

            let delta = self.freq_deltas.entry(term.to_vec()).or_default();
            delta.termfreq += 1;
            delta.collfreq += i64::from(wdf);

            // Re-adding a document deleted since the last flush leaves
            // a buffered delete behind; the combined effect is a
            // modification of the committed posting.
            let plist = self.mod_plists.entry(term.to_vec()).or_default();
            let change = match plist.get(&did) {
                Some(PostingChange::Delete) => PostingChange::Modify(wdf),
                Some(_) => {
                    debug_assert!(false, "posting buffered twice for one add");
                    PostingChange::Modify(wdf)
                }
                None => PostingChange::Add(wdf),
            };
            plist.insert(did, change);

            if !data.positions.is_empty() {
                self.inner.position.set_positionlist(did, term, &data.positions)?;
            }
        }

        if self.inner.termlist.table.is_open() {
            self.inner.termlist.set_termlist(did, doc, new_doclen)?;
        }

        debug_assert!(matches!(
            self.doclens.get(&did),
            None | Some(BufferedLen::Deleted)
        ));
        self.doclens.insert(did, BufferedLen::Set(new_doclen));
        self.inner.stats.add_document(new_doclen);
        Ok(())
    }

    /// Delete document `did`.
    pub fn delete_document(&mut self, did: DocId) -> Result<()> {
        self.inner.ensure_open()?;
        if did == 0 {
            return Err(ShaleError::invalid_argument("Document id 0 is invalid"));
        }
        if !self.inner.termlist.table.is_open() {
            return Err(ShaleError::feature_unavailable("Database has no termlist"));
        }

        if self.modify_shortcut.is_some_and(|origin| origin.did == did) {
            // The shortcut document is gone; it can't back a
            // modification any more.
            self.modify_shortcut = None;
        }

        // Remove the record first. If the document doesn't exist this
        // fails without touching anything, so no cleanup is needed.
        self.inner.record.delete_record(did)?;

        if let Err(e) = self.delete_document_inner(did) {
            self.cancel()?;
            return Err(e);
        }
        self.after_change()
    }

    fn delete_document_inner(&mut self, did: DocId) -> Result<()> {
        self.inner
            .value_manager
            .delete_document(did, &self.inner.postlist, &self.inner.termlist)?;

        let tl = self.inner.termlist.termlist(did)?;
        self.inner.stats.delete_document(tl.doclen);

        for entry in &tl.terms {
            self.inner.position.delete_positionlist(did, &entry.term)?;

            let delta = self.freq_deltas.entry(entry.term.clone()).or_default();
            delta.termfreq -= 1;
            delta.collfreq -= i64::from(entry.wdf);

            // A delete overrides any buffered add or modify for the
            // same document.
            let plist = self.mod_plists.entry(entry.term.clone()).or_default();
            plist.insert(did, PostingChange::Delete);
        }

        self.inner.termlist.delete_termlist(did)?;
        self.doclens.insert(did, BufferedLen::Deleted);
        Ok(())
    }

    /// Replace (or newly add) the document under `did`.
    ///
    /// When `doc` is the exact document last returned by
    /// [`open_document`](Self::open_document) on this handle, any part
    /// the caller did not touch is skipped; replacing an unmodified
    /// document is a no-op.
    pub fn replace_document(&mut self, did: DocId, doc: &Document) -> Result<()> {
        self.inner.ensure_open()?;
        if did == 0 {
            return Err(ShaleError::invalid_argument("Document id 0 is invalid"));
        }
        if let Err(e) = self.replace_document_inner(did, doc) {
            self.cancel()?;
            return Err(e);
        }
        self.after_change()
    }

    fn replace_document_inner(&mut self, did: DocId, doc: &Document) -> Result<()> {
        if did > self.inner.stats.last_docid() {
            // Above the watermark, so this can't replace anything.
            self.inner.stats.set_last_docid(did);
            return self.add_document_inner(did, doc);
        }

        if !self.inner.termlist.table.is_open() {
            // An unused id at or below the watermark can still be added.
            if !self.buffered_document_exists(did)? {
                return self.add_document_inner(did, doc);
            }
            return Err(ShaleError::feature_unavailable("Database has no termlist"));
        }

        let mut modifying = false;
        if let Some(shortcut) = self.modify_shortcut {
            if shortcut.did == did {
                match doc.origin() {
                    Some(origin) if origin.did == did && origin.token == shortcut.token => {
                        debug!("document {did} modification shortcut");
                        modifying = true;
                    }
                    _ => {
                        // Same id, different object: the shortcut
                        // document is about to be overwritten.
                        self.modify_shortcut = None;
                    }
                }
            }
        }

        if !modifying || doc.terms_modified() {
            let tl = match self.inner.termlist.termlist(did) {
                Ok(tl) => tl,
                Err(ShaleError::DocNotFound(_)) => {
                    return self.add_document_inner(did, doc);
                }
                Err(e) => return Err(e),
            };

            let new_terms: BTreeSet<&[u8]> = doc.terms().map(|(term, _)| term).collect();

            // Remove the old postings.
            for entry in &tl.terms {
                let delta = self.freq_deltas.entry(entry.term.clone()).or_default();
                delta.termfreq -= 1;
                delta.collfreq -= i64::from(entry.wdf);

                let plist = self.mod_plists.entry(entry.term.clone()).or_default();
                plist.insert(did, PostingChange::Delete);

                if !new_terms.contains(entry.term.as_slice()) {
                    self.inner.position.delete_positionlist(did, &entry.term)?;
                }
            }
            self.inner.stats.delete_document(tl.doclen);

            // Add the new postings.
            let mut new_doclen = 0u32;
            for (term, data) in doc.terms() {
                let wdf = data.wdf;
                new_doclen += wdf;
                self.inner.stats.check_wdf(wdf);

                if term_too_long(term) {
                    return Err(ShaleError::invalid_argument(format!(
                        "Term too long (> {MAX_SAFE_TERM_LENGTH}): {}",
                        String::from_utf8_lossy(term)
                    )));
                }

                let delta = self.freq_deltas.entry(term.to_vec()).or_default();
                delta.termfreq += 1;
                delta.collfreq += i64::from(wdf);

                let plist = self.mod_plists.entry(term.to_vec()).or_default();
                let change = match plist.get(&did) {
                    // The removal half buffered a delete; the document
                    // keeps the term, so this is a modification.
                    Some(_) => PostingChange::Modify(wdf),
                    None => PostingChange::Add(wdf),
                };
                plist.insert(did, change);

                if !data.positions.is_empty() {
                    self.inner.position.set_positionlist(did, term, &data.positions)?;
                } else {
                    self.inner.position.delete_positionlist(did, term)?;
                }
            }

            self.inner.termlist.set_termlist(did, doc, new_doclen)?;
            self.doclens.insert(did, BufferedLen::Set(new_doclen));
            self.inner.stats.add_document(new_doclen);
        }

        if !modifying || doc.data_modified() {
            self.inner.record.replace_record(doc.data(), did)?;
        }

        if !modifying || doc.values_modified() {
            self.inner.value_manager.replace_document(
                did,
                doc,
                &self.inner.postlist,
                &self.inner.termlist,
            )?;
        }
        Ok(())
    }

    fn buffered_document_exists(&self, did: DocId) -> Result<bool> {
        match self.doclens.get(&did) {
            Some(BufferedLen::Set(_)) => Ok(true),
            Some(BufferedLen::Deleted) => Ok(false),
            None => self.inner.postlist.document_exists(did),
        }
    }

    fn after_change(&mut self) -> Result<()> {
        self.change_count += 1;
        if self.change_count >= self.config.flush_threshold {
            self.flush_postlist_changes()?;
            if !self.in_transaction {
                self.apply()?;
            }
        }
        Ok(())
    }

    // --- commit machinery ---

    /// Merge the write buffer into the postlist table and rewrite the
    /// statistics entry. A no-op when the buffer is empty and the
    /// statistics haven't moved.
    fn flush_postlist_changes(&mut self) -> Result<()> {
        let buffers_empty = self.mod_plists.is_empty()
            && self.doclens.is_empty()
            && self.freq_deltas.is_empty();
        if buffers_empty && self.inner.stats == self.stats_snapshot {
            self.change_count = 0;
            return Ok(());
        }

        self.inner
            .postlist
            .merge_changes(&self.mod_plists, &self.doclens, &self.freq_deltas)?;
        self.inner.stats.write(&self.inner.postlist)?;
        self.stats_snapshot = self.inner.stats.clone();

        self.freq_deltas.clear();
        self.doclens.clear();
        self.mod_plists.clear();
        self.change_count = 0;
        Ok(())
    }

    fn apply(&mut self) -> Result<()> {
        if !self.inner.any_modified() {
            return Ok(());
        }
        let old_revision = self.inner.revision();
        let new_revision = self.inner.next_revision();
        if let Err(e) = self.inner.set_revision_number(
            new_revision,
            self.config.max_changesets,
            self.config.dangerous_changesets,
        ) {
            self.modifications_failed(old_revision, new_revision, &e)?;
            return Err(e);
        }
        Ok(())
    }

    /// Recovery from a failed commit: drop everything buffered, reopen
    /// at the old revision, and retry one revision further on. Skipping
    /// a revision number means any half-written state for the failed
    /// one can never be mistaken for a commit.
    fn modifications_failed(
        &mut self,
        old_revision: Revision,
        new_revision: Revision,
        original: &ShaleError,
    ) -> Result<()> {
        let max_changesets = self.config.max_changesets;
        let dangerous = self.config.dangerous_changesets;
        let attempt = (|| -> Result<()> {
            self.cancel()?;
            self.inner.open_tables(old_revision)?;
            self.inner
                .set_revision_number(new_revision + 1, max_changesets, dangerous)?;
            Ok(())
        })();

        if let Err(recovery_error) = attempt {
            // No consistent state is reachable; close to avoid the risk
            // of corruption.
            self.inner.close();
            return Err(ShaleError::database(format!(
                "Modifications failed ({original}), and cannot set consistent \
                 table revision numbers: {recovery_error}"
            )));
        }
        Ok(())
    }

    /// Commit all pending changes, making them durable and visible to
    /// new readers under a fresh revision.
    pub fn commit(&mut self) -> Result<()> {
        self.inner.ensure_open()?;
        if self.in_transaction {
            return Err(ShaleError::invalid_operation(
                "Can't commit during a transaction",
            ));
        }
        if self.change_count > 0 {
            self.flush_postlist_changes()?;
        }
        self.apply()
    }

    /// Discard all uncommitted changes and restore the in-memory
    /// statistics to the last committed state.
    pub fn cancel(&mut self) -> Result<()> {
        self.inner.cancel_tables()?;
        self.inner.stats.read(&self.inner.postlist)?;
        self.stats_snapshot = self.inner.stats.clone();
        self.freq_deltas.clear();
        self.doclens.clear();
        self.mod_plists.clear();
        self.change_count = 0;
        Ok(())
    }

    // --- transactions ---

    /// Begin a transaction. Pending changes are committed first;
    /// automatic flushing then stops advancing the revision until the
    /// transaction ends.
    pub fn begin_transaction(&mut self) -> Result<()> {
        self.inner.ensure_open()?;
        if self.in_transaction {
            return Err(ShaleError::invalid_operation(
                "A transaction is already active",
            ));
        }
        self.commit()?;
        self.in_transaction = true;
        Ok(())
    }

    /// Commit the active transaction.
    pub fn commit_transaction(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(ShaleError::invalid_operation("No transaction is active"));
        }
        self.in_transaction = false;
        self.commit()
    }

    /// Abort the active transaction, dropping its changes.
    pub fn cancel_transaction(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(ShaleError::invalid_operation("No transaction is active"));
        }
        self.in_transaction = false;
        self.cancel()
    }

    /// Whether a transaction is active.
    pub fn transaction_active(&self) -> bool {
        self.in_transaction
    }

    // --- spelling, synonyms, metadata ---

    /// Raise the spelling frequency of `word`.
    pub fn add_spelling(&mut self, word: &[u8], freq_inc: u32) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.spelling.add_word(word, freq_inc)
    }

    /// Lower the spelling frequency of `word`.
    pub fn remove_spelling(&mut self, word: &[u8], freq_dec: u32) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.spelling.remove_word(word, freq_dec)
    }

    /// Add a synonym for `term`.
    pub fn add_synonym(&mut self, term: &[u8], synonym: &[u8]) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.synonym.add_synonym(term, synonym)
    }

    /// Remove a synonym of `term`.
    pub fn remove_synonym(&mut self, term: &[u8], synonym: &[u8]) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.synonym.remove_synonym(term, synonym)
    }

    /// Remove all synonyms of `term`.
    pub fn clear_synonyms(&mut self, term: &[u8]) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.synonym.clear_synonyms(term)
    }

    /// Set a metadata value; an empty value deletes the entry.
    pub fn set_metadata(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.ensure_open()?;
        if key.is_empty() {
            return Err(ShaleError::invalid_argument(
                "Empty metadata keys are invalid",
            ));
        }
        self.inner.postlist.set_metadata(key, value)
    }

    // --- read API (buffer-aware where it matters) ---

    /// The UUID identifying this physical database instance.
    pub fn uuid(&self) -> Uuid {
        self.inner.version.uuid()
    }

    /// The open revision.
    pub fn revision(&self) -> Revision {
        self.inner.revision()
    }

    /// Number of documents, including buffered additions and deletions.
    pub fn doc_count(&self) -> Result<u32> {
        self.inner.doc_count()
    }

    /// The highest document id ever assigned.
    pub fn last_docid(&self) -> DocId {
        self.inner.stats.last_docid()
    }

    /// Average document length.
    pub fn avg_length(&self) -> Result<f64> {
        self.inner.avg_length()
    }

    /// Sum of all document lengths.
    pub fn total_length(&self) -> u64 {
        self.inner.stats.total_doclen()
    }

    /// The length of document `did`, seeing buffered changes.
    pub fn doc_length(&self, did: DocId) -> Result<u32> {
        self.inner.ensure_open()?;
        match self.doclens.get(&did) {
            Some(BufferedLen::Set(len)) => Ok(*len),
            Some(BufferedLen::Deleted) => Err(ShaleError::doc_not_found(format!(
                "Document {did} not found"
            ))),
            None => self.inner.doc_length(did),
        }
    }

    /// Number of documents containing `term`, seeing buffered changes.
    pub fn term_freq(&self, term: &[u8]) -> Result<u32> {
        self.inner.ensure_open()?;
        let mut freq = i64::from(self.inner.postlist.get_termfreq(term)?);
        if let Some(delta) = self.freq_deltas.get(term) {
            freq += delta.termfreq;
        }
        Ok(freq.max(0) as u32)
    }

    /// Collection frequency of `term`, seeing buffered changes.
    pub fn collection_freq(&self, term: &[u8]) -> Result<u64> {
        self.inner.ensure_open()?;
        let mut freq = self.inner.postlist.get_collection_freq(term)? as i64;
        if let Some(delta) = self.freq_deltas.get(term) {
            freq += delta.collfreq;
        }
        Ok(freq.max(0) as u64)
    }

    /// Whether any document contains `term`, seeing buffered changes.
    pub fn term_exists(&self, term: &[u8]) -> Result<bool> {
        Ok(self.term_freq(term)? != 0)
    }

    /// Whether the database stores any positional information.
    pub fn has_positions(&self) -> Result<bool> {
        self.inner.ensure_open()?;
        self.inner.position.has_positions()
    }

    /// Open the posting list for `term`, overlaying buffered changes;
    /// an empty term yields the all-documents list.
    pub fn postlist(&self, term: &[u8]) -> Result<PostingList> {
        self.inner.ensure_open()?;
        if term.is_empty() {
            if self.doclens.is_empty() {
                return self.inner.open_postlist(term);
            }
            let mut docs: BTreeMap<DocId, u32> =
                self.inner.postlist.all_docs()?.into_iter().collect();
            for (&did, len) in &self.doclens {
                match len {
                    BufferedLen::Set(len) => {
                        docs.insert(did, *len);
                    }
                    BufferedLen::Deleted => {
                        docs.remove(&did);
                    }
                }
            }
            return Ok(PostingList::AllDocs(docs.into_iter().collect()));
        }

        let changes = match self.mod_plists.get(term) {
            Some(changes) => changes,
            None => return self.inner.open_postlist(term),
        };

        let mut data = self.inner.postlist.postlist(term)?;
        if let Some(delta) = self.freq_deltas.get(term) {
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
        data.postings = postings
            .into_iter()
            .map(|(did, wdf)| Posting { did, wdf })
            .collect();
        Ok(PostingList::Term(data))
    }

    /// Open the term list of document `did`.
    pub fn termlist(&self, did: DocId) -> Result<TermListData> {
        self.inner.open_termlist(did)
    }

    /// All terms with a posting list. Buffered postlist changes are
    /// flushed first so the scan sees them.
    pub fn all_terms(&mut self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, u32, u64)>> {
        self.inner.ensure_open()?;
        if self.change_count > 0 {
            self.flush_postlist_changes()?;
        }
        self.inner.postlist.all_terms(prefix)
    }

    /// The positions of `term` within document `did`.
    pub fn positionlist(&self, did: DocId, term: &[u8]) -> Result<Vec<u32>> {
        self.inner.ensure_open()?;
        self.inner.position.positionlist(did, term)
    }

    /// Open document `did`. The returned document can be passed back to
    /// [`replace_document`](Self::replace_document) to get the
    /// modification shortcut.
    pub fn open_document(&mut self, did: DocId, lazy: bool) -> Result<Document> {
        self.inner.ensure_open()?;
        if !lazy {
            let _ = self.doc_length(did)?;
        }
        let origin = DocOrigin {
            token: self.next_origin_token,
            did,
        };
        self.next_origin_token += 1;
        let doc = self.inner.build_document(did, Some(origin))?;
        // Only remember the shortcut once the open has succeeded.
        self.modify_shortcut = Some(origin);
        Ok(doc)
    }

    /// The value of document `did` in `slot`, seeing buffered changes.
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

    /// All `(did, value)` pairs in `slot`. Buffered value changes are
    /// merged into the table buffer first so the scan sees them.
    pub fn value_stream(&mut self, slot: Slot) -> Result<Vec<(DocId, Vec<u8>)>> {
        self.inner.ensure_open()?;
        if self.inner.value_manager.is_modified() {
            self.inner
                .value_manager
                .merge_changes(&self.inner.postlist, &self.inner.termlist)?;
        }
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

    /// Close the handle, releasing the write lock. Uncommitted changes
    /// are discarded; call [`commit`](Self::commit) first to keep them.
    pub fn close(&mut self) {
        self.inner.close();
        self.lock.release();
    }
}

fn remove_stale_changesets(dir: &Path) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(name) = name.to_str() {
            if let Some(rest) = name.strip_prefix("changes") {
                if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
                    std::fs::remove_file(entry.path())?;
                }
            }
        }
    }
    Ok(())
}
