//! Atomic units of work over the record and posting tables.
//!
//! Every mutation runs inside one redb write transaction that opens both the
//! record tables and the posting tables. The transaction is committed only
//! after every step succeeded, and aborted otherwise, so readers (which use
//! redb read transactions) see either the state before the unit or the
//! state after it.

use std::{collections::HashSet, sync::Arc};

use rayon::prelude::*;
use redb::{Database, WriteTransaction};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    analyzer::{Analyzer, TermCounts},
    config::DuplicatePolicy,
    document::Document,
    error::{Error, Result},
    filter::Filter,
    inverted_index::PostingWriter,
    record_store::RecordWriter,
};

/// What a single document write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// New id; record and postings written.
    Inserted,
    /// Content changed; record rewritten and postings recomputed.
    Reindexed,
    /// Same content, different index or metadata; postings untouched.
    MetadataOnly,
    /// Identical to the stored document; record rewritten, postings
    /// untouched.
    Unchanged,
    /// Existing id left alone under [`DuplicatePolicy::Skip`].
    Skipped,
}

/// Result of a batch add.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddSummary {
    /// Ids of the batch, in input order.
    pub ids: Vec<String>,
    pub inserted: usize,
    pub reindexed: usize,
    pub metadata_only: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

impl AddSummary {
    fn record(&mut self, id: &str, outcome: WriteOutcome) {
        self.ids.push(id.to_string());
        match outcome {
            WriteOutcome::Inserted => self.inserted += 1,
            WriteOutcome::Reindexed => self.reindexed += 1,
            WriteOutcome::MetadataOnly => self.metadata_only += 1,
            WriteOutcome::Unchanged => self.unchanged += 1,
            WriteOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Applies mutations to both representations as one unit.
#[derive(Clone)]
pub struct SyncCoordinator {
    db: Arc<Database>,
    analyzer: Analyzer,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator").finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    pub fn new(db: Arc<Database>, analyzer: Analyzer) -> Self {
        Self { db, analyzer }
    }

    /// Insert a batch of documents in one unit of work.
    ///
    /// The batch is all-or-nothing: if any document fails (including a
    /// duplicate under [`DuplicatePolicy::Fail`]) nothing is written.
    pub fn add(
        &self,
        docs: &[Document],
        policy: DuplicatePolicy,
    ) -> Result<AddSummary> {
        if policy == DuplicatePolicy::Fail {
            let mut seen = HashSet::with_capacity(docs.len());
            if let Some(dup) = docs.iter().find(|d| !seen.insert(&d.id)) {
                return Err(Error::DuplicateId(dup.id.clone()));
            }
        }

        // Tokenize before taking the write lock.
        let counts: Vec<TermCounts> = docs
            .par_iter()
            .map(|doc| self.analyzer.term_counts(doc.content()))
            .collect();

        let summary = self.unit("add", |txn| {
            let mut records = RecordWriter::open(txn)?;
            let mut postings = PostingWriter::open(txn)?;
            let mut summary = AddSummary::default();

            for (doc, counts) in docs.iter().zip(&counts) {
                let outcome = if policy == DuplicatePolicy::Skip
                    && records.contains(&doc.id)?
                {
                    WriteOutcome::Skipped
                } else {
                    let allow_overwrite = policy != DuplicatePolicy::Fail;
                    let previous = records.put(doc, allow_overwrite)?;
                    sync_postings(&mut postings, doc, previous, || {
                        counts.clone()
                    })?
                };
                summary.record(&doc.id, outcome);
            }
            Ok(summary)
        })?;

        debug!(
            batch = docs.len(),
            inserted = summary.inserted,
            reindexed = summary.reindexed,
            skipped = summary.skipped,
            "added documents"
        );
        Ok(summary)
    }

    /// Replace an existing document.
    ///
    /// Postings are only recomputed when the content hash changed.
    pub fn update(&self, doc: &Document) -> Result<WriteOutcome> {
        let outcome = self.unit("update", |txn| {
            let mut records = RecordWriter::open(txn)?;
            let mut postings = PostingWriter::open(txn)?;

            if !records.contains(&doc.id)? {
                return Err(Error::document_not_found(&doc.id));
            }
            let previous = records.put(doc, true)?;
            sync_postings(&mut postings, doc, previous, || {
                self.analyzer.term_counts(doc.content())
            })
        })?;

        debug!(id = %doc.id, ?outcome, "updated document");
        Ok(outcome)
    }

    /// Delete documents by id. Absent ids are ignored.
    pub fn delete(&self, ids: &[String]) -> Result<usize> {
        let deleted = self.unit("delete", |txn| {
            let mut records = RecordWriter::open(txn)?;
            let mut postings = PostingWriter::open(txn)?;
            let mut deleted = 0;
            for id in ids {
                let removed = records.delete(id)?;
                postings.remove(id)?;
                if removed.is_some() {
                    deleted += 1;
                }
            }
            Ok(deleted)
        })?;

        debug!(requested = ids.len(), deleted, "deleted documents");
        Ok(deleted)
    }

    /// Delete every document in `scope` matching `filter`.
    pub fn delete_where(
        &self,
        scope: Option<&str>,
        filter: Option<&Filter>,
    ) -> Result<usize> {
        let deleted = self.unit("delete", |txn| {
            let mut records = RecordWriter::open(txn)?;
            let mut postings = PostingWriter::open(txn)?;
            let doomed = records.scan(scope, filter)?;
            for doc in &doomed {
                records.delete(&doc.id)?;
                postings.remove(&doc.id)?;
            }
            Ok(doomed.len())
        })?;

        debug!(?scope, deleted, "deleted matching documents");
        Ok(deleted)
    }

    /// Run `body` in a write transaction, committing on success and
    /// aborting on failure.
    fn unit<T>(
        &self,
        operation: &'static str,
        body: impl FnOnce(&WriteTransaction) -> Result<T>,
    ) -> Result<T> {
        let txn = self.db.begin_write()?;
        match body(&txn) {
            Ok(value) => {
                txn.commit().map_err(|e| Error::SyncFailure {
                    operation,
                    source: Box::new(e.into()),
                })?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = txn.abort() {
                    warn!(operation, error = %abort_err, "abort failed");
                }
                Err(match err {
                    Error::NotFound { .. }
                    | Error::DuplicateId(_)
                    | Error::InvalidDocument(_) => err,
                    other => Error::SyncFailure {
                        operation,
                        source: Box::new(other),
                    },
                })
            }
        }
    }
}

/// Bring the postings of `doc` in line with its freshly written record.
fn sync_postings(
    postings: &mut PostingWriter<'_>,
    doc: &Document,
    previous: Option<Document>,
    counts: impl FnOnce() -> TermCounts,
) -> Result<WriteOutcome> {
    match previous {
        Some(old)
            if old.content_hash() == doc.content_hash()
                && postings.is_indexed(&doc.id)? =>
        {
            if old == *doc {
                Ok(WriteOutcome::Unchanged)
            } else {
                Ok(WriteOutcome::MetadataOnly)
            }
        }
        previous => {
            postings.index(&doc.id, &counts())?;
            Ok(if previous.is_some() {
                WriteOutcome::Reindexed
            } else {
                WriteOutcome::Inserted
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use redb::{ReadableDatabase, backends::InMemoryBackend};

    use super::*;
    use crate::{inverted_index::PostingReader, record_store::RecordReader};

    fn coordinator() -> SyncCoordinator {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .unwrap();
        let txn = db.begin_write().unwrap();
        RecordWriter::open(&txn).unwrap();
        PostingWriter::open(&txn).unwrap();
        txn.commit().unwrap();
        SyncCoordinator::new(Arc::new(db), Analyzer::default())
    }

    fn readers(sync: &SyncCoordinator) -> (RecordReader, PostingReader) {
        let txn = sync.db.begin_read().unwrap();
        (
            RecordReader::open(&txn).unwrap(),
            PostingReader::open(&txn).unwrap(),
        )
    }

    fn doc(id: &str, content: &str) -> Document {
        Document::with_id(id, content)
    }

    #[test]
    fn add_writes_both_representations() {
        let sync = coordinator();
        let summary = sync
            .add(
                &[doc("a", "red apple"), doc("b", "green apple")],
                DuplicatePolicy::Overwrite,
            )
            .unwrap();
        assert_eq!(summary.ids, vec!["a", "b"]);
        assert_eq!(summary.inserted, 2);

        let apple = Analyzer::default().tokenize("apple").remove(0);
        let (records, postings) = readers(&sync);
        assert_eq!(records.len().unwrap(), 2);
        assert!(postings.is_indexed("a").unwrap());
        assert_eq!(postings.document_frequency(&apple).unwrap(), 2);
        assert_eq!(postings.stats().unwrap().document_count, 2);
    }

    #[test]
    fn fail_policy_rolls_back_whole_batch() {
        let sync = coordinator();
        sync.add(&[doc("a", "one")], DuplicatePolicy::Overwrite)
            .unwrap();

        let err = sync
            .add(&[doc("b", "two"), doc("a", "three")], DuplicatePolicy::Fail)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateId(ref id) if id == "a"));

        let (records, postings) = readers(&sync);
        assert!(records.get("b").unwrap().is_none());
        assert!(!postings.is_indexed("b").unwrap());
        assert_eq!(records.get("a").unwrap().unwrap().content(), "one");
        assert_eq!(postings.stats().unwrap().document_count, 1);
    }

    #[test]
    fn fail_policy_rejects_duplicates_within_batch() {
        let sync = coordinator();
        let err = sync
            .add(&[doc("a", "x"), doc("a", "y")], DuplicatePolicy::Fail)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateId(_)));
        assert_eq!(readers(&sync).0.len().unwrap(), 0);
    }

    #[test]
    fn skip_policy_keeps_existing() {
        let sync = coordinator();
        sync.add(&[doc("a", "one")], DuplicatePolicy::Overwrite)
            .unwrap();
        let summary = sync
            .add(&[doc("a", "two"), doc("b", "three")], DuplicatePolicy::Skip)
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.inserted, 1);

        let (records, postings) = readers(&sync);
        assert_eq!(records.get("a").unwrap().unwrap().content(), "one");
        assert!(postings.postings_for("two").unwrap().is_empty());
    }

    #[test]
    fn update_short_circuits_on_same_content() {
        let sync = coordinator();
        sync.add(&[doc("a", "the cat sat")], DuplicatePolicy::Overwrite)
            .unwrap();
        let rewrites = readers(&sync).1.stats().unwrap().posting_rewrites;

        let same = doc("a", "the cat sat");
        assert_eq!(sync.update(&same).unwrap(), WriteOutcome::Unchanged);

        let tagged = doc("a", "the cat sat").with_meta("tag", "pets");
        assert_eq!(sync.update(&tagged).unwrap(), WriteOutcome::MetadataOnly);

        let (records, postings) = readers(&sync);
        assert_eq!(postings.stats().unwrap().posting_rewrites, rewrites);
        assert_eq!(records.get("a").unwrap().unwrap(), tagged);

        let changed = doc("a", "the dog sat");
        assert_eq!(sync.update(&changed).unwrap(), WriteOutcome::Reindexed);
        let (_, postings) = readers(&sync);
        assert_eq!(postings.stats().unwrap().posting_rewrites, rewrites + 1);
        assert!(postings.postings_for("cat").unwrap().is_empty());
        assert_eq!(postings.postings_for("dog").unwrap().len(), 1);
    }

    #[test]
    fn update_of_missing_document_is_not_found() {
        let sync = coordinator();
        let err = sync.update(&doc("ghost", "boo")).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(readers(&sync).0.len().unwrap(), 0);
    }

    #[test]
    fn delete_removes_record_and_postings() {
        let sync = coordinator();
        sync.add(
            &[doc("a", "alpha"), doc("b", "alpha beta")],
            DuplicatePolicy::Overwrite,
        )
        .unwrap();

        let deleted = sync
            .delete(&["a".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(deleted, 1);

        let (records, postings) = readers(&sync);
        assert!(records.get("a").unwrap().is_none());
        assert!(!postings.is_indexed("a").unwrap());
        assert_eq!(postings.postings_for("alpha").unwrap().len(), 1);
        assert_eq!(postings.stats().unwrap().document_count, 1);
    }

    #[test]
    fn delete_where_uses_filter() {
        let sync = coordinator();
        sync.add(
            &[
                doc("a", "x").in_index("A"),
                doc("b", "x").in_index("B"),
                doc("c", "x").in_index("A").with_meta("keep", true),
            ],
            DuplicatePolicy::Overwrite,
        )
        .unwrap();

        let filter = Filter::eq("keep", true).not();
        assert_eq!(sync.delete_where(Some("A"), Some(&filter)).unwrap(), 1);

        let (records, postings) = readers(&sync);
        let ids: Vec<_> = records
            .scan(None, None)
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(postings.stats().unwrap().document_count, 2);
    }
}
