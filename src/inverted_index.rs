//! Inverted index tables and BM25 scoring.
//!
//! Tables, all inside the store file:
//!
//! - `postings`: (term, id) -> term frequency
//! - `term_documents`: term -> number of documents containing it
//! - `document_terms`: id -> JSON [`TermCounts`] (forward list used to
//!   remove a document's postings)
//! - `document_lengths`: id -> token count
//! - `index_stats`: counters for document count, total length and posting
//!   rewrites
//!
//! Statistics are updated by the same calls that write postings, so they
//! commit or roll back with them.

use std::collections::HashMap;

use redb::{
    ReadOnlyTable,
    ReadTransaction,
    ReadableTable,
    Table,
    TableDefinition,
    WriteTransaction,
};
use serde::Serialize;

use crate::{analyzer::TermCounts, error::Result};

pub(crate) const POSTINGS: TableDefinition<(&str, &str), u32> =
    TableDefinition::new("postings");
pub(crate) const TERM_DOCUMENTS: TableDefinition<&str, u64> =
    TableDefinition::new("term_documents");
pub(crate) const DOCUMENT_TERMS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("document_terms");
pub(crate) const DOCUMENT_LENGTHS: TableDefinition<&str, u64> =
    TableDefinition::new("document_lengths");
pub(crate) const INDEX_STATS: TableDefinition<&str, u64> =
    TableDefinition::new("index_stats");

const STAT_DOCUMENT_COUNT: &str = "document_count";
const STAT_TOTAL_LENGTH: &str = "total_length";
const STAT_POSTING_REWRITES: &str = "posting_rewrites";

/// BM25 term frequency saturation.
pub const BM25_K1: f64 = 1.2;
/// BM25 length normalization.
pub const BM25_B: f64 = 0.75;

/// Corpus statistics used for BM25 normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub document_count: u64,
    pub total_length: u64,
    pub average_document_length: f64,
    /// Number of times any document's posting set has been (re)written.
    pub posting_rewrites: u64,
}

impl IndexStats {
    fn new(document_count: u64, total_length: u64, rewrites: u64) -> Self {
        let average_document_length = if document_count == 0 {
            0.0
        } else {
            total_length as f64 / document_count as f64
        };
        Self {
            document_count,
            total_length,
            average_document_length,
            posting_rewrites: rewrites,
        }
    }
}

/// Score contribution of one document for the query so far.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TermHits {
    pub score: f64,
    /// Number of distinct query terms found in the document.
    pub matched_terms: usize,
}

/// `ln(1 + (N - n + 0.5) / (n + 0.5))`, always positive.
pub fn idf(document_count: u64, documents_with_term: u64) -> f64 {
    let n = documents_with_term as f64;
    let total = document_count as f64;
    (1.0 + (total - n + 0.5) / (n + 0.5)).ln()
}

/// BM25 contribution of a single term occurring `tf` times in a document of
/// `length` tokens.
pub fn bm25_term(idf: f64, tf: u32, length: u64, avgdl: f64) -> f64 {
    let tf = f64::from(tf);
    let relative_length = if avgdl > 0.0 {
        length as f64 / avgdl
    } else {
        0.0
    };
    let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * relative_length);
    idf * (tf * (BM25_K1 + 1.0)) / (tf + norm)
}

/// Index tables opened in one transaction.
pub(crate) struct PostingTables<P, N, F, L, S> {
    postings: P,
    term_documents: N,
    document_terms: F,
    document_lengths: L,
    stats: S,
}

pub(crate) type PostingReader = PostingTables<
    ReadOnlyTable<(&'static str, &'static str), u32>,
    ReadOnlyTable<&'static str, u64>,
    ReadOnlyTable<&'static str, &'static [u8]>,
    ReadOnlyTable<&'static str, u64>,
    ReadOnlyTable<&'static str, u64>,
>;

pub(crate) type PostingWriter<'txn> = PostingTables<
    Table<'txn, (&'static str, &'static str), u32>,
    Table<'txn, &'static str, u64>,
    Table<'txn, &'static str, &'static [u8]>,
    Table<'txn, &'static str, u64>,
    Table<'txn, &'static str, u64>,
>;

impl PostingReader {
    pub fn open(txn: &ReadTransaction) -> Result<Self> {
        Ok(Self {
            postings: txn.open_table(POSTINGS)?,
            term_documents: txn.open_table(TERM_DOCUMENTS)?,
            document_terms: txn.open_table(DOCUMENT_TERMS)?,
            document_lengths: txn.open_table(DOCUMENT_LENGTHS)?,
            stats: txn.open_table(INDEX_STATS)?,
        })
    }
}

impl<'txn> PostingWriter<'txn> {
    pub fn open(txn: &'txn WriteTransaction) -> Result<Self> {
        Ok(Self {
            postings: txn.open_table(POSTINGS)?,
            term_documents: txn.open_table(TERM_DOCUMENTS)?,
            document_terms: txn.open_table(DOCUMENT_TERMS)?,
            document_lengths: txn.open_table(DOCUMENT_LENGTHS)?,
            stats: txn.open_table(INDEX_STATS)?,
        })
    }

    /// Write or replace the posting set of a document.
    pub fn index(&mut self, id: &str, counts: &TermCounts) -> Result<()> {
        let previous_length = self.remove_terms(id)?;

        for (term, &tf) in &counts.frequencies {
            self.postings.insert((term.as_str(), id), tf)?;
            let df = self.document_frequency(term)?;
            self.term_documents.insert(term.as_str(), df + 1)?;
        }
        let forward = serde_json::to_vec(counts)?;
        self.document_terms.insert(id, forward.as_slice())?;
        self.document_lengths.insert(id, counts.length)?;

        let stats = self.stats()?;
        let (count, total) = match previous_length {
            Some(old) => (stats.document_count, stats.total_length - old),
            None => (stats.document_count + 1, stats.total_length),
        };
        self.set_stat(STAT_DOCUMENT_COUNT, count)?;
        self.set_stat(STAT_TOTAL_LENGTH, total + counts.length)?;
        self.set_stat(STAT_POSTING_REWRITES, stats.posting_rewrites + 1)?;
        Ok(())
    }

    /// Delete every posting of a document. Returns whether it was indexed.
    pub fn remove(&mut self, id: &str) -> Result<bool> {
        let Some(length) = self.remove_terms(id)? else {
            return Ok(false);
        };
        let stats = self.stats()?;
        self.set_stat(
            STAT_DOCUMENT_COUNT,
            stats.document_count.saturating_sub(1),
        )?;
        self.set_stat(
            STAT_TOTAL_LENGTH,
            stats.total_length.saturating_sub(length),
        )?;
        Ok(true)
    }

    /// Drop postings, forward list and length of `id` without touching the
    /// corpus counters. Returns the removed document length.
    fn remove_terms(&mut self, id: &str) -> Result<Option<u64>> {
        let Some(guard) = self.document_terms.remove(id)? else {
            return Ok(None);
        };
        let counts: TermCounts = serde_json::from_slice(guard.value())?;
        drop(guard);

        for term in counts.frequencies.keys() {
            self.postings.remove((term.as_str(), id))?;
            match self.document_frequency(term)? {
                0 | 1 => {
                    self.term_documents.remove(term.as_str())?;
                }
                df => {
                    self.term_documents.insert(term.as_str(), df - 1)?;
                }
            }
        }
        self.document_lengths.remove(id)?;
        Ok(Some(counts.length))
    }

    fn set_stat(&mut self, key: &str, value: u64) -> Result<()> {
        self.stats.insert(key, value)?;
        Ok(())
    }
}

impl<P, N, F, L, S> PostingTables<P, N, F, L, S>
where
    P: ReadableTable<(&'static str, &'static str), u32>,
    N: ReadableTable<&'static str, u64>,
    F: ReadableTable<&'static str, &'static [u8]>,
    L: ReadableTable<&'static str, u64>,
    S: ReadableTable<&'static str, u64>,
{
    pub fn stats(&self) -> Result<IndexStats> {
        let stat = |key: &str| -> Result<u64> {
            Ok(self.stats.get(key)?.map(|v| v.value()).unwrap_or(0))
        };
        Ok(IndexStats::new(
            stat(STAT_DOCUMENT_COUNT)?,
            stat(STAT_TOTAL_LENGTH)?,
            stat(STAT_POSTING_REWRITES)?,
        ))
    }

    pub fn document_frequency(&self, term: &str) -> Result<u64> {
        Ok(self.term_documents.get(term)?.map(|v| v.value()).unwrap_or(0))
    }

    pub fn document_length(&self, id: &str) -> Result<Option<u64>> {
        Ok(self.document_lengths.get(id)?.map(|v| v.value()))
    }

    pub fn is_indexed(&self, id: &str) -> Result<bool> {
        Ok(self.document_lengths.get(id)?.is_some())
    }

    /// `(id, tf)` for every document containing `term`, ascending by id.
    pub fn postings_for(&self, term: &str) -> Result<Vec<(String, u32)>> {
        let mut list = Vec::new();
        for entry in self.postings.range((term, "")..)? {
            let (key, tf) = entry?;
            let (entry_term, id) = key.value();
            if entry_term != term {
                break;
            }
            list.push((id.to_string(), tf.value()));
        }
        Ok(list)
    }

    /// BM25 score of every document containing at least one of `terms`,
    /// with the number of distinct `terms` each document contains.
    pub fn score(&self, terms: &[String]) -> Result<HashMap<String, TermHits>> {
        let stats = self.stats()?;
        let mut hits: HashMap<String, TermHits> = HashMap::new();
        let mut lengths: HashMap<String, u64> = HashMap::new();

        for term in terms {
            let df = self.document_frequency(term)?;
            if df == 0 {
                continue;
            }
            let term_idf = idf(stats.document_count, df);

            for (id, tf) in self.postings_for(term)? {
                let length = match lengths.get(&id) {
                    Some(&length) => length,
                    None => {
                        let length = self.document_length(&id)?.unwrap_or(0);
                        lengths.insert(id.clone(), length);
                        length
                    }
                };
                let entry = hits.entry(id).or_default();
                entry.score += bm25_term(
                    term_idf,
                    tf,
                    length,
                    stats.average_document_length,
                );
                entry.matched_terms += 1;
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use redb::{Database, ReadableDatabase, backends::InMemoryBackend};

    use super::*;
    use crate::analyzer::Analyzer;

    fn test_db() -> Database {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .unwrap();
        let txn = db.begin_write().unwrap();
        PostingWriter::open(&txn).unwrap();
        txn.commit().unwrap();
        db
    }

    fn index(db: &Database, docs: &[(&str, &str)]) {
        let analyzer = Analyzer::default();
        let txn = db.begin_write().unwrap();
        {
            let mut postings = PostingWriter::open(&txn).unwrap();
            for (id, text) in docs {
                postings.index(id, &analyzer.term_counts(text)).unwrap();
            }
        }
        txn.commit().unwrap();
    }

    fn remove(db: &Database, id: &str) -> bool {
        let txn = db.begin_write().unwrap();
        let removed = {
            let mut postings = PostingWriter::open(&txn).unwrap();
            postings.remove(id).unwrap()
        };
        txn.commit().unwrap();
        removed
    }

    fn reader(db: &Database) -> PostingReader {
        PostingReader::open(&db.begin_read().unwrap()).unwrap()
    }

    fn terms(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn idf_matches_formula() {
        let expected = (1.0_f64 + (10.0 - 2.0 + 0.5) / (2.0 + 0.5)).ln();
        assert!((idf(10, 2) - expected).abs() < 1e-12);
        // Terms in every document still get a positive weight.
        assert!(idf(2, 2) > 0.0);
    }

    #[test]
    fn bm25_prefers_shorter_documents() {
        let w = idf(2, 2);
        assert!(bm25_term(w, 1, 3, 4.5) > bm25_term(w, 1, 6, 4.5));
        assert!(bm25_term(w, 2, 6, 4.5) > bm25_term(w, 1, 6, 4.5));
    }

    #[test]
    fn statistics_follow_writes() {
        let db = test_db();
        index(&db, &[("d1", "the cat sat"), ("d2", "the cat sat on the mat")]);

        let stats = reader(&db).stats().unwrap();
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.total_length, 9);
        assert!((stats.average_document_length - 4.5).abs() < 1e-12);
        assert_eq!(stats.posting_rewrites, 2);

        index(&db, &[("d1", "cat")]);
        let stats = reader(&db).stats().unwrap();
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.total_length, 7);
        assert_eq!(stats.posting_rewrites, 3);

        assert!(remove(&db, "d2"));
        assert!(!remove(&db, "d2"));
        let stats = reader(&db).stats().unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.total_length, 1);
    }

    #[test]
    fn reindex_replaces_postings() {
        let db = test_db();
        index(&db, &[("d1", "alpha beta"), ("d2", "beta")]);
        index(&db, &[("d1", "gamma")]);

        let r = reader(&db);
        assert!(r.postings_for("alpha").unwrap().is_empty());
        assert_eq!(r.document_frequency("alpha").unwrap(), 0);
        assert_eq!(r.postings_for("beta").unwrap(), vec![("d2".into(), 1)]);
        assert_eq!(r.postings_for("gamma").unwrap(), vec![("d1".into(), 1)]);
        assert_eq!(r.document_frequency("beta").unwrap(), 1);
    }

    #[test]
    fn remove_clears_every_trace() {
        let db = test_db();
        index(&db, &[("d1", "alpha alpha beta"), ("d2", "beta")]);
        remove(&db, "d1");

        let r = reader(&db);
        assert!(!r.is_indexed("d1").unwrap());
        assert!(r.postings_for("alpha").unwrap().is_empty());
        assert_eq!(r.postings_for("beta").unwrap(), vec![("d2".into(), 1)]);
        let scores = r.score(&terms(&["alpha", "beta"])).unwrap();
        assert!(!scores.contains_key("d1"));
    }

    #[test]
    fn postings_do_not_leak_across_prefix_terms() {
        let db = test_db();
        index(&db, &[("d1", "cat"), ("d2", "cats catalog")]);
        let r = reader(&db);
        // "cats" stems to "cat"; "catalog" shares the prefix but is distinct.
        let cat: Vec<_> =
            r.postings_for("cat").unwrap().into_iter().map(|p| p.0).collect();
        assert_eq!(cat, vec!["d1", "d2"]);
        assert_eq!(r.postings_for("catalog").unwrap().len(), 1);
    }

    #[test]
    fn scores_cat_corpus() {
        let db = test_db();
        index(&db, &[("d1", "the cat sat"), ("d2", "the cat sat on the mat")]);
        let scores = reader(&db).score(&terms(&["cat"])).unwrap();

        let w = idf(2, 2);
        let expected_d1 = bm25_term(w, 1, 3, 4.5);
        let expected_d2 = bm25_term(w, 1, 6, 4.5);
        assert!((scores["d1"].score - expected_d1).abs() < 1e-12);
        assert!((scores["d2"].score - expected_d2).abs() < 1e-12);
        assert!(scores["d1"].score > scores["d2"].score);
        assert!(scores["d2"].score > 0.0);
    }

    #[test]
    fn unknown_terms_score_nothing() {
        let db = test_db();
        index(&db, &[("d1", "the cat sat")]);
        let r = reader(&db);
        assert!(r.score(&terms(&["dog"])).unwrap().is_empty());

        let hits = r.score(&terms(&["cat", "dog", "sat"])).unwrap();
        assert_eq!(hits["d1"].matched_terms, 2);
    }
}
