use std::sync::Arc;

use redb::{Database, ReadTransaction, ReadableDatabase};
use tracing::{trace, warn};

use crate::{
    analyzer::Analyzer,
    document::Document,
    error::Result,
    filter::Filter,
    inverted_index::PostingReader,
    record_store::RecordReader,
};

/// Raw BM25 scores are divided by this before the sigmoid when scaling.
const SCORE_SCALE: f64 = 8.0;

/// How many results a query may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Top(usize),
    /// Every matching document. Only used when asked for explicitly.
    All,
}

/// A keyword query with optional structured restrictions.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    /// Free text. Empty (or token-free) text matches every document in
    /// scope with score 0.
    pub text: String,
    pub filter: Option<Filter>,
    /// `None` uses the store's default limit.
    pub limit: Option<Limit>,
    /// Restrict results to one index.
    pub index: Option<String>,
    /// Require every distinct query term to occur in a result.
    pub all_terms_must_match: bool,
    /// Map scores into (0, 1) with `sigmoid(score / 8)`.
    pub scale_score: bool,
}

impl QueryParams {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_limit(mut self, limit: Limit) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn in_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn all_terms(mut self) -> Self {
        self.all_terms_must_match = true;
        self
    }

    pub fn scaled(mut self) -> Self {
        self.scale_score = true;
        self
    }
}

/// A ranked query result.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f64,
}

/// Ranks and filters documents from a single read snapshot.
#[derive(Clone)]
pub struct QueryEngine {
    db: Arc<Database>,
    analyzer: Analyzer,
    default_limit: usize,
}

impl QueryEngine {
    pub fn new(
        db: Arc<Database>,
        analyzer: Analyzer,
        default_limit: usize,
    ) -> Self {
        Self {
            db,
            analyzer,
            default_limit,
        }
    }

    /// Execute the query pipeline.
    ///
    /// 1. Tokenize the query text
    /// 2. BM25-score documents containing any query term (or take every
    ///    document in scope when there are no terms)
    /// 3. Drop documents outside the index scope or failing the filter
    /// 4. Sort by score descending, then id ascending
    /// 5. Truncate to the limit
    pub fn query(&self, params: &QueryParams) -> Result<Vec<ScoredDocument>> {
        let txn = self.db.begin_read()?;
        self.run(&txn, params)
    }

    /// Execute several queries against the same snapshot.
    pub fn query_batch(
        &self,
        queries: &[QueryParams],
    ) -> Result<Vec<Vec<ScoredDocument>>> {
        let txn = self.db.begin_read()?;
        queries.iter().map(|params| self.run(&txn, params)).collect()
    }

    fn run(
        &self,
        txn: &ReadTransaction,
        params: &QueryParams,
    ) -> Result<Vec<ScoredDocument>> {
        let limit = match params.limit.unwrap_or(Limit::Top(self.default_limit))
        {
            Limit::Top(0) => return Ok(Vec::new()),
            Limit::Top(n) => Some(n),
            Limit::All => None,
        };

        let records = RecordReader::open(txn)?;
        let postings = PostingReader::open(txn)?;
        let scope = params.index.as_deref();
        let filter = params.filter.as_ref();
        let terms = self.analyzer.query_terms(&params.text);

        let mut results = if terms.is_empty() {
            records
                .scan(scope, filter)?
                .into_iter()
                .map(|document| ScoredDocument {
                    document,
                    score: 0.0,
                })
                .collect()
        } else {
            let hits = postings.score(&terms)?;
            trace!(terms = ?terms, candidates = hits.len(), "scored query");

            let mut matched = Vec::with_capacity(hits.len());
            for (id, hit) in hits {
                if params.all_terms_must_match
                    && hit.matched_terms < terms.len()
                {
                    continue;
                }
                let Some(document) = records.get(&id)? else {
                    warn!(%id, "posting without a stored document");
                    continue;
                };
                if scope.is_some_and(|index| document.index != index)
                    || filter.is_some_and(|f| !f.matches(&document))
                {
                    continue;
                }
                matched.push(ScoredDocument {
                    document,
                    score: hit.score,
                });
            }
            matched
        };

        rank(&mut results);
        if let Some(n) = limit {
            results.truncate(n);
        }
        if params.scale_score {
            for result in &mut results {
                result.score = scale_score(result.score);
            }
        }
        Ok(results)
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("default_limit", &self.default_limit)
            .finish_non_exhaustive()
    }
}

/// Score descending, ties by ascending id.
pub fn rank(results: &mut [ScoredDocument]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.document.id.cmp(&b.document.id))
    });
}

/// `sigmoid(score / 8)`.
pub fn scale_score(score: f64) -> f64 {
    1.0 / (1.0 + (-score / SCORE_SCALE).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DuplicatePolicy,
        inverted_index::PostingWriter,
        record_store::RecordWriter,
        sync::SyncCoordinator,
    };

    fn engine_with(docs: &[Document]) -> QueryEngine {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .unwrap();
        let txn = db.begin_write().unwrap();
        RecordWriter::open(&txn).unwrap();
        PostingWriter::open(&txn).unwrap();
        txn.commit().unwrap();

        let db = Arc::new(db);
        SyncCoordinator::new(db.clone(), Analyzer::default())
            .add(docs, DuplicatePolicy::Overwrite)
            .unwrap();
        QueryEngine::new(db, Analyzer::default(), 10)
    }

    fn cat_corpus() -> QueryEngine {
        engine_with(&[
            Document::with_id("doc1", "the cat sat").in_index("A"),
            Document::with_id("doc2", "the cat sat on the mat").in_index("A"),
        ])
    }

    fn ids(results: &[ScoredDocument]) -> Vec<&str> {
        results.iter().map(|r| r.document.id.as_str()).collect()
    }

    #[test]
    fn cat_scenario() {
        let engine = cat_corpus();
        let params = QueryParams::new("cat")
            .with_filter(Filter::eq("index", "A"))
            .with_limit(Limit::Top(10));
        let results = engine.query(&params).unwrap();

        assert_eq!(ids(&results), vec!["doc1", "doc2"]);
        assert!(results[0].score > results[1].score);
        assert!(results[1].score > 0.0);
    }

    #[test]
    fn missing_term_returns_nothing() {
        let engine = cat_corpus();
        assert!(engine.query(&QueryParams::new("dog")).unwrap().is_empty());
    }

    #[test]
    fn empty_text_is_filter_only() {
        let engine = engine_with(&[
            Document::with_id("a", "alpha").in_index("A"),
            Document::with_id("b", "beta").in_index("B"),
            Document::with_id("c", "").in_index("A"),
        ]);
        let results = engine
            .query(&QueryParams::new("").with_filter(Filter::eq("index", "A")))
            .unwrap();
        assert_eq!(ids(&results), vec!["a", "c"]);
        assert!(results.iter().all(|r| r.score == 0.0));

        let punctuation = engine.query(&QueryParams::new("?!")).unwrap();
        assert_eq!(punctuation.len(), 3);
    }

    #[test]
    fn limit_handling() {
        let engine = cat_corpus();
        let zero = QueryParams::new("cat").with_limit(Limit::Top(0));
        assert!(engine.query(&zero).unwrap().is_empty());

        let one = QueryParams::new("cat").with_limit(Limit::Top(1));
        assert_eq!(ids(&engine.query(&one).unwrap()), vec!["doc1"]);

        let docs: Vec<Document> = (0..15)
            .map(|i| Document::with_id(format!("d{i:02}"), "same words"))
            .collect();
        let engine = engine_with(&docs);
        assert_eq!(engine.query(&QueryParams::new("words")).unwrap().len(), 10);
        let all = QueryParams::new("words").with_limit(Limit::All);
        let results = engine.query(&all).unwrap();
        assert_eq!(results.len(), 15);
        // Equal scores fall back to id order.
        assert_eq!(results[0].document.id, "d00");
        assert_eq!(results[14].document.id, "d14");
    }

    #[test]
    fn index_scope_and_filter() {
        let engine = engine_with(&[
            Document::with_id("a", "rust search").in_index("code"),
            Document::with_id("b", "rust search").in_index("notes"),
            Document::with_id("c", "rust").in_index("code").with_meta("year", 2020),
        ]);
        let scoped = QueryParams::new("rust").in_index("code");
        assert_eq!(ids(&engine.query(&scoped).unwrap()), vec!["c", "a"]);

        let filtered = QueryParams::new("rust").with_filter(Filter::gte("year", 2019));
        assert_eq!(ids(&engine.query(&filtered).unwrap()), vec!["c"]);

        let unknown = QueryParams::new("rust").with_filter(Filter::eq("nope", 1));
        assert!(engine.query(&unknown).unwrap().is_empty());
    }

    #[test]
    fn all_terms_must_match() {
        let engine = engine_with(&[
            Document::with_id("a", "cozy fish restaurant"),
            Document::with_id("b", "fish market"),
        ]);
        let any = engine.query(&QueryParams::new("cozy fish")).unwrap();
        assert_eq!(any.len(), 2);

        let every = engine
            .query(&QueryParams::new("cozy fish").all_terms())
            .unwrap();
        assert_eq!(ids(&every), vec!["a"]);
    }

    #[test]
    fn scaled_scores_stay_in_unit_interval() {
        let engine = cat_corpus();
        let raw = engine.query(&QueryParams::new("cat")).unwrap();
        let scaled = engine.query(&QueryParams::new("cat").scaled()).unwrap();
        assert_eq!(ids(&raw), ids(&scaled));
        for (r, s) in raw.iter().zip(&scaled) {
            assert!(s.score > 0.5 && s.score < 1.0);
            assert!((s.score - scale_score(r.score)).abs() < 1e-12);
        }
    }

    #[test]
    fn repeated_queries_are_identical() {
        let engine = cat_corpus();
        let params = QueryParams::new("the cat on a mat");
        let first = engine.query(&params).unwrap();
        for _ in 0..5 {
            assert_eq!(engine.query(&params).unwrap(), first);
        }
    }

    #[test]
    fn batch_queries_share_a_snapshot() {
        let engine = cat_corpus();
        let results = engine
            .query_batch(&[QueryParams::new("cat"), QueryParams::new("mat")])
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(ids(&results[1]), vec!["doc2"]);
    }

    #[test]
    fn empty_store_returns_empty() {
        let engine = engine_with(&[]);
        assert!(engine.query(&QueryParams::new("anything")).unwrap().is_empty());
        assert!(engine.query(&QueryParams::new("")).unwrap().is_empty());
    }
}
