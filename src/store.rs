use std::sync::Arc;

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    TableDefinition,
    TableHandle,
    WriteTransaction,
    backends::InMemoryBackend,
};
use tracing::{info, warn};

use crate::{
    analyzer::Analyzer,
    config::{DuplicatePolicy, StorageLocation, StoreConfig, ensure_parent_dir},
    document::Document,
    error::{Error, Result},
    filter::Filter,
    inverted_index::{
        DOCUMENT_LENGTHS,
        DOCUMENT_TERMS,
        INDEX_STATS,
        IndexStats,
        POSTINGS,
        PostingReader,
        TERM_DOCUMENTS,
    },
    query::{Limit, QueryEngine, QueryParams, ScoredDocument},
    record_store::{DOCUMENTS, DOCUMENTS_BY_INDEX, RecordReader},
    sync::{AddSummary, SyncCoordinator, WriteOutcome},
};

/// Identifier of the on-disk layout written by this version.
pub const SCHEMA_VERSION: &str = "docstore/1";

const META: TableDefinition<&str, &str> = TableDefinition::new("meta");
const META_SCHEMA: &str = "schema_version";
const META_BM25: &str = "bm25_parameters";

/// An embedded document store with BM25 keyword search.
///
/// Cheap to share between threads behind an `Arc`: reads run concurrently
/// and writes are serialized by the underlying database.
///
/// # Examples
///
/// ```
/// use docstore::{Document, DocumentStore, Filter, StoreConfig};
///
/// let store = DocumentStore::open(StoreConfig::in_memory()).unwrap();
/// store
///     .add_documents(vec![
///         Document::with_id("doc1", "the cat sat").in_index("A"),
///         Document::with_id("doc2", "the cat sat on the mat").in_index("A"),
///     ])
///     .unwrap();
///
/// let hits = store
///     .query("cat", Some(&Filter::eq("index", "A")), Some(10))
///     .unwrap();
/// assert_eq!(hits.len(), 2);
/// assert_eq!(hits[0].document.id, "doc1");
/// ```
pub struct DocumentStore {
    db: Arc<Database>,
    config: StoreConfig,
    sync: SyncCoordinator,
    engine: QueryEngine,
}

impl DocumentStore {
    /// Open or create a store.
    ///
    /// Fails with [`Error::IncompatibleSchema`] when the file was written by
    /// a different layout version or is not a store file.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let db = match &config.location {
            StorageLocation::File(path) => {
                let existed = path.exists();
                ensure_parent_dir(path)?;
                Database::create(path)
                    .map_err(|e| open_error(e, existed))?
            }
            StorageLocation::InMemory => Database::builder()
                .create_with_backend(InMemoryBackend::new())?,
        };

        let txn = db.begin_write()?;
        initialize_schema(&txn, &config)?;
        txn.commit()?;

        if !config.bm25.is_default() {
            warn!(
                k1 = config.bm25.k1,
                b = config.bm25.b,
                tokenizer = %config.bm25.tokenizer,
                "custom BM25 parameters are recorded but not applied"
            );
        }
        info!(location = ?config.location, "opened document store");

        let db = Arc::new(db);
        let analyzer = Analyzer::default();
        Ok(Self {
            sync: SyncCoordinator::new(db.clone(), analyzer.clone()),
            engine: QueryEngine::new(
                db.clone(),
                analyzer,
                config.default_limit,
            ),
            db,
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Add documents using the configured duplicate policy.
    ///
    /// Returns the ids of the batch in input order.
    pub fn add_documents(&self, docs: Vec<Document>) -> Result<Vec<String>> {
        Ok(self
            .add_documents_with(docs, self.config.duplicate_policy)?
            .ids)
    }

    /// Add documents as one all-or-nothing batch.
    pub fn add_documents_with(
        &self,
        docs: Vec<Document>,
        policy: DuplicatePolicy,
    ) -> Result<AddSummary> {
        let docs = docs
            .into_iter()
            .map(|doc| self.prepare(doc))
            .collect::<Result<Vec<_>>>()?;
        if docs.is_empty() {
            return Ok(AddSummary::default());
        }
        self.sync.add(&docs, policy)
    }

    /// Replace a stored document. Fails with `NotFound` if the id is absent.
    pub fn update_document(&self, doc: Document) -> Result<WriteOutcome> {
        let doc = self.prepare(doc)?;
        self.sync.update(&doc)
    }

    /// Delete documents by id, returning how many existed.
    pub fn delete_documents<S: AsRef<str>>(&self, ids: &[S]) -> Result<usize> {
        let ids: Vec<String> =
            ids.iter().map(|id| id.as_ref().to_string()).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        self.sync.delete(&ids)
    }

    /// Delete every document in `index` (or all indexes) matching `filter`.
    pub fn delete_where(
        &self,
        index: Option<&str>,
        filter: Option<&Filter>,
    ) -> Result<usize> {
        self.sync.delete_where(index, filter)
    }

    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let txn = self.db.begin_read()?;
        RecordReader::open(&txn)?.get(id)
    }

    /// Fetch several documents; absent ids are left out.
    pub fn get_documents_by_id<S: AsRef<str>>(
        &self,
        ids: &[S],
    ) -> Result<Vec<Document>> {
        let txn = self.db.begin_read()?;
        let records = RecordReader::open(&txn)?;
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = records.get(id.as_ref())? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    /// Every document in `index` (or all indexes) matching `filter`,
    /// ascending by id.
    pub fn get_all_documents(
        &self,
        index: Option<&str>,
        filter: Option<&Filter>,
    ) -> Result<Vec<Document>> {
        let txn = self.db.begin_read()?;
        RecordReader::open(&txn)?.scan(index, filter)
    }

    pub fn count(
        &self,
        index: Option<&str>,
        filter: Option<&Filter>,
    ) -> Result<u64> {
        let txn = self.db.begin_read()?;
        RecordReader::open(&txn)?.count(index, filter)
    }

    pub fn get_document_count(&self, filter: Option<&Filter>) -> Result<u64> {
        self.count(None, filter)
    }

    /// Keyword query across all indexes.
    ///
    /// `limit = None` uses the configured default.
    pub fn query(
        &self,
        text: &str,
        filter: Option<&Filter>,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredDocument>> {
        let params = QueryParams {
            text: text.to_string(),
            filter: filter.cloned(),
            limit: limit.map(Limit::Top),
            ..QueryParams::default()
        };
        self.engine.query(&params)
    }

    pub fn search(&self, params: &QueryParams) -> Result<Vec<ScoredDocument>> {
        self.engine.query(params)
    }

    pub fn query_batch(
        &self,
        queries: &[QueryParams],
    ) -> Result<Vec<Vec<ScoredDocument>>> {
        self.engine.query_batch(queries)
    }

    pub fn index_stats(&self) -> Result<IndexStats> {
        let txn = self.db.begin_read()?;
        PostingReader::open(&txn)?.stats()
    }

    /// Fill in the default index and validate.
    fn prepare(&self, mut doc: Document) -> Result<Document> {
        if doc.index.is_empty() {
            doc.index = self.config.default_index.clone();
        }
        doc.validate()?;
        Ok(doc)
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("location", &self.config.location)
            .finish_non_exhaustive()
    }
}

/// Check the schema marker and create any missing tables.
fn initialize_schema(txn: &WriteTransaction, config: &StoreConfig) -> Result<()> {
    let existing: Vec<String> = txn
        .list_tables()?
        .map(|handle| handle.name().to_string())
        .collect();

    {
        let mut meta = schema_table(txn.open_table(META))?;
        let found = meta.get(META_SCHEMA)?.map(|v| v.value().to_string());
        match found {
            Some(version) if version == SCHEMA_VERSION => {}
            Some(version) => {
                return Err(Error::IncompatibleSchema {
                    expected: SCHEMA_VERSION,
                    found: version,
                });
            }
            None if !existing.is_empty() => {
                return Err(Error::IncompatibleSchema {
                    expected: SCHEMA_VERSION,
                    found: format!("unversioned tables {existing:?}"),
                });
            }
            None => {
                meta.insert(META_SCHEMA, SCHEMA_VERSION)?;
            }
        }

        let params = serde_json::to_string(&config.bm25)?;
        meta.insert(META_BM25, params.as_str())?;
    }

    schema_table(txn.open_table(DOCUMENTS))?;
    schema_table(txn.open_table(DOCUMENTS_BY_INDEX))?;
    schema_table(txn.open_table(POSTINGS))?;
    schema_table(txn.open_table(TERM_DOCUMENTS))?;
    schema_table(txn.open_table(DOCUMENT_TERMS))?;
    schema_table(txn.open_table(DOCUMENT_LENGTHS))?;
    schema_table(txn.open_table(INDEX_STATS))?;
    Ok(())
}

/// Map a redb open failure. An existing file that redb cannot read is a
/// foreign layout, not a storage fault.
fn open_error(err: redb::DatabaseError, existed: bool) -> Error {
    use redb::{DatabaseError, StorageError};

    match err {
        DatabaseError::UpgradeRequired(version) => Error::IncompatibleSchema {
            expected: SCHEMA_VERSION,
            found: format!("redb file format {version}"),
        },
        DatabaseError::Storage(StorageError::Corrupted(msg)) if existed => {
            Error::IncompatibleSchema {
                expected: SCHEMA_VERSION,
                found: format!("unreadable store file ({msg})"),
            }
        }
        DatabaseError::Storage(StorageError::Io(io))
            if existed && io.kind() == std::io::ErrorKind::InvalidData =>
        {
            Error::IncompatibleSchema {
                expected: SCHEMA_VERSION,
                found: "not a redb file".into(),
            }
        }
        other => other.into(),
    }
}

fn schema_table<T>(result: std::result::Result<T, redb::TableError>) -> Result<T> {
    result.map_err(|e| match e {
        redb::TableError::TableTypeMismatch { table, .. } => {
            Error::IncompatibleSchema {
                expected: SCHEMA_VERSION,
                found: format!("table '{table}' with a different layout"),
            }
        }
        other => other.into(),
    })
}
