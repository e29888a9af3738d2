//! The canonical document table.
//!
//! Records live in two redb tables inside the store file:
//!
//! - `documents`: id -> JSON-encoded [`StoredRecord`]
//! - `documents_by_index`: (index, id) -> ()
//!
//! The second table lets scans restricted to one index skip every other
//! index. Both are only ever touched through [`RecordTables`], which is
//! opened against a caller-owned transaction so record changes commit
//! together with posting changes.

use redb::{
    ReadOnlyTable,
    ReadTransaction,
    ReadableTable,
    Table,
    TableDefinition,
    WriteTransaction,
};

use crate::{
    document::{Document, StoredRecord},
    error::{Error, Result},
    filter::Filter,
};

pub(crate) const DOCUMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("documents");
pub(crate) const DOCUMENTS_BY_INDEX: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("documents_by_index");

type DocumentsTable<'txn> = Table<'txn, &'static str, &'static [u8]>;
type ByIndexTable<'txn> = Table<'txn, (&'static str, &'static str), ()>;

/// Record tables opened in one transaction.
pub(crate) struct RecordTables<D, I> {
    documents: D,
    by_index: I,
}

pub(crate) type RecordReader = RecordTables<
    ReadOnlyTable<&'static str, &'static [u8]>,
    ReadOnlyTable<(&'static str, &'static str), ()>,
>;

pub(crate) type RecordWriter<'txn> =
    RecordTables<DocumentsTable<'txn>, ByIndexTable<'txn>>;

impl RecordReader {
    pub fn open(txn: &ReadTransaction) -> Result<Self> {
        Ok(Self {
            documents: txn.open_table(DOCUMENTS)?,
            by_index: txn.open_table(DOCUMENTS_BY_INDEX)?,
        })
    }
}

impl<'txn> RecordWriter<'txn> {
    pub fn open(txn: &'txn WriteTransaction) -> Result<Self> {
        Ok(Self {
            documents: txn.open_table(DOCUMENTS)?,
            by_index: txn.open_table(DOCUMENTS_BY_INDEX)?,
        })
    }

    /// Insert or replace a document, returning the record it replaced.
    ///
    /// With `allow_overwrite = false` an existing id is rejected with
    /// [`Error::DuplicateId`] and nothing is written.
    pub fn put(
        &mut self,
        doc: &Document,
        allow_overwrite: bool,
    ) -> Result<Option<Document>> {
        let previous = self.get(&doc.id)?;
        if previous.is_some() && !allow_overwrite {
            return Err(Error::DuplicateId(doc.id.clone()));
        }

        let bytes = serde_json::to_vec(&StoredRecord::from_document(doc))?;
        self.documents.insert(doc.id.as_str(), bytes.as_slice())?;

        if let Some(old) = &previous
            && old.index != doc.index
        {
            self.by_index.remove((old.index.as_str(), old.id.as_str()))?;
        }
        self.by_index
            .insert((doc.index.as_str(), doc.id.as_str()), ())?;

        Ok(previous)
    }

    /// Remove a document, returning it if it existed.
    pub fn delete(&mut self, id: &str) -> Result<Option<Document>> {
        let Some(guard) = self.documents.remove(id)? else {
            return Ok(None);
        };
        let record: StoredRecord = serde_json::from_slice(guard.value())?;
        drop(guard);

        let doc = record.into_document(id);
        self.by_index.remove((doc.index.as_str(), id))?;
        Ok(Some(doc))
    }
}

impl<D, I> RecordTables<D, I>
where
    D: ReadableTable<&'static str, &'static [u8]>,
    I: ReadableTable<(&'static str, &'static str), ()>,
{
    pub fn get(&self, id: &str) -> Result<Option<Document>> {
        let Some(guard) = self.documents.get(id)? else {
            return Ok(None);
        };
        let record: StoredRecord = serde_json::from_slice(guard.value())?;
        Ok(Some(record.into_document(id)))
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.documents.get(id)?.is_some())
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.documents.len()?)
    }

    /// Ids of every document in `index`, ascending.
    pub fn ids_in_index(&self, index: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in self.by_index.range((index, "")..)? {
            let (key, _) = entry?;
            let (entry_index, id) = key.value();
            if entry_index != index {
                break;
            }
            ids.push(id.to_string());
        }
        Ok(ids)
    }

    /// Documents in `scope` (or all indexes) matching `filter`, ascending
    /// by id.
    ///
    /// When no explicit scope is given but the filter pins `index` to one
    /// value, only that index is read.
    pub fn scan(
        &self,
        scope: Option<&str>,
        filter: Option<&Filter>,
    ) -> Result<Vec<Document>> {
        let mut docs = Vec::new();
        self.visit(scope, filter, |doc| docs.push(doc))?;
        Ok(docs)
    }

    pub fn count(
        &self,
        scope: Option<&str>,
        filter: Option<&Filter>,
    ) -> Result<u64> {
        if scope.is_none() && filter.is_none() {
            return self.len();
        }
        let mut count = 0;
        self.visit(scope, filter, |_| count += 1)?;
        Ok(count)
    }

    fn visit(
        &self,
        scope: Option<&str>,
        filter: Option<&Filter>,
        mut f: impl FnMut(Document),
    ) -> Result<()> {
        let keep = |doc: &Document| {
            scope.is_none_or(|index| doc.index == index)
                && filter.is_none_or(|filter| filter.matches(doc))
        };

        match scope.or_else(|| filter.and_then(Filter::index_scope)) {
            Some(index) => {
                for id in self.ids_in_index(index)? {
                    if let Some(doc) = self.get(&id)?
                        && keep(&doc)
                    {
                        f(doc);
                    }
                }
            }
            None => {
                for entry in self.documents.iter()? {
                    let (key, value) = entry?;
                    let record: StoredRecord =
                        serde_json::from_slice(value.value())?;
                    let doc = record.into_document(key.value());
                    if keep(&doc) {
                        f(doc);
                    }
                }
            }
        }
        Ok(())
    }
}
