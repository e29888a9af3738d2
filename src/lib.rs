//! docstore - an embedded document store with BM25 keyword search.
//!
//! Documents (an id, an index name, text content and typed metadata) are
//! kept in a single [redb](https://github.com/cberner/redb) file together
//! with an inverted index over their content. Every mutation updates both in
//! one transaction, so queries never see a record without its postings.
//!
//! # Quick start
//!
//! ```
//! use docstore::{Document, DocumentStore, Filter, QueryParams, StoreConfig};
//!
//! let store = DocumentStore::open(StoreConfig::in_memory()).unwrap();
//! store
//!     .add_documents(vec![
//!         Document::with_id("a", "rust keyword search").in_index("code"),
//!         Document::with_id("b", "cooking with rust pans")
//!             .in_index("notes")
//!             .with_meta("year", 2021),
//!     ])
//!     .unwrap();
//!
//! let params = QueryParams::new("rust")
//!     .with_filter(Filter::gte("year", 2020));
//! let results = store.search(&params).unwrap();
//! assert_eq!(results.len(), 1);
//! assert_eq!(results[0].document.id, "b");
//! ```

pub mod analyzer;
pub mod config;
pub mod document;
pub mod error;
pub mod filter;
pub mod inverted_index;
pub mod query;
pub mod store;
pub mod sync;

mod record_store;

pub use config::{
    Bm25Params,
    DuplicatePolicy,
    StorageLocation,
    StoreConfig,
    resolve_store_path,
};
pub use document::{Document, DocumentInput, MetaValue, Metadata};
pub use error::{Error, ErrorKind, Result};
pub use filter::{Condition, Filter};
pub use inverted_index::IndexStats;
pub use query::{Limit, QueryParams, ScoredDocument};
pub use store::DocumentStore;
pub use sync::{AddSummary, WriteOutcome};
