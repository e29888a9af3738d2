use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    analyzer::DEFAULT_TOKENIZER,
    document::DEFAULT_INDEX,
    error::{Error, Result},
    inverted_index::{BM25_B, BM25_K1},
};

/// Environment variable overriding the store file location.
pub const STORE_PATH_ENV: &str = "DOCSTORE_PATH";

/// File name used inside the XDG data directory.
pub const STORE_FILE_NAME: &str = "documents.redb";

/// Where the store keeps its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageLocation {
    /// A single redb file on disk, created if missing.
    File(PathBuf),
    /// Ephemeral storage that disappears when the store is dropped.
    InMemory,
}

/// What `add_documents` does with ids that already exist.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Replace the stored document.
    #[default]
    Overwrite,
    /// Keep the stored document and ignore the new one.
    Skip,
    /// Reject the whole batch.
    Fail,
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "overwrite" => Ok(Self::Overwrite),
            "skip" => Ok(Self::Skip),
            "fail" => Ok(Self::Fail),
            other => Err(Error::Config(format!(
                "unknown duplicate policy '{other}' \
                 (expected overwrite, skip or fail)"
            ))),
        }
    }
}

/// BM25 tuning parameters.
///
/// Recorded in the store file when it is opened, but scoring always uses
/// [`BM25_K1`] and [`BM25_B`] with the built-in tokenizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
    pub tokenizer: String,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: BM25_K1,
            b: BM25_B,
            tokenizer: DEFAULT_TOKENIZER.to_string(),
        }
    }
}

impl Bm25Params {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Construction-time settings for a [`DocumentStore`](crate::DocumentStore).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub location: StorageLocation,
    /// Result count used when a query does not give one. Must be at least 1.
    pub default_limit: usize,
    /// Index assigned to documents that do not name one.
    pub default_index: String,
    pub duplicate_policy: DuplicatePolicy,
    pub bm25: Bm25Params,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: StorageLocation::InMemory,
            default_limit: 10,
            default_index: DEFAULT_INDEX.to_string(),
            duplicate_policy: DuplicatePolicy::default(),
            bm25: Bm25Params::default(),
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            location: StorageLocation::File(path.into()),
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_index.is_empty() {
            return Err(Error::Config("default_index must not be empty".into()));
        }
        if self.default_limit == 0 {
            return Err(Error::Config("default_limit must be at least 1".into()));
        }
        if !(self.bm25.k1.is_finite() && self.bm25.b.is_finite()) {
            return Err(Error::Config("bm25 parameters must be finite".into()));
        }
        Ok(())
    }
}

/// Resolve the store file path from, in order of priority:
/// 1. An explicit path (from --store)
/// 2. The DOCSTORE_PATH environment variable
/// 3. The XDG data directory (~/.local/share/docstore/documents.redb)
///
/// The parent directory is created if needed.
pub fn resolve_store_path(explicit: Option<&Path>) -> Result<PathBuf> {
    let path = if let Some(path) = explicit {
        path.to_path_buf()
    } else if let Ok(val) = std::env::var(STORE_PATH_ENV) {
        PathBuf::from(val)
    } else {
        xdg::BaseDirectories::with_prefix("docstore")
            .get_data_home()
            .ok_or_else(|| {
                Error::Config(
                    "could not determine XDG data home directory".into(),
                )
            })?
            .join(STORE_FILE_NAME)
    };

    ensure_parent_dir(&path)?;
    Ok(path)
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|_| Error::StoreDir(parent.to_path_buf()))?;
    }
    Ok(())
}
