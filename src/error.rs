use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("document id already exists: {0}")]
    DuplicateId(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("{operation} could not be committed: {source}")]
    SyncFailure {
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("incompatible store schema: expected {expected}, found {found}")]
    IncompatibleSchema { expected: &'static str, found: String },

    #[error("store directory does not exist and could not be created: {0}")]
    StoreDir(PathBuf),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    DuplicateId,
    InvalidInput,
    SyncFailure,
    StorageFailure,
    IncompatibleSchema,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::DuplicateId(_) => ErrorKind::DuplicateId,
            Error::InvalidDocument(_)
            | Error::InvalidFilter(_)
            | Error::Config(_) => ErrorKind::InvalidInput,
            Error::SyncFailure { .. } => ErrorKind::SyncFailure,
            Error::IncompatibleSchema { .. } => ErrorKind::IncompatibleSchema,
            Error::Io(_)
            | Error::Redb(_)
            | Error::RedbDatabase(_)
            | Error::RedbStorage(_)
            | Error::RedbTransaction(_)
            | Error::RedbTable(_)
            | Error::RedbCommit(_)
            | Error::Serialization(_)
            | Error::StoreDir(_) => ErrorKind::StorageFailure,
        }
    }

    pub(crate) fn document_not_found(id: &str) -> Self {
        Error::NotFound {
            kind: "document",
            name: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_failure_reports_cause() {
        let err = Error::SyncFailure {
            operation: "add",
            source: Box::new(Error::Config("boom".into())),
        };
        assert_eq!(err.kind(), ErrorKind::SyncFailure);
        assert_eq!(
            err.to_string(),
            "add could not be committed: configuration error: boom"
        );
    }

    #[test]
    fn not_found_message() {
        let err = Error::document_not_found("abc");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "document not found: abc");
    }
}
