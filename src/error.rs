
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OtuscopeError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),
    #[error("Unknown ontology: {0}")]
    UnknownOntology(String),
    #[error("Unknown ontology value '{label}' in {ontology}")]
    UnknownOntologyValue { ontology: String, label: String },
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("Storage timeout: {0}")]
    StorageTimeout(String),
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Export canceled by the consumer")]
    Canceled,
    #[error("Lock poisoned: {0}")]
    Lock(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OtuscopeError>;

// Helper conversions
impl From<rusqlite::Error> for OtuscopeError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::DatabaseBusy
                    || f.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                Self::StorageTimeout(e.to_string())
            }
            _ => Self::StorageUnavailable(e.to_string()),
        }
    }
}

/// One rejected filter term. Collected by the predicate compiler alongside the
/// terms that did compile; a bad term never aborts the rest of the batch.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("filter on '{field}': {kind}")]
pub struct FilterError {
    pub field: String,
    pub kind: FilterErrorKind,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterErrorKind {
    #[error("unknown attribute")]
    UnknownAttribute,
    #[error("invalid ontology value {0}")]
    InvalidOntologyValue(i64),
    #[error("no ontology value supplied")]
    MissingOntologyValue,
    #[error("invalid range value '{0}'")]
    InvalidRangeValue(String),
    #[error("empty sample id set")]
    EmptySampleIdSet,
}
