//! Error types for all table, shard, and range operations.

use thiserror::Error;

/// Coarse classification used by callers that only care about retry/abort
/// policy, not the concrete failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected input; no state was mutated.
    InvalidArgument,
    /// The named table, shard, or ring does not exist.
    NotFound,
    /// The name is already taken.
    Conflict,
    /// The operation is not implemented for this table/shard type.
    Unsupported,
    /// Retryable: aborted catalog transaction or topology timeout.
    Transient,
    /// Surfaced from the storage backend or the bucket wrapper.
    Downstream,
}

/// Top-level error type for strata operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("key mismatch: {0}")]
    KeyMismatch(String),

    #[error("column mismatch: {0}")]
    ColumnMismatch(String),

    #[error("no such table: {0}")]
    NoTable(String),

    #[error("no such shard: {0}")]
    NoShard(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("not supported yet: {0}")]
    NotSupported(&'static str),

    #[error("operation not supported for table type {0}")]
    TypeNotSupported(String),

    #[error("catalog transaction aborted: {0}")]
    Aborted(String),

    #[error("{op} timed out")]
    Timeout { op: &'static str },

    #[error(transparent)]
    Backend(#[from] fjall::Error),

    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

impl Error {
    /// Classify this error into its policy kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument { .. } | Error::KeyMismatch(_) | Error::ColumnMismatch(_) => {
                ErrorKind::InvalidArgument
            }
            Error::NoTable(_) | Error::NoShard(_) => ErrorKind::NotFound,
            Error::TableExists(_) => ErrorKind::Conflict,
            Error::NotSupported(_) | Error::TypeNotSupported(_) => ErrorKind::Unsupported,
            Error::Aborted(_) | Error::Timeout { .. } => ErrorKind::Transient,
            Error::Backend(_) | Error::Corrupt(_) => ErrorKind::Downstream,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
