//! Error types for the commit protocol
//!
//! Errors fall into five families:
//!
//! | Family | Variants | Typical handling |
//! |--------|----------|------------------|
//! | State | `AlreadyStarted`, `NotStarted`, `AlreadyCommitted`, `AlreadyAborted`, `MissingGlobalDatastore`, `NoDatastores`, `DatastoreNotFound`, `DuplicateDatastore` | Programmer error, never retried |
//! | Conflict | `VersionMismatch`, `WriteConflict`, `AbortedByOther` | Retry with a fresh transaction |
//! | Consistency | `DirtyRead`, `KeyNotFound` | Returned from reads and deletes |
//! | Recovery | `MalformedChain` | Hard failure, prior state unknown |
//! | Backend | `Connector`, `Serialization`, `TsrWriteFailed`, `Lock`, `TimeSource` | Surfaced verbatim |
//!
//! `PrepareFailed` wraps the first participant error of the prepare phase.

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by the commit protocol
#[derive(Debug, Error)]
pub enum Error {
    /// `Start` called on a transaction that is not empty
    #[error("transaction already started")]
    AlreadyStarted,

    /// Operation requires a started transaction
    #[error("transaction not started")]
    NotStarted,

    /// Operation on a committed transaction
    #[error("transaction already committed")]
    AlreadyCommitted,

    /// Operation on an aborted transaction
    #[error("transaction already aborted")]
    AlreadyAborted,

    /// No datastore designated to hold transaction status records
    #[error("global datastore not set")]
    MissingGlobalDatastore,

    /// Transaction has no participants
    #[error("no datastores added")]
    NoDatastores,

    /// No participant registered under this name
    #[error("datastore not found: {0}")]
    DatastoreNotFound(String),

    /// A participant with this name is already registered
    #[error("duplicate datastore name: {0}")]
    DuplicateDatastore(String),

    /// Conditional update found a different version than expected
    #[error("version mismatch on key '{key}': expected '{expected}', found '{actual}'")]
    VersionMismatch {
        /// Key being updated
        key: String,
        /// Version the caller expected
        expected: String,
        /// Version currently stored (empty if absent)
        actual: String,
    },

    /// Prepare could not install a version
    #[error("write conflict on key '{key}': {reason}")]
    WriteConflict {
        /// Conflicting key
        key: String,
        /// Why the write conflicted
        reason: String,
    },

    /// Record is prepared by a live transaction
    #[error("dirty read on key '{key}': prepared by live transaction {txn_id}")]
    DirtyRead {
        /// Key being read
        key: String,
        /// Owner of the in-flight version
        txn_id: String,
    },

    /// Key does not exist, is deleted, or has no visible version
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A `Prev` snapshot could not be decoded
    #[error("malformed version chain for key '{key}': {reason}")]
    MalformedChain {
        /// Key whose chain is broken
        key: String,
        /// Decoder message
        reason: String,
    },

    /// Backend failure
    #[error("connector error in {op}: {message}")]
    Connector {
        /// Connector operation that failed
        op: &'static str,
        /// Backend message
        message: String,
    },

    /// Encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The prepare phase failed; wraps the first participant error
    #[error("prepare phase failed: {0}")]
    PrepareFailed(#[source] Box<Error>),

    /// Another actor recorded this transaction as aborted before its commit point
    #[error("transaction {0} was aborted by another transaction")]
    AbortedByOther(String),

    /// The transaction status record could not be written
    #[error("failed to write transaction status record: {0}")]
    TsrWriteFailed(#[source] Box<Error>),

    /// Configuration rejected at construction time
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Locker failure
    #[error("lock error: {0}")]
    Lock(String),

    /// Time source failure
    #[error("time source error: {0}")]
    TimeSource(String),
}

impl Error {
    /// Build a connector error from any displayable backend error
    pub fn connector(op: &'static str, err: impl std::fmt::Display) -> Self {
        Error::Connector {
            op,
            message: err.to_string(),
        }
    }

    /// Check if this error may succeed when retried with a fresh transaction.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::VersionMismatch { .. }
            | Error::WriteConflict { .. }
            | Error::DirtyRead { .. }
            | Error::AbortedByOther(_) => true,
            Error::PrepareFailed(inner) => inner.is_retryable(),
            _ => false,
        }
    }

    /// Check if this is a conflict between transactions.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::VersionMismatch { .. } | Error::WriteConflict { .. } => true,
            Error::PrepareFailed(inner) => inner.is_conflict(),
            _ => false,
        }
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound(_))
    }

    /// Check if this is a misuse of the transaction API.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Error::AlreadyStarted
                | Error::NotStarted
                | Error::AlreadyCommitted
                | Error::AlreadyAborted
                | Error::MissingGlobalDatastore
                | Error::NoDatastores
                | Error::DatastoreNotFound(_)
                | Error::DuplicateDatastore(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
