//! Core identity and state types
//!
//! This module defines the fundamental types used throughout the protocol:
//! - [`TxnId`]: Unique identifier for a transaction
//! - [`Timestamp`]: Logical time handed out by a time source
//! - [`TxnState`]: State of a record or of a transaction status record

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Logical timestamp in microseconds
///
/// Produced by a time source at transaction start (the snapshot watermark)
/// and at commit (the version timestamp carried by every write).
pub type Timestamp = i64;

/// Unique identifier for a transaction
///
/// TxnId is used throughout the protocol to identify one transaction. It's used in:
/// - DataItem ownership (which transaction produced a version)
/// - Transaction status record keys
/// - Lock ownership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(Uuid);

impl TxnId {
    /// Create a new random TxnId using UUID v4
    ///
    /// # Examples
    ///
    /// ```
    /// use concord_core::types::TxnId;
    ///
    /// let id1 = TxnId::new();
    /// let id2 = TxnId::new();
    /// assert_ne!(id1, id2);
    /// ```
    pub fn new() -> Self {
        TxnId(Uuid::new_v4())
    }

    /// Create TxnId from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        TxnId(Uuid::from_bytes(bytes))
    }

    /// Get raw bytes representation
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Key under which this transaction's status record is stored
    pub fn tsr_key(&self) -> String {
        self.0.to_string()
    }
}

impl Default for TxnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TxnId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(TxnId)
            .map_err(|e| Error::Serialization(format!("invalid txn id '{}': {}", s, e)))
    }
}

/// State of a record version or of a transaction status record
///
/// A [`crate::DataItem`] is either `Prepared` (written by an in-flight
/// transaction) or `Committed`. A transaction status record holds either
/// `Committed` or `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxnState {
    /// Written by a transaction that has not reached its commit point
    Prepared,
    /// Part of a committed transaction
    Committed,
    /// The owning transaction will never commit
    Aborted,
}

impl TxnState {
    /// Canonical string form, as stored in status records
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnState::Prepared => "PREPARED",
            TxnState::Committed => "COMMITTED",
            TxnState::Aborted => "ABORTED",
        }
    }

    /// Whether this is a final verdict for a transaction
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }
}

impl std::fmt::Display for TxnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxnState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PREPARED" => Ok(TxnState::Prepared),
            "COMMITTED" => Ok(TxnState::Committed),
            "ABORTED" => Ok(TxnState::Aborted),
            other => Err(Error::Serialization(format!(
                "unknown transaction state '{}'",
                other
            ))),
        }
    }
}
