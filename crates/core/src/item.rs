//! Versioned record model
//!
//! A [`DataItem`] is one version of one key in one backend. The current item
//! embeds its predecessor in `prev`, which embeds its own predecessor, and so
//! on: the version chain is a singly linked list materialized through the
//! codec. Only the head is ever stored as a top-level record.
//!
//! ```text
//! current (v3, TValid=30) --prev--> v2 (TValid=20) --prev--> v1 (TValid=10, prev="")
//! ```

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::types::{Timestamp, TxnId, TxnState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One version of one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataItem {
    /// Application key
    pub key: String,
    /// Encoded application payload (empty for tombstones)
    pub value: String,
    /// Transaction that produced this version
    pub txn_id: TxnId,
    /// `Prepared` while the owning transaction is in flight, then `Committed`
    pub txn_state: TxnState,
    /// Commit timestamp; the version is visible to snapshots taken at or after it
    pub t_valid: Timestamp,
    /// Wall-clock expiry after which a prepared version may be recovered by anyone
    pub t_lease: DateTime<Utc>,
    /// Encoded predecessor, or empty for the oldest retained version
    pub prev: String,
    /// Length of the chain ending at this item
    pub linked_len: usize,
    /// Tombstone flag
    pub is_deleted: bool,
    /// Backend concurrency token; empty when not yet stored
    pub version: String,
    /// Status record keys of the owning transaction, comma separated
    pub group_key_list: String,
}

impl DataItem {
    /// Create an unstored write of `value` by `txn_id`
    ///
    /// Metadata (`t_valid`, `t_lease`, `prev`, `linked_len`) is filled in at
    /// prepare time.
    pub fn new(key: impl Into<String>, value: impl Into<String>, txn_id: TxnId) -> Self {
        DataItem {
            key: key.into(),
            value: value.into(),
            txn_id,
            txn_state: TxnState::Committed,
            t_valid: 0,
            t_lease: DateTime::<Utc>::UNIX_EPOCH,
            prev: String::new(),
            linked_len: 1,
            is_deleted: false,
            version: String::new(),
            group_key_list: txn_id.tsr_key(),
        }
    }

    /// Create an unstored tombstone for `key` by `txn_id`
    pub fn tombstone(key: impl Into<String>, txn_id: TxnId) -> Self {
        let mut item = DataItem::new(key, String::new(), txn_id);
        item.is_deleted = true;
        item
    }

    /// Whether the owning transaction has not reached a verdict
    pub fn is_prepared(&self) -> bool {
        self.txn_state == TxnState::Prepared
    }

    /// Whether this version belongs to a committed transaction
    pub fn is_committed(&self) -> bool {
        self.txn_state == TxnState::Committed
    }

    /// Whether a predecessor is embedded
    pub fn has_prev(&self) -> bool {
        !self.prev.is_empty()
    }

    /// Whether the prepare lease has run out at `now`
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.t_lease < now
    }

    /// Whether this version is visible to a snapshot taken at `start`
    pub fn visible_at(&self, start: Timestamp) -> bool {
        self.t_valid <= start
    }

    /// Key of the owning transaction's status record
    ///
    /// Falls back to the transaction id for items written without a group key.
    pub fn tsr_key(&self) -> String {
        match self.group_key_list.split(',').map(str::trim).find(|k| !k.is_empty()) {
            Some(key) => key.to_string(),
            None => self.txn_id.tsr_key(),
        }
    }

    /// Decode the embedded predecessor
    ///
    /// Returns `Ok(None)` for the oldest retained version. A predecessor that
    /// does not decode, or that belongs to another key, is a
    /// [`Error::MalformedChain`].
    pub fn prev_item(&self, codec: Codec) -> Result<Option<DataItem>> {
        if self.prev.is_empty() {
            return Ok(None);
        }
        let prev: DataItem = codec
            .decode(&self.prev)
            .map_err(|e| Error::MalformedChain {
                key: self.key.clone(),
                reason: e.to_string(),
            })?;
        if prev.key != self.key {
            return Err(Error::MalformedChain {
                key: self.key.clone(),
                reason: format!("predecessor belongs to key '{}'", prev.key),
            });
        }
        Ok(Some(prev))
    }
}

impl std::fmt::Display for DataItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DataItem{{key: {}, txn: {}, state: {}, t_valid: {}, version: {}, linked_len: {}, deleted: {}}}",
            self.key,
            self.txn_id,
            self.txn_state,
            self.t_valid,
            self.version,
            self.linked_len,
            self.is_deleted
        )
    }
}
