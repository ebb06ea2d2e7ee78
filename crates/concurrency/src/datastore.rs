//! Transaction participant
//!
//! A [`Datastore`] is one backend as seen by one transaction. It buffers
//! writes, serves repeatable reads, and runs the per-backend half of the
//! commit protocol.
//!
//! ## Read path
//!
//! ```text
//! write cache hit  -> buffered value (KeyNotFound if tombstoned)
//! read cache hit   -> cached version
//! backend item     -> COMMITTED: walk prev to the snapshot version
//!                     PREPARED:  consult the owner's status record
//!                                COMMITTED          -> roll forward
//!                                ABORTED            -> roll back
//!                                absent, lease over -> record ABORTED, roll back
//!                                absent, lease live -> DirtyRead
//! ```
//!
//! Recovery is a conditional update against the version just read. Losing
//! that race means someone else recovered the record first; the read starts
//! over from the backend.
//!
//! ## Status record retention
//!
//! An ABORTED record written by a reader is kept after the rollback: it is
//! what refuses the owner's commit point if the owner is still alive, and
//! what tells readers of the owner's other keys to roll back. The one
//! exception is a timeout that loses to the owner's own commit; that record
//! guards nothing and is removed. COMMITTED records are removed by their
//! coordinator once every participant has committed.
//!
//! ## Prepare
//!
//! Buffered writes are installed in key order. Each one embeds the version it
//! replaces as `prev`, is capped to `max_record_length`, and is stored
//! PREPARED with a lease through a conditional update. The first failure stops
//! the phase; nothing is retried.

use crate::chain;
use chrono::Utc;
use concord_core::{DataItem, Error, ProtocolConfig, Result, Timestamp, TxnId, TxnState};
use concord_storage::Connector;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempts at recovering a prepared record before giving up with `DirtyRead`
const MAX_RECOVERY_ATTEMPTS: usize = 3;

/// Per-call view of the owning transaction
///
/// Handed to every participant operation instead of a stored back-reference.
#[derive(Debug, Clone, Copy)]
pub struct TxnContext<'a> {
    /// Owning transaction
    pub txn_id: TxnId,
    /// Snapshot watermark
    pub start_time: Timestamp,
    /// Timestamp given to installed versions; zero before commit
    pub commit_time: Timestamp,
    /// Datastore holding transaction status records
    pub tsr: &'a Datastore,
}

/// A buffered write and the version it will replace
#[derive(Debug, Clone)]
struct PendingWrite {
    item: DataItem,
    /// Version this write replaces; `None` creates the key
    base: Option<DataItem>,
    /// Base came from a backend probe rather than a read
    probed: bool,
    /// Installed in the backend by `prepare`
    prepared: bool,
}

/// Current backend state of a key after recovery
#[derive(Debug)]
enum Head {
    Missing,
    Committed(DataItem),
    InFlight(DataItem),
}

/// One backend participating in one transaction
pub struct Datastore {
    name: String,
    conn: Arc<dyn Connector>,
    config: ProtocolConfig,
    read_cache: HashMap<String, DataItem>,
    write_cache: HashMap<String, PendingWrite>,
}

impl fmt::Debug for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("read_cache", &self.read_cache.len())
            .field("write_cache", &self.write_cache.len())
            .finish()
    }
}

impl Datastore {
    /// Create a participant with default protocol settings
    pub fn new(name: impl Into<String>, conn: Arc<dyn Connector>) -> Self {
        Self::with_config(name, conn, ProtocolConfig::default())
    }

    /// Create a participant with explicit protocol settings
    pub fn with_config(
        name: impl Into<String>,
        conn: Arc<dyn Connector>,
        config: ProtocolConfig,
    ) -> Self {
        Datastore {
            name: name.into(),
            conn,
            config,
            read_cache: HashMap::new(),
            write_cache: HashMap::new(),
        }
    }

    /// Fresh participant over the same backend, with empty caches
    pub fn copy(&self) -> Self {
        Self::with_config(self.name.clone(), Arc::clone(&self.conn), self.config.clone())
    }

    /// Participant name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Protocol settings
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Underlying backend
    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.conn
    }

    /// Number of buffered writes and deletes
    pub fn write_set_len(&self) -> usize {
        self.write_cache.len()
    }

    /// Open the backend connection
    pub fn connect(&self) -> Result<()> {
        self.conn.connect()
    }

    // ===== Reads =====

    /// Read and decode the value of `key` visible to this transaction
    pub fn read<T: DeserializeOwned>(&mut self, key: &str, ctx: &TxnContext<'_>) -> Result<T> {
        let raw = self.read_raw(key, ctx)?;
        self.config.codec.decode(&raw)
    }

    /// Read the encoded value of `key` visible to this transaction
    pub fn read_raw(&mut self, key: &str, ctx: &TxnContext<'_>) -> Result<String> {
        if let Some(pending) = self.write_cache.get(key) {
            if pending.item.is_deleted {
                return Err(Error::KeyNotFound(key.to_string()));
            }
            return Ok(pending.item.value.clone());
        }
        if let Some(cached) = self.read_cache.get(key) {
            if cached.is_deleted {
                return Err(Error::KeyNotFound(key.to_string()));
            }
            return Ok(cached.value.clone());
        }

        let head = match self.resolve_head(key, ctx)? {
            Head::Missing => return Err(Error::KeyNotFound(key.to_string())),
            Head::InFlight(item) => {
                return Err(Error::DirtyRead {
                    key: key.to_string(),
                    txn_id: item.txn_id.to_string(),
                })
            }
            Head::Committed(item) => item,
        };

        let visible = chain::find_visible(
            head,
            ctx.start_time,
            self.config.max_record_length,
            self.config.codec,
        )?;
        let Some(item) = visible else {
            return Err(Error::KeyNotFound(key.to_string()));
        };

        let deleted = item.is_deleted;
        let value = item.value.clone();
        // tombstones are cached too, so a later write carries their version
        self.read_cache.insert(key.to_string(), item);
        if deleted {
            return Err(Error::KeyNotFound(key.to_string()));
        }
        Ok(value)
    }

    // ===== Writes =====

    /// Buffer a write of `value` to `key`
    pub fn write<T: Serialize + ?Sized>(
        &mut self,
        key: &str,
        value: &T,
        ctx: &TxnContext<'_>,
    ) -> Result<()> {
        let raw = self.config.codec.encode(value)?;
        self.write_raw(key, raw, ctx)
    }

    /// Buffer a write of an already encoded value
    pub fn write_raw(&mut self, key: &str, value: String, ctx: &TxnContext<'_>) -> Result<()> {
        if let Some(pending) = self.write_cache.get_mut(key) {
            pending.item.value = value;
            pending.item.is_deleted = false;
            return Ok(());
        }
        self.buffer(DataItem::new(key, value, ctx.txn_id), ctx)
    }

    /// Buffer a deletion of `key`
    pub fn delete(&mut self, key: &str, ctx: &TxnContext<'_>) -> Result<()> {
        if let Some(pending) = self.write_cache.get_mut(key) {
            if pending.item.is_deleted {
                return Err(Error::KeyNotFound(key.to_string()));
            }
            pending.item.is_deleted = true;
            pending.item.value.clear();
            return Ok(());
        }
        self.buffer(DataItem::tombstone(key, ctx.txn_id), ctx)
    }

    /// Seed a write-cache entry with the version it will replace
    fn buffer(&mut self, item: DataItem, ctx: &TxnContext<'_>) -> Result<()> {
        let (base, probed) = match self.read_cache.get(&item.key) {
            Some(cached) => (Some(cached.clone()), false),
            None => match self.resolve_head(&item.key, ctx)? {
                Head::Missing => (None, true),
                Head::Committed(head) | Head::InFlight(head) => (Some(head), true),
            },
        };
        self.write_cache.insert(
            item.key.clone(),
            PendingWrite {
                item,
                base,
                probed,
                prepared: false,
            },
        );
        Ok(())
    }

    // ===== Commit protocol =====

    /// Install every buffered write as a PREPARED version, in key order
    ///
    /// Stops at the first failure. A version mismatch or a conflicting base is
    /// reported as [`Error::WriteConflict`]; other errors are returned as is.
    pub fn prepare(&mut self, ctx: &TxnContext<'_>) -> Result<()> {
        let lease = chrono::Duration::from_std(self.config.lease_time())
            .map_err(|e| Error::InvalidConfig(format!("lease time out of range: {}", e)))?;

        let mut keys: Vec<String> = self.write_cache.keys().cloned().collect();
        keys.sort();

        for key in keys {
            let Some(pending) = self.write_cache.get(&key) else {
                continue;
            };
            if pending.probed {
                if let Some(base) = &pending.base {
                    check_blind_write(base, ctx.start_time)?;
                }
            }

            let mut item = chain::link(pending.item.clone(), pending.base.as_ref(), &self.config)?;
            item.txn_id = ctx.txn_id;
            item.txn_state = TxnState::Prepared;
            item.t_valid = ctx.commit_time;
            item.t_lease = Utc::now() + lease;
            item.group_key_list = ctx.txn_id.tsr_key();
            let do_create = pending.base.is_none();

            let version = self
                .conn
                .conditional_update(&key, &item, do_create)
                .map_err(|e| match e {
                    Error::VersionMismatch {
                        key,
                        expected,
                        actual,
                    } => Error::WriteConflict {
                        key,
                        reason: format!(
                            "version mismatch: expected '{}', found '{}'",
                            expected, actual
                        ),
                    },
                    other => other,
                })?;
            item.version = version;
            debug!(
                datastore = %self.name,
                txn_id = %ctx.txn_id,
                key = %key,
                linked_len = item.linked_len,
                "prepared"
            );

            if let Some(pending) = self.write_cache.get_mut(&key) {
                pending.item = item;
                pending.prepared = true;
            }
        }
        Ok(())
    }

    /// Flip every prepared version of this transaction to COMMITTED
    ///
    /// Records already rolled forward by a reader are skipped. Every key is
    /// attempted; the first backend error is returned and the caches are
    /// cleared either way.
    pub fn commit(&mut self, ctx: &TxnContext<'_>) -> Result<()> {
        let mut first_err = None;
        for (key, pending) in &self.write_cache {
            if !pending.prepared {
                continue;
            }
            if let Err(e) = self.flip_committed(key, ctx.txn_id) {
                warn!(datastore = %self.name, txn_id = %ctx.txn_id, key = %key, error = %e, "commit step failed");
                first_err.get_or_insert(e);
            }
        }
        self.clear();
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Discard this transaction's work
    ///
    /// With `has_committed == false` only the caches are dropped. Otherwise
    /// every stored version still owned by this transaction and PREPARED is
    /// restored to its predecessor.
    pub fn abort(&mut self, has_committed: bool, ctx: &TxnContext<'_>) -> Result<()> {
        if !has_committed {
            self.clear();
            return Ok(());
        }

        let mut first_err = None;
        for key in self.write_cache.keys() {
            let result = match self.conn.get_item(key) {
                Ok(Some(item)) if item.txn_id == ctx.txn_id && item.is_prepared() => {
                    self.rollback(item).map(|_| ())
                }
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            };
            match result {
                // someone else recovered it first
                Ok(()) | Err(Error::VersionMismatch { .. }) => {}
                Err(e) => {
                    warn!(datastore = %self.name, txn_id = %ctx.txn_id, key = %key, error = %e, "rollback failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        self.clear();
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn clear(&mut self) {
        self.read_cache.clear();
        self.write_cache.clear();
    }

    fn flip_committed(&self, key: &str, txn_id: TxnId) -> Result<()> {
        let Some(mut item) = self.conn.get_item(key)? else {
            return Ok(());
        };
        if item.txn_id != txn_id || !item.is_prepared() {
            return Ok(());
        }
        item.txn_state = TxnState::Committed;
        match self.conn.conditional_update(key, &item, false) {
            Ok(_) | Err(Error::VersionMismatch { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // ===== Recovery =====

    /// Fetch the current item of `key`, recovering it if its owner is decided
    fn resolve_head(&self, key: &str, ctx: &TxnContext<'_>) -> Result<Head> {
        let mut owner = String::new();
        // owner this call timed out, and the key of the ABORTED record it wrote
        let mut timed_out: Option<(TxnId, String)> = None;
        for attempt in 0..MAX_RECOVERY_ATTEMPTS {
            let Some(item) = self.conn.get_item(key)? else {
                return Ok(Head::Missing);
            };
            if item.is_committed() {
                if let Some((dead, tsr_key)) = &timed_out {
                    // a rollback tombstone keeps the owner's id but has no commit time
                    let owner_committed = item.txn_id == *dead && item.t_valid != 0;
                    if owner_committed {
                        self.drop_orphan_verdict(ctx, key, tsr_key);
                    }
                }
                return Ok(Head::Committed(item));
            }
            owner = item.txn_id.to_string();

            let tsr_key = item.tsr_key();
            let verdict = match ctx.tsr.read_tsr_key(&tsr_key)? {
                Some(state) => state,
                None if item.lease_expired(Utc::now()) => {
                    // time the owner out; a verdict recorded first wins
                    match ctx.tsr.create_tsr(&tsr_key, TxnState::Aborted)? {
                        None => {
                            warn!(key, owner = %owner, "lease expired, aborting owner");
                            timed_out = Some((item.txn_id, tsr_key.clone()));
                            TxnState::Aborted
                        }
                        Some(existing) => existing,
                    }
                }
                None => return Ok(Head::InFlight(item)),
            };

            let recovered = match verdict {
                TxnState::Committed => self.roll_forward(item),
                TxnState::Aborted => self.rollback(item),
                TxnState::Prepared => return Ok(Head::InFlight(item)),
            };
            match recovered {
                Ok(item) => return Ok(Head::Committed(item)),
                Err(Error::VersionMismatch { .. }) => {
                    debug!(key, attempt, "lost recovery race, re-reading");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::DirtyRead {
            key: key.to_string(),
            txn_id: owner,
        })
    }

    fn drop_orphan_verdict(&self, ctx: &TxnContext<'_>, key: &str, tsr_key: &str) {
        match ctx.tsr.conn.delete(tsr_key) {
            Ok(()) => debug!(key, tsr_key, "removed verdict of a committed owner"),
            Err(e) => warn!(key, tsr_key, error = %e, "orphan verdict cleanup failed"),
        }
    }

    /// Mark a prepared item committed in place
    fn roll_forward(&self, mut item: DataItem) -> Result<DataItem> {
        item.txn_state = TxnState::Committed;
        item.version = self.conn.conditional_update(&item.key, &item, false)?;
        debug!(datastore = %self.name, key = %item.key, owner = %item.txn_id, "rolled forward");
        Ok(item)
    }

    /// Restore a prepared item to its predecessor
    ///
    /// An item without predecessor created its key, so it becomes a committed
    /// tombstone that no snapshot can see past.
    fn rollback(&self, item: DataItem) -> Result<DataItem> {
        let mut restored = match item.prev_item(self.config.codec)? {
            Some(mut prev) => {
                prev.version = item.version.clone();
                prev
            }
            None => {
                let mut tombstone = item.clone();
                tombstone.is_deleted = true;
                tombstone.value.clear();
                tombstone.txn_state = TxnState::Committed;
                tombstone.t_valid = 0;
                tombstone
            }
        };
        restored.version = self.conn.conditional_update(&item.key, &restored, false)?;
        info!(datastore = %self.name, key = %item.key, owner = %item.txn_id, "rolled back");
        Ok(restored)
    }

    // ===== Transaction status records =====

    /// Read the recorded verdict of `txn_id`
    pub fn read_tsr(&self, txn_id: TxnId) -> Result<Option<TxnState>> {
        self.read_tsr_key(&txn_id.tsr_key())
    }

    /// Record a verdict for `txn_id` unless one exists
    ///
    /// Returns the verdict already recorded, if any; in that case nothing is
    /// written.
    pub fn write_tsr(&self, txn_id: TxnId, state: TxnState) -> Result<Option<TxnState>> {
        self.create_tsr(&txn_id.tsr_key(), state)
    }

    /// Remove the status record of `txn_id`
    pub fn delete_tsr(&self, txn_id: TxnId) -> Result<()> {
        self.conn.delete(&txn_id.tsr_key())
    }

    fn read_tsr_key(&self, key: &str) -> Result<Option<TxnState>> {
        self.conn.get(key)?.map(|s| s.parse()).transpose()
    }

    fn create_tsr(&self, key: &str, state: TxnState) -> Result<Option<TxnState>> {
        self.conn
            .atomic_create(key, state.as_str())?
            .map(|s| s.parse())
            .transpose()
    }
}

/// Reject replacing a version this transaction never read and may not see
fn check_blind_write(base: &DataItem, start_time: Timestamp) -> Result<()> {
    if base.is_prepared() {
        return Err(Error::WriteConflict {
            key: base.key.clone(),
            reason: format!("record is prepared by transaction {}", base.txn_id),
        });
    }
    if base.t_valid > start_time {
        return Err(Error::WriteConflict {
            key: base.key.clone(),
            reason: format!(
                "record committed at {} after snapshot {}",
                base.t_valid, start_time
            ),
        });
    }
    Ok(())
}
