//! Transaction coordinator
//!
//! A [`Transaction`] drives the commit protocol across every participant it
//! owns and keeps its status record in the global datastore.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. check status is Started
//! 2. draw commit_time from the time source
//! 3. prepare every participant
//!    IF any fails: roll back every participant, return PrepareFailed
//! 4. read own status record (a failed read counts as no verdict)
//!    IF ABORTED (a reader timed us out): roll back, return AbortedByOther
//! 5. create status record COMMITTED           (COMMIT POINT)
//!    IF an ABORTED record won the race: roll back, return AbortedByOther
//!    IF the write failed: return TsrWriteFailed; records stay PREPARED
//! 6. commit every participant (best effort; readers finish leftovers)
//! 7. delete the status record, unless a step 6 failed
//! ```
//!
//! Before step 5 a crash leaves PREPARED records that readers roll back once
//! their lease expires. After step 5 the transaction is committed no matter
//! what: readers roll its records forward.

use crate::datastore::{Datastore, TxnContext};
use crate::locker::{Locker, MemoryLocker};
use crate::time::{LocalTimeSource, TimeSource};
use concord_core::{Error, Result, Timestamp, TxnId, TxnState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle of a transaction
///
/// ```text
/// Empty -> Started -> Committed
///                  -> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Created, not started
    Empty,
    /// Accepting reads and writes
    Started,
    /// Passed the commit point
    Committed,
    /// Rolled back or discarded
    Aborted,
}

impl TransactionStatus {
    /// Whether the transition `self -> next` is allowed
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Empty, Started) | (Started, Committed) | (Started, Aborted)
        )
    }

    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::Aborted)
    }

    /// Error for an operation that needs a started transaction
    fn not_active(&self) -> Error {
        match self {
            TransactionStatus::Committed => Error::AlreadyCommitted,
            TransactionStatus::Aborted => Error::AlreadyAborted,
            _ => Error::NotStarted,
        }
    }
}

/// A client-coordinated transaction over one or more datastores
pub struct Transaction {
    txn_id: TxnId,
    status: TransactionStatus,
    start_time: Timestamp,
    commit_time: Timestamp,
    datastores: BTreeMap<String, Datastore>,
    global: Option<Datastore>,
    time_source: Arc<dyn TimeSource>,
    locker: Arc<dyn Locker>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("txn_id", &self.txn_id)
            .field("status", &self.status)
            .field("start_time", &self.start_time)
            .field("commit_time", &self.commit_time)
            .field("datastores", &self.datastores.keys().collect::<Vec<_>>())
            .field("global", &self.global.as_ref().map(|g| g.name()))
            .finish()
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    /// Create an empty transaction with a local clock and its own locker
    pub fn new() -> Self {
        Self::with_sources(Arc::new(LocalTimeSource::new()), Arc::new(MemoryLocker::new()))
    }

    /// Create an empty transaction with the given time source and locker
    pub fn with_sources(time_source: Arc<dyn TimeSource>, locker: Arc<dyn Locker>) -> Self {
        Transaction {
            txn_id: TxnId::new(),
            status: TransactionStatus::Empty,
            start_time: 0,
            commit_time: 0,
            datastores: BTreeMap::new(),
            global: None,
            time_source,
            locker,
        }
    }

    // ===== Accessors =====

    /// Transaction id; fixed once started
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Current lifecycle status
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Snapshot watermark; zero before start
    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    /// Commit timestamp; zero before commit
    pub fn commit_time(&self) -> Timestamp {
        self.commit_time
    }

    /// Buffered writes held by datastore `name`
    pub fn write_set_len(&self, name: &str) -> Result<usize> {
        self.datastores
            .get(name)
            .map(Datastore::write_set_len)
            .ok_or_else(|| Error::DatastoreNotFound(name.to_string()))
    }

    // ===== Setup =====

    /// Register a participant
    pub fn add_datastore(&mut self, ds: Datastore) -> Result<()> {
        if self.datastores.contains_key(ds.name()) {
            return Err(Error::DuplicateDatastore(ds.name().to_string()));
        }
        self.datastores.insert(ds.name().to_string(), ds);
        Ok(())
    }

    /// Designate the datastore holding status records
    pub fn set_global_datastore(&mut self, ds: Datastore) {
        self.global = Some(ds);
    }

    /// Replace the time source
    pub fn set_time_source(&mut self, time_source: Arc<dyn TimeSource>) {
        self.time_source = time_source;
    }

    /// Replace the locker
    pub fn set_locker(&mut self, locker: Arc<dyn Locker>) {
        self.locker = locker;
    }

    fn transition(&mut self, next: TransactionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(match (self.status, next) {
                (TransactionStatus::Empty, _) => Error::NotStarted,
                (_, TransactionStatus::Started) => Error::AlreadyStarted,
                (status, _) => status.not_active(),
            });
        }
        self.status = next;
        Ok(())
    }

    fn ensure_started(&self) -> Result<()> {
        if self.status == TransactionStatus::Started {
            Ok(())
        } else {
            Err(self.status.not_active())
        }
    }

    // ===== Lifecycle =====

    /// Start the transaction
    ///
    /// Assigns a fresh id and the snapshot watermark, and connects every
    /// participant.
    pub fn start(&mut self) -> Result<()> {
        if self.status != TransactionStatus::Empty {
            return Err(Error::AlreadyStarted);
        }
        if self.global.is_none() {
            return Err(Error::MissingGlobalDatastore);
        }
        if self.datastores.is_empty() {
            return Err(Error::NoDatastores);
        }

        self.txn_id = TxnId::new();
        self.start_time = self.time_source.now()?;
        for ds in self.datastores.values() {
            ds.connect()?;
        }
        if let Some(global) = &self.global {
            global.connect()?;
        }
        self.transition(TransactionStatus::Started)?;
        debug!(txn_id = %self.txn_id, start_time = self.start_time, "transaction started");
        Ok(())
    }

    /// Read and decode `key` from datastore `ds`
    pub fn read<T: DeserializeOwned>(&mut self, ds: &str, key: &str) -> Result<T> {
        self.ensure_started()?;
        let global = self.global.as_ref().ok_or(Error::MissingGlobalDatastore)?;
        let ctx = self.ctx_parts().with_tsr(global);
        let participant = self
            .datastores
            .get_mut(ds)
            .ok_or_else(|| Error::DatastoreNotFound(ds.to_string()))?;
        participant.read(key, &ctx)
    }

    /// Buffer a write of `value` to `key` in datastore `ds`
    pub fn write<T: Serialize + ?Sized>(&mut self, ds: &str, key: &str, value: &T) -> Result<()> {
        self.ensure_started()?;
        let global = self.global.as_ref().ok_or(Error::MissingGlobalDatastore)?;
        let ctx = self.ctx_parts().with_tsr(global);
        let participant = self
            .datastores
            .get_mut(ds)
            .ok_or_else(|| Error::DatastoreNotFound(ds.to_string()))?;
        participant.write(key, value, &ctx)
    }

    /// Buffer a deletion of `key` in datastore `ds`
    pub fn delete(&mut self, ds: &str, key: &str) -> Result<()> {
        self.ensure_started()?;
        let global = self.global.as_ref().ok_or(Error::MissingGlobalDatastore)?;
        let ctx = self.ctx_parts().with_tsr(global);
        let participant = self
            .datastores
            .get_mut(ds)
            .ok_or_else(|| Error::DatastoreNotFound(ds.to_string()))?;
        participant.delete(key, &ctx)
    }

    /// Commit the transaction
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_started()?;

        if self.datastores.values().all(|ds| ds.write_set_len() == 0) {
            // read-only: nothing to install
            self.transition(TransactionStatus::Committed)?;
            debug!(txn_id = %self.txn_id, "read-only transaction committed");
            return Ok(());
        }

        self.commit_time = self.time_source.now()?;
        let txn_id = self.txn_id;
        let parts = self.ctx_parts();
        let global = self.global.as_ref().ok_or(Error::MissingGlobalDatastore)?;
        let ctx = parts.with_tsr(global);

        // prepare
        let mut prepare_err = None;
        for ds in self.datastores.values_mut() {
            if let Err(e) = ds.prepare(&ctx) {
                warn!(txn_id = %txn_id, datastore = ds.name(), error = %e, "prepare failed");
                prepare_err = Some(e);
                break;
            }
        }
        if let Some(e) = prepare_err {
            rollback_all(&mut self.datastores, &ctx);
            self.status = TransactionStatus::Aborted;
            return Err(Error::PrepareFailed(Box::new(e)));
        }

        // commit point
        let recorded = global.read_tsr(txn_id).unwrap_or_else(|e| {
            // the atomic create below still refuses to overwrite a verdict
            warn!(txn_id = %txn_id, error = %e, "status record read failed at commit point");
            None
        });
        let decided = match recorded {
            Some(TxnState::Aborted) => Some(TxnState::Aborted),
            _ => match global.write_tsr(txn_id, TxnState::Committed) {
                Ok(existing) => existing,
                Err(e) => {
                    warn!(txn_id = %txn_id, error = %e, "status record write failed, records left prepared");
                    for ds in self.datastores.values_mut() {
                        // caches only; prepared records recover through their lease
                        if let Err(e) = ds.abort(false, &ctx) {
                            warn!(txn_id = %txn_id, datastore = ds.name(), error = %e, "dropping caches failed");
                        }
                    }
                    self.status = TransactionStatus::Aborted;
                    return Err(Error::TsrWriteFailed(Box::new(e)));
                }
            },
        };
        if decided == Some(TxnState::Aborted) {
            info!(txn_id = %txn_id, "aborted by another transaction before commit point");
            rollback_all(&mut self.datastores, &ctx);
            self.status = TransactionStatus::Aborted;
            return Err(Error::AbortedByOther(txn_id.to_string()));
        }
        self.status = TransactionStatus::Committed;

        // commit participants
        let mut all_committed = true;
        for ds in self.datastores.values_mut() {
            if let Err(e) = ds.commit(&ctx) {
                warn!(txn_id = %txn_id, datastore = ds.name(), error = %e, "commit step failed, keeping status record");
                all_committed = false;
            }
        }
        if all_committed {
            if let Err(e) = global.delete_tsr(txn_id) {
                warn!(txn_id = %txn_id, error = %e, "status record cleanup failed");
            }
        }
        debug!(txn_id = %txn_id, commit_time = self.commit_time, "transaction committed");
        Ok(())
    }

    /// Abort the transaction, discarding buffered writes
    pub fn abort(&mut self) -> Result<()> {
        self.ensure_started()?;
        let global = self.global.as_ref().ok_or(Error::MissingGlobalDatastore)?;
        let ctx = self.ctx_parts().with_tsr(global);
        for ds in self.datastores.values_mut() {
            ds.abort(false, &ctx)?;
        }
        self.transition(TransactionStatus::Aborted)?;
        debug!(txn_id = %self.txn_id, "transaction aborted");
        Ok(())
    }

    // ===== Locks =====

    /// Take the advisory lock on `key` for `id`
    pub fn lock(&self, key: &str, id: &str, hold: Duration) -> Result<()> {
        self.locker.lock(key, id, hold)
    }

    /// Release the advisory lock on `key` held by `id`
    pub fn unlock(&self, key: &str, id: &str) -> Result<()> {
        self.locker.unlock(key, id)
    }

    fn ctx_parts(&self) -> CtxParts {
        CtxParts {
            txn_id: self.txn_id,
            start_time: self.start_time,
            commit_time: self.commit_time,
        }
    }
}

/// Context fields that do not borrow the transaction
#[derive(Clone, Copy)]
struct CtxParts {
    txn_id: TxnId,
    start_time: Timestamp,
    commit_time: Timestamp,
}

impl CtxParts {
    fn with_tsr(self, tsr: &Datastore) -> TxnContext<'_> {
        TxnContext {
            txn_id: self.txn_id,
            start_time: self.start_time,
            commit_time: self.commit_time,
            tsr,
        }
    }
}

/// Restore every participant's prepared records; failures are logged
fn rollback_all(datastores: &mut BTreeMap<String, Datastore>, ctx: &TxnContext<'_>) {
    for ds in datastores.values_mut() {
        if let Err(e) = ds.abort(true, ctx) {
            warn!(txn_id = %ctx.txn_id, datastore = ds.name(), error = %e, "rollback failed, leaving records to lease recovery");
        }
    }
}
