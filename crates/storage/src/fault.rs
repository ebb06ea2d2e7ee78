//! Fault-injecting connector
//!
//! Wraps another connector and fails writes once a budget of successful writes
//! is spent, so tests can stop a transaction between any two protocol steps.
//! Writes are `put`, `atomic_create`, `put_item` and `conditional_update`;
//! reads and deletes always pass through.
//!
//! ```
//! use concord_storage::{Connector, FaultyConnector, MemoryConnector};
//! use std::sync::Arc;
//!
//! let inner = Arc::new(MemoryConnector::new());
//! let faulty = FaultyConnector::new(inner.clone()).fail_after(1);
//!
//! assert!(faulty.put("a", "1").is_ok());
//! assert!(faulty.put("b", "2").is_err());
//! assert_eq!(inner.get("b").unwrap(), None);
//! ```

use crate::connector::Connector;
use concord_core::{DataItem, Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

type FailureFn = dyn Fn(&'static str) -> Error + Send + Sync;

/// Connector wrapper that injects write failures and latency
pub struct FaultyConnector {
    inner: Arc<dyn Connector>,
    /// Successful writes left before failing; negative means never fail
    budget: AtomicI64,
    delay: Duration,
    failure: Box<FailureFn>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl FaultyConnector {
    /// Wrap `inner` without any faults
    pub fn new(inner: Arc<dyn Connector>) -> Self {
        FaultyConnector {
            inner,
            budget: AtomicI64::new(-1),
            delay: Duration::ZERO,
            failure: Box::new(|op| Error::connector(op, "injected failure")),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Let `writes` writes succeed, then fail every later write
    pub fn fail_after(self, writes: usize) -> Self {
        self.budget.store(writes as i64, Ordering::SeqCst);
        self
    }

    /// Sleep before every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Replace the injected error
    pub fn with_failure(
        mut self,
        failure: impl Fn(&'static str) -> Error + Send + Sync + 'static,
    ) -> Self {
        self.failure = Box::new(failure);
        self
    }

    /// Stop injecting failures
    pub fn heal(&self) {
        self.budget.store(-1, Ordering::SeqCst);
    }

    /// Number of read calls seen
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of write calls seen, failed ones included
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    fn before_read(&self) {
        self.pause();
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn before_write(&self, op: &'static str) -> Result<()> {
        self.pause();
        self.writes.fetch_add(1, Ordering::Relaxed);
        let budget = self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| {
                if b > 0 {
                    Some(b - 1)
                } else {
                    None
                }
            });
        match budget {
            Ok(_) => Ok(()),
            Err(b) if b < 0 => Ok(()),
            Err(_) => {
                debug!(op, "injecting connector failure");
                Err((self.failure)(op))
            }
        }
    }

    fn pause(&self) {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
    }
}

impl fmt::Debug for FaultyConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultyConnector")
            .field("budget", &self.budget)
            .field("delay", &self.delay)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .finish()
    }
}

impl Connector for FaultyConnector {
    fn connect(&self) -> Result<()> {
        self.inner.connect()
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.before_read();
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.before_write("put")?;
        self.inner.put(key, value)
    }

    fn atomic_create(&self, key: &str, value: &str) -> Result<Option<String>> {
        self.before_write("atomic_create")?;
        self.inner.atomic_create(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.pause();
        self.inner.delete(key)
    }

    fn get_item(&self, key: &str) -> Result<Option<DataItem>> {
        self.before_read();
        self.inner.get_item(key)
    }

    fn put_item(&self, key: &str, item: &DataItem) -> Result<String> {
        self.before_write("put_item")?;
        self.inner.put_item(key, item)
    }

    fn conditional_update(&self, key: &str, item: &DataItem, do_create: bool) -> Result<String> {
        self.before_write("conditional_update")?;
        self.inner.conditional_update(key, item, do_create)
    }
}
