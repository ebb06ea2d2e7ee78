//! Named advisory locks
//!
//! Lockers give applications a way to serialize work on a key across
//! transactions, outside the commit protocol. A hold is owned by an id and
//! expires on its own after the requested duration, so a crashed owner can
//! never block others forever.

use concord_core::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest hold a [`MemoryLocker`] grants
const MAX_HOLD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Advisory lock service
pub trait Locker: Send + Sync {
    /// Block until `key` is free or already held by `id`, then hold it for `hold`
    fn lock(&self, key: &str, id: &str, hold: Duration) -> Result<()>;

    /// Release `key`; fails if `id` does not hold it
    fn unlock(&self, key: &str, id: &str) -> Result<()>;
}

#[derive(Debug)]
struct Hold {
    owner: String,
    expires: Instant,
}

/// In-process locker
///
/// # Thread Safety
///
/// All holds live behind one mutex; waiters park on a condition variable and
/// wake on every release or when the hold they wait for expires.
#[derive(Debug, Default)]
pub struct MemoryLocker {
    holds: Mutex<HashMap<String, Hold>>,
    released: Condvar,
}

impl MemoryLocker {
    /// Create a locker with no holds
    pub fn new() -> Self {
        Self::default()
    }

    /// Current owner of `key`, if the hold is live
    pub fn owner(&self, key: &str) -> Option<String> {
        let holds = self.holds.lock();
        holds
            .get(key)
            .filter(|h| h.expires > Instant::now())
            .map(|h| h.owner.clone())
    }

    /// Number of holds in the table, expired ones not yet pruned included
    pub fn hold_count(&self) -> usize {
        self.holds.lock().len()
    }
}

impl Locker for MemoryLocker {
    fn lock(&self, key: &str, id: &str, hold: Duration) -> Result<()> {
        let mut holds = self.holds.lock();
        loop {
            let now = Instant::now();
            let wait_until = match holds.get(key) {
                Some(h) if h.owner != id && h.expires > now => h.expires,
                _ => break,
            };
            // wakes on release, or times out when the current hold expires
            self.released.wait_until(&mut holds, wait_until);
        }
        let now = Instant::now();
        holds.retain(|_, h| h.expires > now);
        let expires = now
            .checked_add(hold)
            .filter(|_| hold <= MAX_HOLD)
            .unwrap_or(now + MAX_HOLD);
        holds.insert(
            key.to_string(),
            Hold {
                owner: id.to_string(),
                expires,
            },
        );
        debug!(key, id, hold_ms = hold.as_millis() as u64, "lock acquired");
        Ok(())
    }

    fn unlock(&self, key: &str, id: &str) -> Result<()> {
        let mut holds = self.holds.lock();
        match holds.get(key) {
            Some(h) if h.owner == id => {
                holds.remove(key);
                self.released.notify_all();
                Ok(())
            }
            _ => Err(Error::Lock(format!(
                "'{}' does not hold the lock on '{}'",
                id, key
            ))),
        }
    }
}

/// Locker backed by the oracle service
///
/// Issues `GET {url}/lock?key=..&id=..&duration=..` and
/// `GET {url}/unlock?key=..&id=..`; `duration` is in nanoseconds.
#[derive(Debug)]
pub struct HttpLocker {
    url: String,
    agent: ureq::Agent,
}

impl HttpLocker {
    /// Create a locker for the service at `url`
    pub fn new(url: &str) -> Self {
        HttpLocker {
            url: url.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(5))
                .build(),
        }
    }
}

impl Locker for HttpLocker {
    fn lock(&self, key: &str, id: &str, hold: Duration) -> Result<()> {
        self.agent
            .get(&format!("{}/lock", self.url))
            .query("key", key)
            .query("id", id)
            .query("duration", &hold.as_nanos().to_string())
            .call()
            .map_err(|e| {
                warn!(key, id, error = %e, "remote lock failed");
                Error::Lock(format!("failed to lock '{}': {}", key, e))
            })?;
        Ok(())
    }

    fn unlock(&self, key: &str, id: &str) -> Result<()> {
        self.agent
            .get(&format!("{}/unlock", self.url))
            .query("key", key)
            .query("id", id)
            .call()
            .map_err(|e| Error::Lock(format!("failed to unlock '{}': {}", key, e)))?;
        Ok(())
    }
}
