//! In-memory connector
//!
//! DashMap-backed, shard-locked store used by tests and single-process
//! deployments.
//!
//! # Design
//!
//! - Items and raw values live in separate maps keyed by string
//! - Conditional updates run inside the DashMap entry lock for their key
//! - Version tokens come from one store-wide `AtomicU64`, so a key deleted and
//!   re-created never reuses a token
//!
//! # Thread Safety
//!
//! All operations are thread-safe and only lock the shard holding the key.

use crate::connector::Connector;
use concord_core::{DataItem, Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// DashMap-backed connector
#[derive(Debug, Default)]
pub struct MemoryConnector {
    items: DashMap<String, DataItem>,
    values: DashMap<String, String>,
    version: AtomicU64,
}

impl MemoryConnector {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::AcqRel) + 1).to_string()
    }

    /// Number of stored items
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Number of stored raw values
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Whether an item is stored under `key`
    pub fn contains_item(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    /// Remove everything
    pub fn clear(&self) {
        self.items.clear();
        self.values.clear();
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).map(|v| v.value().clone()))
    }

    #[inline]
    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn atomic_create(&self, key: &str, value: &str) -> Result<Option<String>> {
        match self.values.entry(key.to_string()) {
            Entry::Occupied(existing) => Ok(Some(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(value.to_string());
                Ok(None)
            }
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.values.remove(key);
        self.items.remove(key);
        Ok(())
    }

    #[inline]
    fn get_item(&self, key: &str) -> Result<Option<DataItem>> {
        Ok(self.items.get(key).map(|item| item.value().clone()))
    }

    fn put_item(&self, key: &str, item: &DataItem) -> Result<String> {
        let version = self.next_version();
        let mut stored = item.clone();
        stored.version = version.clone();
        self.items.insert(key.to_string(), stored);
        Ok(version)
    }

    fn conditional_update(&self, key: &str, item: &DataItem, do_create: bool) -> Result<String> {
        match self.items.entry(key.to_string()) {
            Entry::Occupied(mut current) => {
                if do_create || current.get().version != item.version {
                    trace!(key, expected = %item.version, actual = %current.get().version, "conditional update rejected");
                    return Err(Error::VersionMismatch {
                        key: key.to_string(),
                        expected: item.version.clone(),
                        actual: current.get().version.clone(),
                    });
                }
                let version = self.next_version();
                let mut stored = item.clone();
                stored.version = version.clone();
                current.insert(stored);
                Ok(version)
            }
            Entry::Vacant(slot) => {
                if !do_create {
                    trace!(key, expected = %item.version, "conditional update on missing key");
                    return Err(Error::VersionMismatch {
                        key: key.to_string(),
                        expected: item.version.clone(),
                        actual: String::new(),
                    });
                }
                let version = self.next_version();
                let mut stored = item.clone();
                stored.version = version.clone();
                slot.insert(stored);
                Ok(version)
            }
        }
    }
}
