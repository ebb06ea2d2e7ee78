//! Backend contract
//!
//! A connector exposes two keyspaces over one backend:
//! - raw string values (`get` / `put` / `atomic_create` / `delete`), used for
//!   transaction status records
//! - [`DataItem`] records (`get_item` / `put_item` / `conditional_update`),
//!   used for versioned application data
//!
//! `delete` removes the key from both.
//!
//! # Version tokens
//!
//! Every stored item carries an opaque `version` string owned by the backend.
//! `put_item` and `conditional_update` return the new token; callers must
//! treat it as opaque and only compare it for equality.

use concord_core::{DataItem, Result};
use std::sync::Arc;

/// Synchronous key-value backend
///
/// Implementations must be safe to share between threads; every call blocks
/// until the backend answers.
pub trait Connector: Send + Sync {
    /// Establish the backend connection
    ///
    /// Called once per transaction start; must be idempotent.
    fn connect(&self) -> Result<()>;

    /// Read a raw value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a raw value unconditionally
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Write a raw value only if the key is absent
    ///
    /// Returns `None` when the value was stored, or the value already present
    /// otherwise. Must be atomic with respect to other callers.
    fn atomic_create(&self, key: &str, value: &str) -> Result<Option<String>>;

    /// Remove a key; removing an absent key is not an error
    fn delete(&self, key: &str) -> Result<()>;

    /// Read the current item stored under `key`
    fn get_item(&self, key: &str) -> Result<Option<DataItem>>;

    /// Store an item unconditionally and return its new version
    fn put_item(&self, key: &str, item: &DataItem) -> Result<String>;

    /// Store an item if the stored version matches and return its new version
    ///
    /// With `do_create` the key must not exist. Otherwise the stored item's
    /// version must equal `item.version`. Any other state fails with
    /// [`concord_core::Error::VersionMismatch`] and leaves the backend
    /// untouched.
    fn conditional_update(&self, key: &str, item: &DataItem, do_create: bool) -> Result<String>;
}

impl<C: Connector + ?Sized> Connector for Arc<C> {
    fn connect(&self) -> Result<()> {
        (**self).connect()
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        (**self).put(key, value)
    }

    fn atomic_create(&self, key: &str, value: &str) -> Result<Option<String>> {
        (**self).atomic_create(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn get_item(&self, key: &str) -> Result<Option<DataItem>> {
        (**self).get_item(key)
    }

    fn put_item(&self, key: &str, item: &DataItem) -> Result<String> {
        (**self).put_item(key, item)
    }

    fn conditional_update(&self, key: &str, item: &DataItem, do_create: bool) -> Result<String> {
        (**self).conditional_update(key, item, do_create)
    }
}
