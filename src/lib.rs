//! # Concord
//!
//! Client-coordinated ACID transactions across independent key-value stores.
//!
//! Backends only need single-key conditional updates. Every record carries
//! its own transaction metadata and an embedded chain of older versions; one
//! status record per transaction, written atomically, is the commit point.
//! Readers that meet records of crashed transactions finish or undo them on
//! the spot.
//!
//! ## Quick Start
//!
//! ```
//! use concord::prelude::*;
//! use std::sync::Arc;
//!
//! let orders = Arc::new(MemoryConnector::new());
//! let stock = Arc::new(MemoryConnector::new());
//!
//! let factory = TransactionFactory::builder(FactoryConfig::default())
//!     .datastore("orders", orders.clone())
//!     .datastore("stock", stock)
//!     .global_datastore("orders", orders)
//!     .build()?;
//!
//! let mut txn = factory.new_transaction();
//! txn.start()?;
//! txn.write("orders", "order:1", &serde_json::json!({"sku": "A1", "qty": 2}))?;
//! txn.write("stock", "A1", &8)?;
//! txn.commit()?;
//!
//! let mut check = factory.new_transaction();
//! check.start()?;
//! assert_eq!(check.read::<i64>("stock", "A1")?, 8);
//! # Ok::<(), concord::Error>(())
//! ```
//!
//! ## Crates
//!
//! - `concord-core`: records, states, errors, codec and configuration
//! - `concord-storage`: the `Connector` contract and in-memory backends
//! - `concord-concurrency`: the commit protocol itself

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod prelude;

pub use concord_concurrency::{Datastore, Transaction, TransactionFactory, TransactionStatus};
pub use concord_core::{Error, Result};
