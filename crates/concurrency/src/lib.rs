//! Commit protocol for Concord
//!
//! This crate coordinates ACID transactions across backends that only offer
//! single-key conditional updates:
//! - [`Transaction`]: coordinator, owns the commit point
//! - [`Datastore`]: per-backend participant with read and write caches
//! - [`chain`]: embedded version chains and snapshot visibility
//! - [`TransactionFactory`]: builds transactions from a validated config
//! - [`TimeSource`] and [`Locker`]: pluggable clocks and advisory locks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod datastore;
pub mod factory;
pub mod locker;
pub mod time;
pub mod transaction;

pub use datastore::{Datastore, TxnContext};
pub use factory::{TransactionFactory, TransactionFactoryBuilder};
pub use locker::{HttpLocker, Locker, MemoryLocker};
pub use time::{CounterTimeSource, GlobalTimeSource, HybridTimeSource, LocalTimeSource, TimeSource};
pub use transaction::{Transaction, TransactionStatus};
