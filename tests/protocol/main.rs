//! Commit protocol integration tests
//!
//! End-to-end behavior of transactions over in-memory and fault-injecting
//! backends: isolation, conflicts, crash recovery, and version chains.

#[path = "../common/mod.rs"]
mod common;

mod basic;
mod multi_store;
mod recovery;
mod version_chain;
