//! Backend adapters for Concord
//!
//! This crate defines the [`Connector`] contract every key-value backend
//! implements, plus two implementations:
//! - [`MemoryConnector`]: DashMap-backed store with atomic conditional updates
//! - [`FaultyConnector`]: wraps any connector to inject failures and latency
//!
//! The commit protocol never touches a backend except through `Connector`, and
//! only relies on per-key atomicity of `conditional_update` and
//! `atomic_create`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connector;
pub mod fault;
pub mod memory;

pub use connector::Connector;
pub use fault::FaultyConnector;
pub use memory::MemoryConnector;
