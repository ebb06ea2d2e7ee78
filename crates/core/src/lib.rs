//! Core types for Concord
//!
//! This crate defines the data model shared by every backend adapter:
//! - [`DataItem`]: one version of one key, embedding its predecessor
//! - [`TxnState`]: state of an item or of a transaction status record
//! - [`TxnId`] and [`Timestamp`]: transaction identity and logical time
//! - [`Codec`]: the serialization boundary for values and version chains
//! - [`ProtocolConfig`] and [`FactoryConfig`]: protocol and factory settings
//! - [`Error`]: the error taxonomy of the commit protocol

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod error;
pub mod item;
pub mod types;

pub use codec::Codec;
pub use config::{FactoryConfig, ProtocolConfig, SourceType};
pub use error::{Error, Result};
pub use item::DataItem;
pub use types::{Timestamp, TxnId, TxnState};
