//! Convenient imports for Concord.
//!
//! ```
//! use concord::prelude::*;
//!
//! let config = FactoryConfig::default();
//! assert_eq!(config.protocol.max_record_length, 2);
//! ```

// Coordinator and participants
pub use concord_concurrency::{
    Datastore, Transaction, TransactionFactory, TransactionFactoryBuilder, TransactionStatus,
};

// Clocks and locks
pub use concord_concurrency::{
    CounterTimeSource, HybridTimeSource, LocalTimeSource, Locker, MemoryLocker, TimeSource,
};

// Backends
pub use concord_storage::{Connector, FaultyConnector, MemoryConnector};

// Core types
pub use concord_core::{
    Codec, DataItem, Error, FactoryConfig, ProtocolConfig, Result, SourceType, Timestamp, TxnId,
    TxnState,
};
