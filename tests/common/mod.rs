//! Shared test utilities for protocol integration tests
//!
//! Provides a deterministic environment: one in-memory backend holding both
//! data and status records, and a counter clock shared by every transaction.

#![allow(dead_code)]

pub use concord::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::sync::Arc;

use chrono::Utc;
use std::sync::Once;

/// Datastore name used by [`TestEnv`]
pub const DS: &str = "mem";

static TRACING: Once = Once::new();

/// Route protocol logs to the test harness output
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::WARN)
            .try_init();
    });
}

/// Application value used across scenarios
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub age: u32,
}

impl Person {
    pub fn new(name: &str, age: u32) -> Self {
        Person {
            name: name.to_string(),
            age,
        }
    }
}

/// Single-backend test environment
pub struct TestEnv {
    pub backend: Arc<MemoryConnector>,
    pub clock: Arc<CounterTimeSource>,
    pub factory: TransactionFactory,
    pub protocol: ProtocolConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_protocol(ProtocolConfig::default())
    }

    pub fn with_protocol(protocol: ProtocolConfig) -> Self {
        init_tracing();
        let backend = Arc::new(MemoryConnector::new());
        let clock = Arc::new(CounterTimeSource::new());
        let factory = TransactionFactory::builder(
            FactoryConfig::default().with_protocol(protocol.clone()),
        )
        .datastore(DS, backend.clone())
        .global_datastore(DS, backend.clone())
        .time_source(clock.clone())
        .build()
        .expect("test factory should build");
        TestEnv {
            backend,
            clock,
            factory,
            protocol,
        }
    }

    /// A started transaction
    pub fn begin(&self) -> Transaction {
        let mut txn = self.factory.new_transaction();
        txn.start().expect("start should succeed");
        txn
    }

    /// Commit `key = value` in its own transaction
    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let mut txn = self.begin();
        txn.write(DS, key, value).expect("write should succeed");
        txn.commit().expect("commit should succeed");
    }

    /// Read `key` in its own transaction
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T> {
        let mut txn = self.begin();
        txn.read(DS, key)
    }

    /// Current item stored in the backend
    pub fn stored(&self, key: &str) -> DataItem {
        self.backend
            .get_item(key)
            .expect("backend read should succeed")
            .expect("item should exist")
    }

    /// Replace the current item of `key` with a PREPARED version holding
    /// `value`, linked to the current item; returns the owning transaction
    pub fn seed_prepared<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        lease_expired: bool,
    ) -> TxnId {
        let owner = TxnId::new();
        let codec = self.protocol.codec;
        let mut item = DataItem::new(key, codec.encode(value).unwrap(), owner);
        item.txn_state = TxnState::Prepared;
        item.t_valid = self.clock.now().unwrap();
        item.t_lease = if lease_expired {
            Utc::now() - chrono::Duration::seconds(1)
        } else {
            Utc::now() + chrono::Duration::seconds(60)
        };
        if let Some(current) = self.backend.get_item(key).unwrap() {
            item.prev = codec.encode(&current).unwrap();
            item.linked_len = current.linked_len + 1;
        }
        self.backend.put_item(key, &item).unwrap();
        owner
    }

    /// Record a verdict for `txn_id`
    pub fn set_verdict(&self, txn_id: TxnId, state: TxnState) {
        self.backend
            .put(&txn_id.tsr_key(), state.as_str())
            .expect("status record write should succeed");
    }

    /// Recorded verdict for `txn_id`
    pub fn verdict(&self, txn_id: TxnId) -> Option<TxnState> {
        self.backend
            .get(&txn_id.tsr_key())
            .unwrap()
            .map(|s| s.parse().unwrap())
    }
}
