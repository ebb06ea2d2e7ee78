//! Transaction factory
//!
//! A factory holds a fixed participant set, the global datastore, and the
//! time source and locker chosen by its [`FactoryConfig`]. Each transaction it
//! produces gets independent copies of every participant, so transactions can
//! run on separate threads without sharing caches.
//!
//! # Example
//!
//! ```
//! use concord_concurrency::TransactionFactory;
//! use concord_core::FactoryConfig;
//! use concord_storage::MemoryConnector;
//! use std::sync::Arc;
//!
//! let backend = Arc::new(MemoryConnector::new());
//! let factory = TransactionFactory::builder(FactoryConfig::default())
//!     .datastore("mem", backend.clone())
//!     .global_datastore("mem", backend)
//!     .build()
//!     .unwrap();
//!
//! let mut txn = factory.new_transaction();
//! txn.start().unwrap();
//! txn.write("mem", "greeting", "hello").unwrap();
//! txn.commit().unwrap();
//! ```

use crate::datastore::Datastore;
use crate::locker::{HttpLocker, Locker, MemoryLocker};
use crate::time::{GlobalTimeSource, LocalTimeSource, TimeSource};
use crate::transaction::Transaction;
use concord_core::{Error, FactoryConfig, Result, SourceType};
use concord_storage::Connector;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Produces transactions over a fixed set of datastores
pub struct TransactionFactory {
    config: FactoryConfig,
    datastores: Vec<Datastore>,
    global: Datastore,
    time_source: Arc<dyn TimeSource>,
    locker: Arc<dyn Locker>,
}

impl std::fmt::Debug for TransactionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionFactory")
            .field("config", &self.config)
            .field(
                "datastores",
                &self.datastores.iter().map(Datastore::name).collect::<Vec<_>>(),
            )
            .field("global", &self.global.name())
            .finish()
    }
}

impl TransactionFactory {
    /// Start configuring a factory
    pub fn builder(config: FactoryConfig) -> TransactionFactoryBuilder {
        TransactionFactoryBuilder::new(config)
    }

    /// Configuration the factory was built with
    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Names of the participants every transaction gets
    pub fn datastore_names(&self) -> Vec<&str> {
        self.datastores.iter().map(Datastore::name).collect()
    }

    /// Create an empty transaction with fresh participant copies
    pub fn new_transaction(&self) -> Transaction {
        let mut txn = Transaction::with_sources(Arc::clone(&self.time_source), Arc::clone(&self.locker));
        for ds in &self.datastores {
            // names were checked unique at build time
            if let Err(e) = txn.add_datastore(ds.copy()) {
                warn!(datastore = ds.name(), error = %e, "skipping participant");
            }
        }
        txn.set_global_datastore(self.global.copy());
        txn
    }
}

/// Builder for [`TransactionFactory`]
pub struct TransactionFactoryBuilder {
    config: FactoryConfig,
    datastores: Vec<(String, Arc<dyn Connector>)>,
    global: Option<(String, Arc<dyn Connector>)>,
    time_source: Option<Arc<dyn TimeSource>>,
    locker: Option<Arc<dyn Locker>>,
}

impl TransactionFactoryBuilder {
    /// Create a builder with no datastores
    pub fn new(config: FactoryConfig) -> Self {
        TransactionFactoryBuilder {
            config,
            datastores: Vec::new(),
            global: None,
            time_source: None,
            locker: None,
        }
    }

    /// Add a participant
    pub fn datastore(mut self, name: impl Into<String>, conn: Arc<dyn Connector>) -> Self {
        self.datastores.push((name.into(), conn));
        self
    }

    /// Set the datastore holding transaction status records
    pub fn global_datastore(mut self, name: impl Into<String>, conn: Arc<dyn Connector>) -> Self {
        self.global = Some((name.into(), conn));
        self
    }

    /// Override the time source selected by the config
    pub fn time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = Some(time_source);
        self
    }

    /// Override the locker selected by the config
    pub fn locker(mut self, locker: Arc<dyn Locker>) -> Self {
        self.locker = Some(locker);
        self
    }

    /// Validate and build the factory
    pub fn build(self) -> Result<TransactionFactory> {
        self.config.validate()?;
        if self.datastores.is_empty() {
            return Err(Error::NoDatastores);
        }
        let (global_name, global_conn) = self.global.ok_or(Error::MissingGlobalDatastore)?;

        let mut seen = HashSet::new();
        for (name, _) in &self.datastores {
            if !seen.insert(name.as_str()) {
                return Err(Error::DuplicateDatastore(name.clone()));
            }
        }

        let url = self.config.oracle_url().unwrap_or_default().to_string();
        let time_source = match self.time_source {
            Some(source) => source,
            None => match self.config.time_oracle_source {
                SourceType::Local => Arc::new(LocalTimeSource::new()) as Arc<dyn TimeSource>,
                SourceType::Global => Arc::new(GlobalTimeSource::new(&url)),
            },
        };
        let locker = match self.locker {
            Some(locker) => locker,
            None => match self.config.locker_source {
                SourceType::Local => Arc::new(MemoryLocker::new()) as Arc<dyn Locker>,
                SourceType::Global => Arc::new(HttpLocker::new(&url)),
            },
        };

        let protocol = self.config.protocol.clone();
        let datastores = self
            .datastores
            .into_iter()
            .map(|(name, conn)| Datastore::with_config(name, conn, protocol.clone()))
            .collect::<Vec<_>>();
        let global = Datastore::with_config(global_name, global_conn, protocol);

        debug!(
            datastores = datastores.len(),
            global = global.name(),
            time_source = ?self.config.time_oracle_source,
            locker = ?self.config.locker_source,
            "transaction factory built"
        );
        Ok(TransactionFactory {
            config: self.config,
            datastores,
            global,
            time_source,
            locker,
        })
    }
}
