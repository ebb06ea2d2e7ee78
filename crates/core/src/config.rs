//! Protocol and factory configuration
//!
//! [`ProtocolConfig`] travels with every datastore and controls chain length,
//! prepare lease and value encoding. [`FactoryConfig`] adds the choice of time
//! source and locker, and is validated once when a factory is built.
//!
//! # Example
//!
//! ```
//! use concord_core::config::{FactoryConfig, SourceType};
//!
//! let config = FactoryConfig::from_toml_str(r#"
//!     time_oracle_source = "LOCAL"
//!     locker_source = "LOCAL"
//!
//!     [protocol]
//!     max_record_length = 4
//!     lease_time_ms = 500
//! "#).unwrap();
//!
//! assert_eq!(config.time_oracle_source, SourceType::Local);
//! assert_eq!(config.protocol.max_record_length, 4);
//! ```

use crate::codec::Codec;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of versions retained per key
pub const DEFAULT_MAX_RECORD_LENGTH: usize = 2;

/// Default prepare lease in milliseconds
pub const DEFAULT_LEASE_TIME_MS: u64 = 1000;

/// Where timestamps or locks come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceType {
    /// In-process
    #[default]
    Local,
    /// Shared HTTP service
    Global,
}

/// Settings consumed by the commit protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Maximum versions kept in a chain, current item included
    pub max_record_length: usize,
    /// How long a prepared record is protected from recovery
    pub lease_time_ms: u64,
    /// Encoding for values and `Prev` snapshots
    pub codec: Codec,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            max_record_length: DEFAULT_MAX_RECORD_LENGTH,
            lease_time_ms: DEFAULT_LEASE_TIME_MS,
            codec: Codec::Json,
        }
    }
}

impl ProtocolConfig {
    /// Set the chain bound
    pub fn with_max_record_length(mut self, len: usize) -> Self {
        self.max_record_length = len;
        self
    }

    /// Set the prepare lease
    pub fn with_lease_time(mut self, lease: Duration) -> Self {
        self.lease_time_ms = lease.as_millis() as u64;
        self
    }

    /// Set the codec
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Prepare lease as a duration
    pub fn lease_time(&self) -> Duration {
        Duration::from_millis(self.lease_time_ms)
    }

    /// Reject settings the protocol cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_record_length == 0 {
            return Err(Error::InvalidConfig(
                "max_record_length must be at least 1".to_string(),
            ));
        }
        if self.lease_time_ms == 0 {
            return Err(Error::InvalidConfig(
                "lease_time_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for a transaction factory
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// Time source for start and commit timestamps
    pub time_oracle_source: SourceType,
    /// Locker used by `Transaction::lock`
    pub locker_source: SourceType,
    /// Base URL of the oracle/locker service, required by any GLOBAL source
    pub oracle_url: Option<String>,
    /// Protocol settings handed to every datastore
    pub protocol: ProtocolConfig,
}

impl FactoryConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Use the shared oracle at `url` for both timestamps and locks
    pub fn global(url: impl Into<String>) -> Self {
        FactoryConfig {
            time_oracle_source: SourceType::Global,
            locker_source: SourceType::Global,
            oracle_url: Some(url.into()),
            protocol: ProtocolConfig::default(),
        }
    }

    /// Replace the protocol settings
    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    /// Oracle URL, if configured and non-empty
    pub fn oracle_url(&self) -> Option<&str> {
        self.oracle_url.as_deref().filter(|url| !url.is_empty())
    }

    /// Validate the combination of sources and protocol settings
    pub fn validate(&self) -> Result<()> {
        self.protocol.validate()?;

        let needs_url = self.time_oracle_source == SourceType::Global
            || self.locker_source == SourceType::Global;
        if needs_url && self.oracle_url().is_none() {
            return Err(Error::InvalidConfig("oracle_url is empty".to_string()));
        }
        if self.time_oracle_source == SourceType::Global && self.locker_source != SourceType::Global
        {
            return Err(Error::InvalidConfig(
                "locker_source must be GLOBAL when using a global time oracle".to_string(),
            ));
        }
        Ok(())
    }
}
