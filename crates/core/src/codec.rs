//! Serialization boundary for values and version chains
//!
//! `DataItem.value` and `DataItem.prev` are opaque strings. The codec turns
//! application values and predecessor snapshots into those strings and back.
//!
//! - `Json`: plain JSON text (default)
//! - `MessagePack`: named MessagePack, base64-armored so it fits a string field
//!
//! Swapping the codec never touches protocol logic, but every participant
//! sharing a backend must agree on it.

use crate::error::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Encoding used for values and `Prev` snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// JSON text via serde_json
    #[default]
    Json,
    /// MessagePack via rmp-serde, base64 armored
    #[serde(alias = "msgpack")]
    MessagePack,
}

impl Codec {
    /// Encode a value into its string form
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        match self {
            Codec::Json => Ok(serde_json::to_string(value)?),
            Codec::MessagePack => {
                let bytes = rmp_serde::to_vec_named(value)?;
                Ok(STANDARD.encode(bytes))
            }
        }
    }

    /// Decode a value from its string form
    pub fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T> {
        match self {
            Codec::Json => Ok(serde_json::from_str(text)?),
            Codec::MessagePack => {
                let bytes = STANDARD.decode(text)?;
                Ok(rmp_serde::from_slice(&bytes)?)
            }
        }
    }
}
