//! Encoding of structured records to and from storable values.
//!
//! Payloads are stored as protobuf bytes. Structured identifiers are stored as
//! compact JSON text so they stay comparable inside the database.

use prost::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encode a protobuf message to bytes.
pub fn encode<M: Message>(message: &M) -> Vec<u8> {
    message.encode_to_vec()
}

/// Decode a protobuf message from bytes.
pub fn decode<M: Message + Default>(bytes: &[u8]) -> Result<M> {
    Ok(M::decode(bytes)?)
}

/// Encode a value to JSON without insignificant whitespace.
///
/// The output is deterministic for a given value, which is what makes it
/// usable as a lookup key.
pub fn to_compact_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a value from its JSON text.
pub fn from_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    Ok(serde_json::from_str(json)?)
}
