//! JSON encoding of inter-node messages.
//!
//! In-process hops encode every message and decode it on the receiving side,
//! so wire types are exercised exactly as they are on a socket. Socket
//! traffic carries one JSON document per line.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::TransportError;

/// Encode a message into bytes.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, TransportError> {
    Ok(serde_json::to_vec(message)?)
}

/// Encode a message as one newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, TransportError> {
    let mut bytes = encode(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode a message from bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TransportError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode then decode, producing the value the receiving node would see.
pub fn transfer<T: Serialize + DeserializeOwned>(message: &T) -> Result<T, TransportError> {
    decode(&encode(message)?)
}
