//! Object decoding
//!
//! Admission payloads arrive as JSON values. Every failure is wrapped with
//! the kind being decoded.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Decode an already-parsed JSON object into `T`
pub fn decode_object<T: DeserializeOwned>(kind: &str, value: &serde_json::Value) -> Result<T> {
    T::deserialize(value).map_err(|e| Error::Decode {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}
