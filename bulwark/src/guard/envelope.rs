//! Wire format of guarded cache entries.
//!
//! Every entry the guard writes is a JSON envelope, either
//! `{"value": <payload>}` or the string `"absent"` (the null marker). The
//! marker and a real value therefore never share a representation, and a plain
//! miss is simply no entry at all.

use std::sync::Arc;

use bulwark_core::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Envelope<T> {
    Value(T),
    Absent,
}

/// What a store read resolved to.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Lookup<T> {
    /// A real value.
    Hit(T),
    /// The null marker: confirmed absent.
    Null,
    /// Nothing usable is stored.
    Miss,
}

pub(crate) fn encode_value<T: Serialize>(value: &T) -> Result<Bytes, Arc<serde_json::Error>> {
    serde_json::to_vec(&Envelope::Value(value))
        .map(Bytes::from)
        .map_err(Arc::new)
}

pub(crate) fn encode_null() -> Bytes {
    Bytes::from_static(b"\"absent\"")
}

pub(crate) fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<Lookup<T>, serde_json::Error> {
    Ok(match serde_json::from_slice::<Envelope<T>>(raw)? {
        Envelope::Value(value) => Lookup::Hit(value),
        Envelope::Absent => Lookup::Null,
    })
}
