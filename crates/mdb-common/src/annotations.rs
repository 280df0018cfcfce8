//! Annotation codec for reconciliation state
//!
//! Reconciliation state is persisted as small JSON documents inside resource
//! metadata annotations. This module owns the (de)serialization; it has no
//! state of its own. A missing annotation decodes to `None`, while malformed
//! JSON is a hard error: the two cases drive very different behavior in the
//! state store (migration vs. aborting the pass).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, Result};

/// Return the raw annotation value, if present
pub fn get<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Decode a JSON document stored under the given annotation key.
///
/// Absent key: `Ok(None)`. Malformed JSON: `Error::State`.
pub fn get_json<T: DeserializeOwned>(meta: &ObjectMeta, key: &str) -> Result<Option<T>> {
    match get(meta, key) {
        None => Ok(None),
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| Error::state(key, e.to_string())),
    }
}

/// Encode a value as the JSON annotation payload for the given key
pub fn encode_json<T: Serialize>(key: &str, value: &T) -> Result<(String, String)> {
    let raw = serde_json::to_string(value).map_err(|e| Error::Serialization {
        message: e.to_string(),
        kind: Some(key.to_string()),
    })?;
    Ok((key.to_string(), raw))
}
