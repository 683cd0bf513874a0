//! Pipeline message: opaque payload plus string metadata.

use bytes::Bytes;
use std::collections::HashMap;

/// Metadata key (and HTTP header) carrying the tenant of a message
pub const ORGANIZATION_KEY: &str = "Organization";

/// A message flowing from the ingress bridge to the egress client.
///
/// The payload is never inspected. Metadata keys are unique; iteration order
/// is unspecified.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    payload: Bytes,
    metadata: HashMap<String, String>,
}

impl Message {
    /// Create a message with no metadata
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            metadata: HashMap::new(),
        }
    }

    /// Builder-style metadata insertion
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta_set(key, value);
        self
    }

    /// Set a metadata entry, replacing any previous value
    pub fn meta_set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn meta_get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Iterate over metadata entries
    pub fn meta_iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.metadata
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn meta_len(&self) -> usize {
        self.metadata.len()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Tenant this message belongs to, if tagged
    pub fn organization(&self) -> Option<&str> {
        self.meta_get(ORGANIZATION_KEY)
    }
}
