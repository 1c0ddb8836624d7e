//! Blob metadata structures.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Caller-supplied logical name of the stored file.
pub const IDENTIFIER_KEY: &str = "identifier";
/// Payload length in bytes, decimal.
pub const SIZE_BYTES_KEY: &str = "size-bytes";
/// Lowercase hex SHA-256 over the full payload.
pub const HASH_KEY: &str = "hash-sha256";
/// Hex of the first bytes of the payload.
pub const HEAD_HEX_KEY: &str = "head-hex";
/// Hex of the last bytes of the payload.
pub const TAIL_HEX_KEY: &str = "tail-hex";

/// Opaque identifier of a stored container, as issued by the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ContentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// String tags attached to a payload at write time.
///
/// Metadata is immutable once stored; changing it requires a new store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobMetadata(BTreeMap<String, String>);

impl BlobMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn identifier(&self) -> Option<&str> {
        self.get(IDENTIFIER_KEY)
    }

    pub fn hash(&self) -> Option<&str> {
        self.get(HASH_KEY).filter(|h| !h.is_empty())
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.get(SIZE_BYTES_KEY).and_then(|s| s.parse().ok())
    }

    /// Merges `other` into `self`; keys already present in `self` win.
    pub fn merge_missing(&mut self, other: &BlobMetadata) {
        for (key, value) in other.iter() {
            self.0
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
    }

    /// Merges `other` into `self`; keys from `other` overwrite.
    pub fn merge_over(&mut self, other: &BlobMetadata) {
        for (key, value) in other.iter() {
            self.0.insert(key.to_string(), value.to_string());
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for BlobMetadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// What the caller expects to get back from a retrieve.
///
/// Used to pick the right file out of a multi-file container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl ExpectedMetadata {
    pub fn identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            hash: None,
        }
    }

    pub fn hash(hash: impl Into<String>) -> Self {
        Self {
            identifier: None,
            hash: Some(hash.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.identifier.is_none() && self.hash.is_none()
    }
}
