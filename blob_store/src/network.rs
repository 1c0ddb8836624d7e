//! Seam between the client and the storage network.
//!
//! The client only ever talks to the network through [`StorageNetwork`], so
//! the HTTP implementation can be swapped for an in-memory one in tests.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::metadata::{BlobMetadata, ContentId};

/// Storage duration and deletability requested for one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageConfiguration {
    /// Number of storage epochs to pay for.
    pub epochs: u32,
    /// Whether the owner may delete the blob before it expires.
    pub deletable: bool,
}

impl std::fmt::Display for StorageConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} epoch(s), {}",
            self.epochs,
            if self.deletable { "deletable" } else { "permanent" }
        )
    }
}

/// A single-file container write.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub identifier: String,
    pub payload: Bytes,
    /// Stored alongside the file as its tags.
    pub metadata: BlobMetadata,
    pub configuration: StorageConfiguration,
    /// Address that should own the resulting blob object.
    pub send_object_to: Option<String>,
}

/// What the network hands back after a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub content_id: ContentId,
    /// Id of the file within the container, when reported.
    pub entry_id: Option<String>,
    /// False when the network already held a certified copy.
    pub newly_created: bool,
}

/// One file listed inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    pub identifier: String,
    pub entry_id: String,
    pub tags: BlobMetadata,
}

/// Raw failure of a single network call, before classification.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NetworkError {
    #[error("request to {endpoint} timed out after {elapsed:?}")]
    Timeout { endpoint: String, elapsed: Duration },

    #[error("could not connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    #[error("storage network responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected storage network response: {message}")]
    Protocol { message: String },
}

impl NetworkError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, NetworkError::Status { status: 404, .. })
    }

    /// Text the classifier matches protocol-level phrases against.
    pub fn detail(&self) -> &str {
        match self {
            NetworkError::Timeout { .. } => "",
            NetworkError::Connect { message, .. } => message,
            NetworkError::Status { body, .. } => body,
            NetworkError::Protocol { message } => message,
        }
    }
}

/// Operations the client needs from the storage network.
#[async_trait]
pub trait StorageNetwork: Send + Sync {
    /// Measures round-trip latency to an access point.
    async fn probe(&self, endpoint: &str) -> Result<Duration, NetworkError>;

    /// Writes a container directly through a publisher.
    async fn put_container(
        &self,
        publisher: &str,
        request: &WriteRequest,
    ) -> Result<WriteReceipt, NetworkError>;

    /// Writes a container through the upload relay, offering at most `tip`.
    async fn put_container_via_relay(
        &self,
        relay: &str,
        request: &WriteRequest,
        tip: Option<u64>,
    ) -> Result<WriteReceipt, NetworkError>;

    /// Lists the files stored in a container.
    async fn list_container(
        &self,
        aggregator: &str,
        content_id: &ContentId,
    ) -> Result<Vec<ContainerEntry>, NetworkError>;

    /// Reads one listed file by its entry id.
    async fn read_entry(&self, aggregator: &str, entry_id: &str) -> Result<Bytes, NetworkError>;

    /// Reads a file out of a container by its identifier.
    async fn read_by_identifier(
        &self,
        aggregator: &str,
        content_id: &ContentId,
        identifier: &str,
    ) -> Result<Bytes, NetworkError>;

    /// Reads the stored bytes as a single blob, ignoring container structure.
    async fn read_raw(&self, aggregator: &str, content_id: &ContentId)
        -> Result<Bytes, NetworkError>;
}
