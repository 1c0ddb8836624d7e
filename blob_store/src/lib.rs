//! Resilient blob storage client for the Walrus storage network.
//!
//! Payloads are opaque bytes (usually ciphertext). Every store tags the
//! payload with a fingerprint (size, SHA-256, head and tail samples) so that a
//! later retrieve can tell good bytes from bad ones, whichever read path they
//! came from.
//!
//! # Architecture
//!
//! - [`BlobStorageClient`] is the facade callers use.
//! - Stores go through an upload coordinator that walks a schedule of storage
//!   configurations, prefers the upload relay while it is healthy, classifies
//!   every failure and backs off between attempts.
//! - Retrieves go through an ordered list of [`RetrievalStrategy`]s. The first
//!   candidate that validates against its fingerprint is returned; when none
//!   does, the first non-empty one comes back flagged
//!   [`Verification::Unverified`].
//! - All network access goes through the [`StorageNetwork`] trait.
//!   [`HttpStorageNetwork`] implements it over the Walrus HTTP API.
//!
//! # Usage
//!
//! ```rust,no_run
//! use blob_store::{BlobClientConfig, BlobMetadata, BlobStorageClient, ExpectedMetadata};
//! use bytes::Bytes;
//!
//! # async fn example() -> Result<(), blob_store::BlobError> {
//! let client = BlobStorageClient::with_http(BlobClientConfig::default())?;
//!
//! let metadata = BlobMetadata::new().with("identifier", "img_42");
//! let content_id = client.store(Bytes::from_static(b"ciphertext"), metadata).await?;
//!
//! let blob = client
//!     .retrieve(&content_id, Some(ExpectedMetadata::identifier("img_42")))
//!     .await?;
//! assert!(blob.verification.is_trusted());
//! # Ok(())
//! # }
//! ```

mod classifier;
mod client;
mod codec;
mod config;
mod error;
mod http;
mod metadata;
mod metrics;
mod network;
mod prober;
mod relay;
mod retrieval;
mod upload;

#[cfg(test)]
mod integration_test;
#[cfg(test)]
mod testing;

pub use classifier::{classify, required_amount, ErrorClass, Operation, OperationContext};
pub use client::{BlobStorageClient, SelectedEndpoints};
pub use codec::{fingerprint, repair, sha256_hex, validate, FINGERPRINT_SAMPLE_BYTES};
pub use config::{
    BlobClientConfig,
    RelayConfig,
    TimeoutConfig,
    UploadConfig,
    VerificationConfig,
};
pub use error::{BlobError, BlobResult};
pub use http::HttpStorageNetwork;
pub use metadata::{
    BlobMetadata,
    ContentId,
    ExpectedMetadata,
    HASH_KEY,
    HEAD_HEX_KEY,
    IDENTIFIER_KEY,
    SIZE_BYTES_KEY,
    TAIL_HEX_KEY,
};
pub use metrics::{BlobMetrics, OperationTimer};
pub use network::{
    ContainerEntry,
    NetworkError,
    StorageConfiguration,
    StorageNetwork,
    WriteReceipt,
    WriteRequest,
};
pub use prober::{EndpointProber, SelectedEndpoint};
pub use relay::RelayManager;
pub use retrieval::{
    default_strategies,
    ContainerListing,
    FileByIdentifier,
    RawBlobRead,
    RetrievalCandidate,
    RetrievalStrategy,
    RetrievedBlob,
    StrategyContext,
    Verification,
};
pub use upload::{
    configurations_for_attempt,
    decide,
    SignerContext,
    StoredBlob,
    UploadAttempt,
    UploadDecision,
};
