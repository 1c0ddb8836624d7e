//! Error types for blob client operations.

use crate::{classifier::ErrorClass, metadata::ContentId};

/// Result type for blob client operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Terminal failures surfaced to callers of the blob client.
///
/// Transient node, network and relay faults are retried internally and only
/// show up here, as `StorageUnavailable`, once retries are exhausted.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BlobError {
    #[error(
        "insufficient balance to pay for storage{}. {}",
        required.as_ref().map(|r| format!(" (required: {r})")).unwrap_or_default(),
        hint
    )]
    BalanceInsufficient {
        required: Option<String>,
        hint: String,
    },

    #[error(
        "storage network unavailable after {} attempt(s), last failure was {}: {}{}",
        attempts,
        class,
        reason,
        hint.as_ref().map(|h| format!(". {h}")).unwrap_or_default()
    )]
    StorageUnavailable {
        class: ErrorClass,
        attempts: u32,
        reason: String,
        hint: Option<String>,
    },

    #[error("content {} was not found on the storage network", content_id)]
    NotFound { content_id: ContentId },

    #[error("store failed permanently: {}", reason)]
    FatalStore { reason: String },

    #[error(
        "retrieved bytes do not match the recorded hash. expected: {}, actual: {}",
        expected,
        actual
    )]
    IntegrityMismatch { expected: String, actual: String },

    #[error(
        "deleting {} is not supported; stored data only expires with its storage epochs",
        content_id
    )]
    DeletionUnsupported { content_id: ContentId },

    #[error("operation cancelled")]
    Cancelled,
}

impl BlobError {
    /// Machine-distinguishable error class.
    pub fn class(&self) -> &'static str {
        match self {
            BlobError::BalanceInsufficient { .. } => "balance-insufficient",
            BlobError::StorageUnavailable { .. } => "storage-unavailable",
            BlobError::NotFound { .. } => "not-found",
            BlobError::FatalStore { .. } => "fatal",
            BlobError::IntegrityMismatch { .. } => "integrity-mismatch",
            BlobError::DeletionUnsupported { .. } => "deletion-unsupported",
            BlobError::Cancelled => "cancelled",
        }
    }

    /// Remediation hint, where one exists.
    pub fn hint(&self) -> Option<&str> {
        match self {
            BlobError::BalanceInsufficient { hint, .. } => Some(hint),
            BlobError::StorageUnavailable { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }

    /// Whether retrying the whole operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BlobError::StorageUnavailable { .. })
    }
}
