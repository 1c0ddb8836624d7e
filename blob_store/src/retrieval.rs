//! Retrieve orchestration.
//!
//! Strategies are independent ways of reading a container back. They run in
//! order; the first candidate that validates against its fingerprint wins.
//! Reads never go through the upload relay.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vault_utils::unwrap_or_continue;

use crate::{
    classifier::{self, ErrorClass, OperationContext},
    codec,
    config::BlobClientConfig,
    metadata::{BlobMetadata, ContentId, ExpectedMetadata, HASH_KEY, IDENTIFIER_KEY},
    metrics::BlobMetrics,
    network::{NetworkError, StorageNetwork},
    prober::SelectedEndpoint,
    upload::with_deadline,
    BlobError,
    BlobResult,
};

/// Bytes obtained by one strategy, with the metadata it recovered.
#[derive(Debug, Clone)]
pub struct RetrievalCandidate {
    pub bytes: Bytes,
    pub metadata: BlobMetadata,
    pub strategy: &'static str,
}

/// How the returned payload relates to its recorded fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Hash recorded and matched.
    Verified,
    /// Hash matched after rewriting boundary bytes from the fingerprint.
    Repaired,
    /// No hash was ever recorded; nothing to check.
    Unrecorded,
    /// Best-effort fallback: a hash was recorded and did not match.
    Unverified { expected: String, actual: String },
}

impl Verification {
    pub fn is_trusted(&self) -> bool {
        matches!(self, Verification::Verified | Verification::Repaired)
    }
}

/// Payload returned from a retrieve.
#[derive(Debug, Clone)]
pub struct RetrievedBlob {
    pub payload: Bytes,
    pub metadata: BlobMetadata,
    pub verification: Verification,
    pub strategy: &'static str,
}

/// Everything a strategy needs to read one container.
pub struct StrategyContext<'a> {
    pub network: &'a dyn StorageNetwork,
    pub aggregator: &'a str,
    pub content_id: &'a ContentId,
    pub expected: &'a ExpectedMetadata,
    pub read_timeout: Duration,
}

impl StrategyContext<'_> {
    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, NetworkError>>,
    ) -> Result<T, NetworkError> {
        with_deadline(self.aggregator, self.read_timeout, call).await
    }
}

/// One way of reading a container back.
#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the strategy can run given what the caller expects.
    fn applies(&self, _expected: &ExpectedMetadata) -> bool {
        true
    }

    /// Returns zero or more candidates. An empty list means the strategy did
    /// not apply or found nothing; an error means the read itself failed.
    async fn fetch(&self, ctx: &StrategyContext<'_>)
        -> Result<Vec<RetrievalCandidate>, NetworkError>;
}

/// Lists the container and reads its files.
pub struct ContainerListing;

#[async_trait]
impl RetrievalStrategy for ContainerListing {
    fn name(&self) -> &'static str {
        "container-listing"
    }

    async fn fetch(
        &self,
        ctx: &StrategyContext<'_>,
    ) -> Result<Vec<RetrievalCandidate>, NetworkError> {
        let entries = ctx
            .bounded(ctx.network.list_container(ctx.aggregator, ctx.content_id))
            .await?;
        debug!(content_id = %ctx.content_id, entries = entries.len(), "listed container");

        // Only read the named file when the listing already identifies it.
        let named: Vec<_> = match &ctx.expected.identifier {
            Some(wanted) => entries.iter().filter(|e| &e.identifier == wanted).collect(),
            None => Vec::new(),
        };
        let to_read = if named.is_empty() {
            entries.iter().collect()
        } else {
            named
        };

        let mut candidates = Vec::with_capacity(to_read.len());
        let mut last_error = None;
        for entry in to_read {
            match ctx
                .bounded(ctx.network.read_entry(ctx.aggregator, &entry.entry_id))
                .await
            {
                Ok(bytes) => {
                    let mut metadata = entry.tags.clone();
                    metadata.insert(IDENTIFIER_KEY, entry.identifier.clone());
                    candidates.push(RetrievalCandidate {
                        bytes,
                        metadata,
                        strategy: self.name(),
                    });
                }
                Err(err) => {
                    warn!(entry = %entry.entry_id, %err, "failed to read container entry");
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) if candidates.is_empty() => Err(err),
            _ => Ok(candidates),
        }
    }
}

/// Reads a file out of the container by the identifier the caller expects.
pub struct FileByIdentifier;

#[async_trait]
impl RetrievalStrategy for FileByIdentifier {
    fn name(&self) -> &'static str {
        "file-by-identifier"
    }

    fn applies(&self, expected: &ExpectedMetadata) -> bool {
        expected.identifier.is_some()
    }

    async fn fetch(
        &self,
        ctx: &StrategyContext<'_>,
    ) -> Result<Vec<RetrievalCandidate>, NetworkError> {
        let Some(identifier) = &ctx.expected.identifier else {
            return Ok(Vec::new());
        };
        let bytes = ctx
            .bounded(
                ctx.network
                    .read_by_identifier(ctx.aggregator, ctx.content_id, identifier),
            )
            .await?;
        Ok(vec![RetrievalCandidate {
            bytes,
            metadata: BlobMetadata::new().with(IDENTIFIER_KEY, identifier.clone()),
            strategy: self.name(),
        }])
    }
}

/// Reads the content id as one plain blob.
pub struct RawBlobRead;

#[async_trait]
impl RetrievalStrategy for RawBlobRead {
    fn name(&self) -> &'static str {
        "raw-blob"
    }

    async fn fetch(
        &self,
        ctx: &StrategyContext<'_>,
    ) -> Result<Vec<RetrievalCandidate>, NetworkError> {
        let bytes = ctx
            .bounded(ctx.network.read_raw(ctx.aggregator, ctx.content_id))
            .await?;
        Ok(vec![RetrievalCandidate {
            bytes,
            metadata: BlobMetadata::new(),
            strategy: self.name(),
        }])
    }
}

pub fn default_strategies() -> Vec<Box<dyn RetrievalStrategy>> {
    vec![
        Box::new(ContainerListing),
        Box::new(FileByIdentifier),
        Box::new(RawBlobRead),
    ]
}

const SCORE_IDENTIFIER: u32 = 100;
const SCORE_HASH: u32 = 90;
const SCORE_SELF_VALIDATED: u32 = 50;

/// Scores a candidate against what the caller expects.
pub fn score(candidate: &RetrievalCandidate, expected: &ExpectedMetadata) -> u32 {
    if let (Some(wanted), Some(found)) = (&expected.identifier, candidate.metadata.identifier()) {
        if wanted == found {
            return SCORE_IDENTIFIER;
        }
    }
    if let Some(wanted) = &expected.hash {
        let recorded = candidate
            .metadata
            .hash()
            .is_some_and(|h| h.eq_ignore_ascii_case(wanted));
        if recorded || codec::sha256_hex(&candidate.bytes).eq_ignore_ascii_case(wanted) {
            return SCORE_HASH;
        }
    }
    if expected.is_empty() {
        let self_valid = candidate
            .metadata
            .hash()
            .map_or(true, |h| codec::sha256_hex(&candidate.bytes).eq_ignore_ascii_case(h));
        if self_valid {
            return SCORE_SELF_VALIDATED;
        }
    }
    0
}

/// Whether the candidate's own metadata names a different file than the
/// caller asked for.
fn contradicts(candidate: &RetrievalCandidate, expected: &ExpectedMetadata) -> bool {
    let other_identifier = matches!(
        (&expected.identifier, candidate.metadata.identifier()),
        (Some(wanted), Some(found)) if wanted != found
    );
    let other_hash = matches!(
        (&expected.hash, candidate.metadata.hash()),
        (Some(wanted), Some(found)) if !wanted.eq_ignore_ascii_case(found)
    );
    other_identifier || other_hash
}

/// Picks the best candidate a strategy produced.
///
/// A lone candidate is kept unless it meets none of the caller's
/// expectations and its metadata names another file. Among several, the
/// highest score wins and ties go to the earlier one. When the caller had
/// expectations and no candidate meets any of them, the container is
/// ambiguous and nothing is picked.
pub fn select_candidate(
    candidates: Vec<RetrievalCandidate>,
    expected: &ExpectedMetadata,
) -> Option<RetrievalCandidate> {
    if candidates.len() <= 1 {
        let candidate = candidates.into_iter().next()?;
        if !expected.is_empty()
            && score(&candidate, expected) == 0
            && contradicts(&candidate, expected)
        {
            warn!(
                identifier = ?candidate.metadata.identifier(),
                expected = ?expected,
                "only container entry is a different file"
            );
            return None;
        }
        return Some(candidate);
    }
    let total = candidates.len();
    let mut best: Option<(u32, RetrievalCandidate)> = None;
    for candidate in candidates {
        let s = score(&candidate, expected);
        if best.as_ref().map_or(true, |(top, _)| s > *top) {
            best = Some((s, candidate));
        }
    }
    match best {
        Some((0, _)) if !expected.is_empty() => {
            warn!(
                candidates = total,
                expected = ?expected,
                "no container entry matches the expected metadata"
            );
            None
        }
        Some((s, candidate)) => {
            debug!(candidates = total, score = s, "picked container entry");
            Some(candidate)
        }
        None => None,
    }
}

fn expected_fingerprint(expected: &ExpectedMetadata) -> BlobMetadata {
    let mut metadata = BlobMetadata::new();
    if let Some(hash) = expected.hash.as_deref().filter(|h| !h.is_empty()) {
        metadata.insert(HASH_KEY, hash);
    }
    metadata
}

pub struct RetrievalStrategyEngine<'a> {
    pub network: &'a dyn StorageNetwork,
    pub aggregators: &'a SelectedEndpoint,
    pub config: &'a BlobClientConfig,
    pub metrics: Option<&'a BlobMetrics>,
    pub strategies: &'a [Box<dyn RetrievalStrategy>],
}

impl RetrievalStrategyEngine<'_> {
    pub async fn retrieve(
        &self,
        content_id: &ContentId,
        expected: &ExpectedMetadata,
        cancel: &CancellationToken,
    ) -> BlobResult<RetrievedBlob> {
        // A hash from the caller is what every candidate is checked against.
        let mut recovered = expected_fingerprint(expected);
        let mut fingerprint_found = false;
        let mut fallback: Option<RetrievalCandidate> = None;
        let mut last_failure: Option<(ErrorClass, NetworkError)> = None;
        let mut answered = false;
        let mut executed = 0u32;

        for strategy in self.strategies {
            if cancel.is_cancelled() {
                return Err(BlobError::Cancelled);
            }
            if !strategy.applies(expected) {
                continue;
            }
            executed += 1;
            let aggregator = self.aggregators.current(self.network).await;
            let ctx = StrategyContext {
                network: self.network,
                aggregator: &aggregator,
                content_id,
                expected,
                read_timeout: self.config.timeouts.read(),
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(BlobError::Cancelled),
                result = strategy.fetch(&ctx) => result,
            };
            let candidates = match result {
                Ok(candidates) => {
                    answered = true;
                    candidates
                }
                Err(err) => {
                    let class = classifier::classify(&err, OperationContext::retrieval(executed));
                    warn!(
                        content_id = %content_id,
                        strategy = strategy.name(),
                        class = %class,
                        error = %err,
                        "retrieval strategy failed"
                    );
                    if let Some(metrics) = self.metrics {
                        metrics.record_error("retrieve", class.as_str());
                    }
                    if class.suggests_reprobe() {
                        self.aggregators.reprobe(self.network).await;
                    }
                    last_failure = Some((class, err));
                    continue;
                }
            };

            let mut candidate = unwrap_or_continue!(select_candidate(candidates, expected));
            if !fingerprint_found && candidate.metadata.hash().is_some() {
                recovered = candidate.metadata.clone();
                recovered.merge_over(&expected_fingerprint(expected));
                fingerprint_found = true;
            }
            candidate.metadata.merge_over(&recovered);

            match self.verify(candidate) {
                Ok(blob) => {
                    info!(
                        content_id = %content_id,
                        strategy = blob.strategy,
                        verification = ?blob.verification,
                        size_bytes = blob.payload.len(),
                        "blob retrieved"
                    );
                    return Ok(blob);
                }
                Err(rejected) => {
                    if fallback.is_none() && !rejected.bytes.is_empty() {
                        fallback = Some(rejected);
                    }
                }
            }
        }

        if let Some(candidate) = fallback {
            return self.unverified(content_id, candidate);
        }
        Err(match last_failure {
            Some((class, err)) if class.is_retryable() => BlobError::StorageUnavailable {
                class,
                attempts: executed,
                reason: err.to_string(),
                hint: class.guidance().map(str::to_string),
            },
            Some((ErrorClass::Fatal, err)) if !answered && !err.is_not_found() => {
                BlobError::FatalStore {
                    reason: err.to_string(),
                }
            }
            _ => {
                info!(content_id = %content_id, answered, "no strategy produced a usable candidate");
                BlobError::NotFound {
                    content_id: content_id.clone(),
                }
            }
        })
    }

    /// Validates a candidate, repairing its boundaries when allowed.
    ///
    /// Repair only ever produces a result when the repaired bytes match the
    /// recorded hash, so it cannot hide corruption elsewhere in the payload.
    fn verify(&self, candidate: RetrievalCandidate) -> Result<RetrievedBlob, RetrievalCandidate> {
        let RetrievalCandidate {
            bytes,
            metadata,
            strategy,
        } = candidate;

        if metadata.hash().is_none() {
            return Ok(RetrievedBlob {
                payload: bytes,
                metadata,
                verification: Verification::Unrecorded,
                strategy,
            });
        }
        if codec::validate(&bytes, &metadata) {
            return Ok(RetrievedBlob {
                payload: bytes,
                metadata,
                verification: Verification::Verified,
                strategy,
            });
        }
        if self.config.verification.repair_boundaries {
            if let Some(repaired) = codec::repair(&bytes, &metadata) {
                if codec::validate(&repaired, &metadata) {
                    info!(strategy, "candidate validated after boundary repair");
                    return Ok(RetrievedBlob {
                        payload: Bytes::from(repaired),
                        metadata,
                        verification: Verification::Repaired,
                        strategy,
                    });
                }
            }
        }
        Err(RetrievalCandidate {
            bytes,
            metadata,
            strategy,
        })
    }

    fn unverified(
        &self,
        content_id: &ContentId,
        candidate: RetrievalCandidate,
    ) -> BlobResult<RetrievedBlob> {
        let expected = candidate.metadata.hash().unwrap_or_default().to_string();
        let actual = codec::sha256_hex(&candidate.bytes);
        if self.config.verification.strict {
            return Err(BlobError::IntegrityMismatch { expected, actual });
        }
        warn!(
            content_id = %content_id,
            strategy = candidate.strategy,
            expected_hash = %expected,
            actual_hash = %actual,
            size_bytes = candidate.bytes.len(),
            "returning UNVERIFIED payload: no candidate matched its recorded hash"
        );
        if let Some(metrics) = self.metrics {
            metrics.unverified_reads.add(1, &[]);
        }
        Ok(RetrievedBlob {
            payload: candidate.bytes,
            metadata: candidate.metadata,
            verification: Verification::Unverified { expected, actual },
            strategy: candidate.strategy,
        })
    }
}
