//! Store orchestration: fingerprinting, configuration schedule, relay or
//! direct writes, classified retries with backoff.

use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vault_utils::{sleep_or_cancel, Backoff, SleepOutcome};

use crate::{
    classifier::{self, ErrorClass, OperationContext},
    codec,
    config::{BlobClientConfig, RelayConfig, UploadConfig},
    metadata::{BlobMetadata, ContentId, IDENTIFIER_KEY},
    metrics::BlobMetrics,
    network::{NetworkError, StorageConfiguration, StorageNetwork, WriteReceipt, WriteRequest},
    prober::SelectedEndpoint,
    relay::RelayManager,
    BlobError,
    BlobResult,
};

/// Who pays for and owns the stored blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignerContext {
    /// Address that should receive the blob object. Overrides the configured
    /// default when set.
    pub send_object_to: Option<String>,
}

/// Successful store.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub content_id: ContentId,
    pub entry_id: Option<String>,
    /// Metadata as written, fingerprint included.
    pub metadata: BlobMetadata,
    pub configuration: StorageConfiguration,
    /// Number of write calls made, successful one included.
    pub writes: usize,
}

/// Record of one write call. Lives only for the duration of a store.
#[derive(Debug, Clone)]
pub struct UploadAttempt {
    pub attempt: u32,
    pub configuration: StorageConfiguration,
    pub via_relay: bool,
    pub class: Option<ErrorClass>,
}

/// What to do after a failed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadDecision {
    /// Stop retrying and surface the failure.
    Abort,
    /// Mark the relay degraded and repeat the same configuration directly.
    RetryDirect,
    /// Move on to the next configuration, backing off once the attempt's
    /// list is exhausted.
    NextConfiguration,
}

pub fn decide(class: ErrorClass) -> UploadDecision {
    match class {
        ErrorClass::BalanceInsufficient | ErrorClass::Fatal => UploadDecision::Abort,
        ErrorClass::RelayFault => UploadDecision::RetryDirect,
        ErrorClass::TransientNode | ErrorClass::TransientNetwork => {
            UploadDecision::NextConfiguration
        }
    }
}

/// Storage configurations tried during the given 1-based attempt.
///
/// Early attempts ask for the shortest duration, which needs the fewest
/// cooperating nodes. Later attempts double the duration up to the
/// configured maximum and also try a permanent blob.
pub fn configurations_for_attempt(attempt: u32, upload: &UploadConfig) -> Vec<StorageConfiguration> {
    let min = upload.min_epochs.max(1);
    let max = upload.max_epochs.max(min);
    match attempt {
        0 | 1 => vec![StorageConfiguration {
            epochs: min,
            deletable: true,
        }],
        n => {
            let shift = (n - 2).min(16);
            let epochs = min.saturating_mul(1 << shift).min(max);
            vec![
                StorageConfiguration {
                    epochs,
                    deletable: true,
                },
                StorageConfiguration {
                    epochs,
                    deletable: false,
                },
            ]
        }
    }
}

/// Default identifier for payloads stored without one.
pub fn default_identifier() -> String {
    chrono::Utc::now()
        .format("capsule_%Y%m%dT%H%M%S%3fZ")
        .to_string()
}

pub struct UploadCoordinator<'a> {
    pub network: &'a dyn StorageNetwork,
    pub publishers: &'a SelectedEndpoint,
    pub relay: &'a RelayManager,
    pub config: &'a BlobClientConfig,
    pub metrics: Option<&'a BlobMetrics>,
}

impl UploadCoordinator<'_> {
    pub async fn store(
        &self,
        payload: Bytes,
        caller_metadata: BlobMetadata,
        signer: &SignerContext,
        cancel: &CancellationToken,
    ) -> BlobResult<StoredBlob> {
        let metadata = prepare_metadata(&payload, caller_metadata)?;
        let identifier = metadata
            .identifier()
            .map(str::to_string)
            .unwrap_or_default();
        let send_object_to = signer
            .send_object_to
            .clone()
            .or_else(|| self.config.send_object_to.clone());

        let upload = &self.config.upload;
        let backoff = Backoff::Exponential {
            initial: upload.base_delay(),
            max: upload.max_delay(),
        };
        info!(
            identifier = %identifier,
            size_bytes = payload.len(),
            max_attempts = upload.max_attempts,
            "storing blob"
        );

        let mut history: Vec<UploadAttempt> = Vec::new();
        let mut last_failure: Option<(ErrorClass, NetworkError)> = None;

        for attempt in 1..=upload.max_attempts {
            let configurations = configurations_for_attempt(attempt, upload);
            let mut index = 0;
            while let Some(&configuration) = configurations.get(index) {
                if cancel.is_cancelled() {
                    return Err(BlobError::Cancelled);
                }
                let request = WriteRequest {
                    identifier: identifier.clone(),
                    payload: payload.clone(),
                    metadata: metadata.clone(),
                    configuration,
                    send_object_to: send_object_to.clone(),
                };
                let relay = self.relay.active_relay();
                let via_relay = relay.is_some();

                let result = tokio::select! {
                    _ = cancel.cancelled() => return Err(BlobError::Cancelled),
                    result = self.write(relay, &request) => result,
                };

                match result {
                    Ok(receipt) => {
                        if via_relay {
                            self.relay.report_success();
                        }
                        history.push(UploadAttempt {
                            attempt,
                            configuration,
                            via_relay,
                            class: None,
                        });
                        if !receipt.newly_created {
                            info!(
                                content_id = %receipt.content_id,
                                "network already held a certified copy"
                            );
                        }
                        info!(
                            content_id = %receipt.content_id,
                            identifier = %identifier,
                            attempt,
                            epochs = configuration.epochs,
                            deletable = configuration.deletable,
                            via_relay,
                            writes = history.len(),
                            "blob stored"
                        );
                        return Ok(StoredBlob {
                            content_id: receipt.content_id,
                            entry_id: receipt.entry_id,
                            metadata,
                            configuration,
                            writes: history.len(),
                        });
                    }
                    Err(err) => {
                        let class =
                            classifier::classify(&err, OperationContext::upload(attempt, via_relay));
                        warn!(
                            attempt,
                            epochs = configuration.epochs,
                            deletable = configuration.deletable,
                            via_relay,
                            class = %class,
                            error = %err,
                            "blob write failed"
                        );
                        if let Some(metrics) = self.metrics {
                            metrics.record_error("store", class.as_str());
                        }
                        history.push(UploadAttempt {
                            attempt,
                            configuration,
                            via_relay,
                            class: Some(class),
                        });

                        match decide(class) {
                            UploadDecision::Abort => return Err(abort_error(class, &err)),
                            UploadDecision::RetryDirect => self.relay.report_fault(),
                            UploadDecision::NextConfiguration => index += 1,
                        }
                        last_failure = Some((class, err));
                    }
                }
            }

            if attempt == upload.max_attempts {
                break;
            }
            let delay = backoff.delay_after(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before next attempt");
            if sleep_or_cancel(delay, cancel).await == SleepOutcome::Cancelled {
                return Err(BlobError::Cancelled);
            }
            if last_failure
                .as_ref()
                .is_some_and(|(class, _)| class.suggests_reprobe())
            {
                self.publishers.reprobe(self.network).await;
            }
        }

        let attempts = upload.max_attempts;
        Err(match last_failure {
            Some((class, err)) => BlobError::StorageUnavailable {
                class,
                attempts,
                reason: err.to_string(),
                hint: class.guidance().map(str::to_string),
            },
            None => BlobError::FatalStore {
                reason: "no write was attempted".to_string(),
            },
        })
    }

    async fn write(
        &self,
        relay: Option<&RelayConfig>,
        request: &WriteRequest,
    ) -> Result<WriteReceipt, NetworkError> {
        let deadline = self.config.timeouts.write();
        match relay {
            Some(relay) => {
                debug!(relay = %relay.url, configuration = %request.configuration, "writing via relay");
                with_deadline(
                    &relay.url,
                    deadline,
                    self.network
                        .put_container_via_relay(&relay.url, request, relay.max_tip),
                )
                .await
            }
            None => {
                let publisher = self.publishers.current(self.network).await;
                debug!(publisher = %publisher, configuration = %request.configuration, "writing directly");
                with_deadline(
                    &publisher,
                    deadline,
                    self.network.put_container(&publisher, request),
                )
                .await
            }
        }
    }
}

/// Merges the fingerprint into the caller's metadata. Caller values win.
pub fn prepare_metadata(payload: &[u8], caller: BlobMetadata) -> BlobResult<BlobMetadata> {
    let mut metadata = caller;
    match metadata.identifier() {
        Some(id) if id.trim().is_empty() => {
            return Err(BlobError::FatalStore {
                reason: "identifier must not be blank".to_string(),
            });
        }
        Some(_) => {}
        None => metadata.insert(IDENTIFIER_KEY, default_identifier()),
    }
    metadata.merge_missing(&codec::fingerprint(payload));
    Ok(metadata)
}

fn abort_error(class: ErrorClass, err: &NetworkError) -> BlobError {
    match class {
        ErrorClass::BalanceInsufficient => BlobError::BalanceInsufficient {
            required: classifier::required_amount(err),
            hint: class.guidance().unwrap_or_default().to_string(),
        },
        _ => BlobError::FatalStore {
            reason: err.to_string(),
        },
    }
}

/// Bounds a single network call by `deadline`.
pub(crate) async fn with_deadline<T>(
    endpoint: &str,
    deadline: Duration,
    call: impl std::future::Future<Output = Result<T, NetworkError>>,
) -> Result<T, NetworkError> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(NetworkError::Timeout {
            endpoint: endpoint.to_string(),
            elapsed: deadline,
        }),
    }
}
