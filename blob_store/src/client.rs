//! The blob storage client facade.

use std::sync::Arc;

use bytes::Bytes;
use opentelemetry::metrics::Meter;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    config::BlobClientConfig,
    http::HttpStorageNetwork,
    metadata::{BlobMetadata, ContentId, ExpectedMetadata},
    metrics::{BlobMetrics, OperationTimer},
    network::StorageNetwork,
    prober::{EndpointProber, SelectedEndpoint},
    relay::RelayManager,
    retrieval::{default_strategies, RetrievalStrategy, RetrievalStrategyEngine, RetrievedBlob},
    upload::{SignerContext, StoredBlob, UploadCoordinator},
    BlobError,
    BlobResult,
};

/// Access points the client is currently using.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedEndpoints {
    pub publisher: Option<String>,
    pub aggregator: Option<String>,
}

/// Stores and retrieves opaque payloads on the storage network.
///
/// One instance owns its endpoint selection and relay health. Independent
/// instances never share that state.
pub struct BlobStorageClient {
    /// Transport to the storage network.
    network: Arc<dyn StorageNetwork>,

    config: BlobClientConfig,

    /// Publisher used for direct writes.
    publishers: SelectedEndpoint,

    /// Aggregator used for reads.
    aggregators: SelectedEndpoint,

    relay: RelayManager,

    /// Retrieval strategies, tried in order.
    strategies: Vec<Box<dyn RetrievalStrategy>>,

    /// Metrics for operations.
    metrics: Option<BlobMetrics>,
}

impl BlobStorageClient {
    /// Create a client over the given network. Fails on invalid config.
    pub fn new(config: BlobClientConfig, network: Arc<dyn StorageNetwork>) -> BlobResult<Self> {
        config.validate()?;
        let prober = EndpointProber::new(config.timeouts.probe());
        Ok(Self {
            publishers: SelectedEndpoint::new("publisher", config.publishers.clone(), prober),
            aggregators: SelectedEndpoint::new("aggregator", config.aggregators.clone(), prober),
            relay: RelayManager::new(config.relay.clone()),
            strategies: default_strategies(),
            metrics: None,
            network,
            config,
        })
    }

    /// Create a client that records operation metrics on `meter`.
    pub fn new_with_metrics(
        config: BlobClientConfig,
        network: Arc<dyn StorageNetwork>,
        meter: &Meter,
    ) -> BlobResult<Self> {
        let mut client = Self::new(config, network)?;
        client.metrics = Some(BlobMetrics::new(meter));
        Ok(client)
    }

    /// Create a client talking to the configured endpoints over HTTP.
    pub fn with_http(config: BlobClientConfig) -> BlobResult<Self> {
        Self::new(config, Arc::new(HttpStorageNetwork::new()?))
    }

    /// Replace the retrieval strategies. They are tried in the given order.
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn RetrievalStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn config(&self) -> &BlobClientConfig {
        &self.config
    }

    /// Store `payload` with `metadata` and return its content id.
    pub async fn store(&self, payload: Bytes, metadata: BlobMetadata) -> BlobResult<ContentId> {
        let stored = self
            .store_with(
                payload,
                metadata,
                &SignerContext::default(),
                &CancellationToken::new(),
            )
            .await?;
        Ok(stored.content_id)
    }

    /// Store with an explicit signer and a cancellation token that aborts the
    /// whole retry loop.
    pub async fn store_with(
        &self,
        payload: Bytes,
        metadata: BlobMetadata,
        signer: &SignerContext,
        cancel: &CancellationToken,
    ) -> BlobResult<StoredBlob> {
        let _timer = self.timer("store");
        let coordinator = UploadCoordinator {
            network: self.network.as_ref(),
            publishers: &self.publishers,
            relay: &self.relay,
            config: &self.config,
            metrics: self.metrics.as_ref(),
        };
        coordinator.store(payload, metadata, signer, cancel).await
    }

    /// Retrieve the payload stored under `content_id`.
    pub async fn retrieve(
        &self,
        content_id: &ContentId,
        expected: Option<ExpectedMetadata>,
    ) -> BlobResult<RetrievedBlob> {
        self.retrieve_with(content_id, expected, &CancellationToken::new())
            .await
    }

    pub async fn retrieve_with(
        &self,
        content_id: &ContentId,
        expected: Option<ExpectedMetadata>,
        cancel: &CancellationToken,
    ) -> BlobResult<RetrievedBlob> {
        let _timer = self.timer("retrieve");
        let expected = expected.unwrap_or_default();
        let engine = RetrievalStrategyEngine {
            network: self.network.as_ref(),
            aggregators: &self.aggregators,
            config: &self.config,
            metrics: self.metrics.as_ref(),
            strategies: &self.strategies,
        };
        engine.retrieve(content_id, &expected, cancel).await
    }

    /// Stored content cannot be removed; it expires with its storage epochs.
    pub async fn delete(&self, content_id: &ContentId) -> BlobResult<()> {
        error!(content_id = %content_id, "delete requested but the storage network does not support it");
        Err(BlobError::DeletionUnsupported {
            content_id: content_id.clone(),
        })
    }

    /// Clear the relay's degraded flag so the next write tries it again.
    pub fn reset_relay(&self) {
        self.relay.reset();
    }

    pub fn relay_degraded(&self) -> bool {
        self.relay.is_degraded()
    }

    pub async fn selected_endpoints(&self) -> SelectedEndpoints {
        SelectedEndpoints {
            publisher: self.publishers.selected().await,
            aggregator: self.aggregators.selected().await,
        }
    }

    /// Probe all endpoints again and switch to the fastest ones.
    pub async fn reprobe(&self) -> SelectedEndpoints {
        let network = self.network.as_ref();
        let (publisher, aggregator) = tokio::join!(
            self.publishers.reprobe(network),
            self.aggregators.reprobe(network)
        );
        info!(%publisher, %aggregator, "endpoints re-probed");
        SelectedEndpoints {
            publisher: Some(publisher),
            aggregator: Some(aggregator),
        }
    }

    fn timer(&self, op: &'static str) -> Option<OperationTimer> {
        self.metrics
            .as_ref()
            .map(|m| OperationTimer::start(m, op))
    }
}
