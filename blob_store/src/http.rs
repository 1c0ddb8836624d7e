//! Walrus HTTP publisher / aggregator / upload-relay client.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Client, Response};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::{
    metadata::{BlobMetadata, ContentId},
    network::{ContainerEntry, NetworkError, StorageNetwork, WriteReceipt, WriteRequest},
    BlobError,
    BlobResult,
};

const METADATA_PART: &str = "_metadata";

/// [`StorageNetwork`] over the Walrus HTTP API.
#[derive(Clone)]
pub struct HttpStorageNetwork {
    client: Client,
}

impl HttpStorageNetwork {
    pub fn new() -> BlobResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("capsule-vault/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BlobError::FatalStore {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn put_quilt(
        &self,
        base: &str,
        request: &WriteRequest,
        tip: Option<u64>,
    ) -> Result<WriteReceipt, NetworkError> {
        let url = endpoint_url(base, &["v1", "quilts"])?;
        let mut query: Vec<(&str, String)> = vec![
            ("epochs", request.configuration.epochs.to_string()),
            ("deletable", request.configuration.deletable.to_string()),
        ];
        if !request.configuration.deletable {
            query.push(("permanent", "true".to_string()));
        }
        if let Some(owner) = &request.send_object_to {
            query.push(("send_object_to", owner.clone()));
        }
        if let Some(tip) = tip {
            query.push(("tip", tip.to_string()));
        }

        let patch_metadata = serde_json::to_string(&[PatchMetadata {
            identifier: &request.identifier,
            tags: &request.metadata,
        }])
        .map_err(|e| NetworkError::Protocol {
            message: format!("failed to encode patch metadata: {e}"),
        })?;
        let form = multipart::Form::new()
            .part(
                request.identifier.clone(),
                multipart::Part::bytes(request.payload.to_vec())
                    .file_name(request.identifier.clone()),
            )
            .text(METADATA_PART, patch_metadata);

        debug!(%url, epochs = request.configuration.epochs, "PUT quilt");
        let response = self
            .client
            .put(url)
            .query(&query)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(base, e))?;
        let response = check_status(response).await?;
        let body: QuiltStoreResponse = response.json().await.map_err(|e| NetworkError::Protocol {
            message: format!("unreadable store response: {e}"),
        })?;
        body.into_receipt()
    }

    async fn get_bytes(&self, base: &str, segments: &[&str]) -> Result<Bytes, NetworkError> {
        let url = endpoint_url(base, segments)?;
        debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(base, e))?;
        check_status(response)
            .await?
            .bytes()
            .await
            .map_err(|e| transport_error(base, e))
    }
}

#[async_trait]
impl StorageNetwork for HttpStorageNetwork {
    async fn probe(&self, endpoint: &str) -> Result<Duration, NetworkError> {
        let url = endpoint_url(endpoint, &["v1", "api"])?;
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(endpoint, e))?;
        if response.status().is_server_error() {
            return Err(NetworkError::Status {
                status: response.status().as_u16(),
                body: String::new(),
            });
        }
        Ok(start.elapsed())
    }

    async fn put_container(
        &self,
        publisher: &str,
        request: &WriteRequest,
    ) -> Result<WriteReceipt, NetworkError> {
        self.put_quilt(publisher, request, None).await
    }

    async fn put_container_via_relay(
        &self,
        relay: &str,
        request: &WriteRequest,
        tip: Option<u64>,
    ) -> Result<WriteReceipt, NetworkError> {
        self.put_quilt(relay, request, tip).await
    }

    async fn list_container(
        &self,
        aggregator: &str,
        content_id: &ContentId,
    ) -> Result<Vec<ContainerEntry>, NetworkError> {
        let url = endpoint_url(aggregator, &["v1", "quilts", content_id.as_str(), "patches"])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(aggregator, e))?;
        let patches: Vec<PatchListing> = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| NetworkError::Protocol {
                message: format!("unreadable patch listing: {e}"),
            })?;
        Ok(patches
            .into_iter()
            .map(|p| ContainerEntry {
                identifier: p.identifier,
                entry_id: p.patch_id,
                tags: p.tags,
            })
            .collect())
    }

    async fn read_entry(&self, aggregator: &str, entry_id: &str) -> Result<Bytes, NetworkError> {
        self.get_bytes(aggregator, &["v1", "blobs", "by-quilt-patch-id", entry_id])
            .await
    }

    async fn read_by_identifier(
        &self,
        aggregator: &str,
        content_id: &ContentId,
        identifier: &str,
    ) -> Result<Bytes, NetworkError> {
        self.get_bytes(
            aggregator,
            &["v1", "blobs", "by-quilt-id", content_id.as_str(), identifier],
        )
        .await
    }

    async fn read_raw(
        &self,
        aggregator: &str,
        content_id: &ContentId,
    ) -> Result<Bytes, NetworkError> {
        self.get_bytes(aggregator, &["v1", "blobs", content_id.as_str()])
            .await
    }
}

/// Appends percent-encoded path segments to `base`.
fn endpoint_url(base: &str, segments: &[&str]) -> Result<Url, NetworkError> {
    let mut url = Url::parse(base).map_err(|e| NetworkError::Protocol {
        message: format!("invalid endpoint {base:?}: {e}"),
    })?;
    url.path_segments_mut()
        .map_err(|_| NetworkError::Protocol {
            message: format!("endpoint {base:?} cannot carry a path"),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn transport_error(endpoint: &str, err: reqwest::Error) -> NetworkError {
    if err.is_timeout() {
        return NetworkError::Timeout {
            endpoint: endpoint.to_string(),
            elapsed: Duration::default(),
        };
    }
    if err.is_decode() {
        return NetworkError::Protocol {
            message: err.to_string(),
        };
    }
    // The interesting part (dns, refused, reset) is usually in the source chain.
    let mut message = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    NetworkError::Connect {
        endpoint: endpoint.to_string(),
        message,
    }
}

async fn check_status(response: Response) -> Result<Response, NetworkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(NetworkError::Status {
        status: status.as_u16(),
        body: if body.is_empty() {
            status.to_string()
        } else {
            body
        },
    })
}

#[derive(Serialize)]
struct PatchMetadata<'a> {
    identifier: &'a str,
    tags: &'a BlobMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuiltStoreResponse {
    blob_store_result: BlobStoreResult,
    #[serde(default)]
    stored_quilt_blobs: Vec<StoredQuiltPatch>,
}

impl QuiltStoreResponse {
    fn into_receipt(self) -> Result<WriteReceipt, NetworkError> {
        let entry_id = self
            .stored_quilt_blobs
            .into_iter()
            .next()
            .map(|p| p.quilt_patch_id);
        match self.blob_store_result {
            BlobStoreResult::NewlyCreated(created) => Ok(WriteReceipt {
                content_id: ContentId::new(created.blob_object.blob_id),
                entry_id,
                newly_created: true,
            }),
            BlobStoreResult::AlreadyCertified(certified) => Ok(WriteReceipt {
                content_id: ContentId::new(certified.blob_id),
                entry_id,
                newly_created: false,
            }),
            BlobStoreResult::MarkedInvalid(detail) => Err(NetworkError::Protocol {
                message: format!("blob marked invalid: {detail}"),
            }),
            BlobStoreResult::Error(detail) => Err(NetworkError::Status {
                status: 500,
                body: detail.to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum BlobStoreResult {
    NewlyCreated(NewlyCreated),
    AlreadyCertified(AlreadyCertified),
    MarkedInvalid(serde_json::Value),
    Error(serde_json::Value),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewlyCreated {
    blob_object: BlobObject,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobObject {
    blob_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlreadyCertified {
    blob_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredQuiltPatch {
    quilt_patch_id: String,
}

#[derive(Debug, Deserialize)]
struct PatchListing {
    identifier: String,
    #[serde(alias = "patchId", alias = "quiltPatchId")]
    patch_id: String,
    #[serde(default)]
    tags: BlobMetadata,
}
