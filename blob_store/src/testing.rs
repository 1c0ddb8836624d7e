//! In-memory storage network with scripted faults.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use crate::{
    codec,
    config::BlobClientConfig,
    metadata::{BlobMetadata, ContentId, IDENTIFIER_KEY},
    network::{
        ContainerEntry,
        NetworkError,
        StorageConfiguration,
        StorageNetwork,
        WriteReceipt,
        WriteRequest,
    },
    BlobStorageClient,
};

pub const PUBLISHER: &str = "http://publisher.test";
pub const AGGREGATOR: &str = "http://aggregator.test";
pub const RELAY: &str = "http://relay.test";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Probe,
    Put,
    PutViaRelay,
    List,
    ReadEntry,
    ReadByIdentifier,
    ReadRaw,
}

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub kind: CallKind,
    pub endpoint: String,
    pub at: Instant,
    pub configuration: Option<StorageConfiguration>,
    pub send_object_to: Option<String>,
    pub tip: Option<u64>,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    identifier: String,
    entry_id: String,
    tags: BlobMetadata,
    bytes: Bytes,
}

#[derive(Default)]
struct State {
    containers: HashMap<String, Vec<StoredEntry>>,
    raw: HashMap<String, Bytes>,
    scripted: HashMap<CallKind, VecDeque<NetworkError>>,
    always: HashMap<CallKind, NetworkError>,
    probe_latency: HashMap<String, Option<Duration>>,
    calls: Vec<CallRecord>,
    next_id: u64,
}

impl State {
    fn next_content_id(&mut self) -> String {
        self.next_id += 1;
        format!("quilt-{}", self.next_id)
    }

    fn take_failure(&mut self, kind: CallKind) -> Option<NetworkError> {
        if let Some(err) = self.scripted.get_mut(&kind).and_then(VecDeque::pop_front) {
            return Some(err);
        }
        self.always.get(&kind).cloned()
    }
}

#[derive(Default)]
pub struct MemoryNetwork {
    state: Mutex<State>,
}

pub fn status(status: u16, body: &str) -> NetworkError {
    NetworkError::Status {
        status,
        body: body.to_string(),
    }
}

pub fn not_found() -> NetworkError {
    status(404, "Not Found")
}

pub fn timeout(endpoint: &str) -> NetworkError {
    NetworkError::Timeout {
        endpoint: endpoint.to_string(),
        elapsed: Duration::from_secs(60),
    }
}

/// Fingerprinted tags for a container entry, as a store would write them.
pub fn tags_for(identifier: &str, payload: &[u8]) -> BlobMetadata {
    let mut tags = codec::fingerprint(payload);
    tags.insert(IDENTIFIER_KEY, identifier);
    tags
}

/// Deterministic non-repeating test payload.
pub fn payload(len: usize) -> Bytes {
    (0..len).map(|i| (i * 31 % 251) as u8).collect::<Vec<_>>().into()
}

pub fn config() -> BlobClientConfig {
    BlobClientConfig {
        publishers: vec![PUBLISHER.to_string()],
        aggregators: vec![AGGREGATOR.to_string()],
        ..Default::default()
    }
}

pub fn client(network: &Arc<MemoryNetwork>, config: BlobClientConfig) -> BlobStorageClient {
    BlobStorageClient::new(config, network.clone()).unwrap()
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Fail the next call of `kind` with `err`, ahead of any standing fault.
    pub fn fail_next(&self, kind: CallKind, err: NetworkError) {
        self.lock().scripted.entry(kind).or_default().push_back(err);
    }

    /// Fail every call of `kind` with `err` until cleared.
    pub fn fail_always(&self, kind: CallKind, err: NetworkError) {
        self.lock().always.insert(kind, err);
    }

    pub fn set_probe(&self, endpoint: &str, latency: Option<Duration>) {
        self.lock()
            .probe_latency
            .insert(endpoint.to_string(), latency);
    }

    /// Stores a multi-file container directly, bypassing the client.
    pub fn insert_container(&self, files: Vec<(&str, Bytes, BlobMetadata)>) -> ContentId {
        let mut state = self.lock();
        let id = state.next_content_id();
        let entries = files
            .into_iter()
            .enumerate()
            .map(|(i, (identifier, bytes, tags))| StoredEntry {
                identifier: identifier.to_string(),
                entry_id: format!("{id}-patch-{i}"),
                tags,
                bytes,
            })
            .collect();
        state.containers.insert(id.clone(), entries);
        ContentId::new(id)
    }

    /// Stores a plain blob with no container structure and no tags.
    pub fn insert_raw(&self, bytes: Bytes) -> ContentId {
        let mut state = self.lock();
        let id = state.next_content_id();
        state.raw.insert(id.clone(), bytes);
        ContentId::new(id)
    }

    /// Rewrites the stored bytes of every file in a container.
    pub fn corrupt(&self, content_id: &ContentId, damage: impl Fn(&mut Vec<u8>)) {
        let mut state = self.lock();
        let entries = state.containers.get_mut(content_id.as_str()).unwrap();
        for entry in entries {
            let mut bytes = entry.bytes.to_vec();
            damage(&mut bytes);
            entry.bytes = bytes.into();
        }
    }

    pub fn calls(&self, kind: CallKind) -> Vec<CallRecord> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, kind: CallKind) -> usize {
        self.calls(kind).len()
    }

    fn record(&self, kind: CallKind, endpoint: &str) -> Result<(), NetworkError> {
        self.record_write(kind, endpoint, None, None)
    }

    fn record_write(
        &self,
        kind: CallKind,
        endpoint: &str,
        request: Option<&WriteRequest>,
        tip: Option<u64>,
    ) -> Result<(), NetworkError> {
        let mut state = self.lock();
        state.calls.push(CallRecord {
            kind,
            endpoint: endpoint.to_string(),
            at: Instant::now(),
            configuration: request.map(|r| r.configuration),
            send_object_to: request.and_then(|r| r.send_object_to.clone()),
            tip,
        });
        match state.take_failure(kind) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn write(&self, request: &WriteRequest) -> WriteReceipt {
        let mut state = self.lock();
        let id = state.next_content_id();
        let entry_id = format!("{id}-patch-0");
        state.containers.insert(
            id.clone(),
            vec![StoredEntry {
                identifier: request.identifier.clone(),
                entry_id: entry_id.clone(),
                tags: request.metadata.clone(),
                bytes: request.payload.clone(),
            }],
        );
        WriteReceipt {
            content_id: ContentId::new(id),
            entry_id: Some(entry_id),
            newly_created: true,
        }
    }
}

#[async_trait]
impl StorageNetwork for MemoryNetwork {
    async fn probe(&self, endpoint: &str) -> Result<Duration, NetworkError> {
        self.record(CallKind::Probe, endpoint)?;
        let latency = self
            .lock()
            .probe_latency
            .get(endpoint)
            .copied()
            .unwrap_or(Some(Duration::from_millis(10)));
        match latency {
            Some(latency) => {
                tokio::time::sleep(latency).await;
                Ok(latency)
            }
            None => Err(NetworkError::Connect {
                endpoint: endpoint.to_string(),
                message: "connection refused".to_string(),
            }),
        }
    }

    async fn put_container(
        &self,
        publisher: &str,
        request: &WriteRequest,
    ) -> Result<WriteReceipt, NetworkError> {
        self.record_write(CallKind::Put, publisher, Some(request), None)?;
        Ok(self.write(request))
    }

    async fn put_container_via_relay(
        &self,
        relay: &str,
        request: &WriteRequest,
        tip: Option<u64>,
    ) -> Result<WriteReceipt, NetworkError> {
        self.record_write(CallKind::PutViaRelay, relay, Some(request), tip)?;
        Ok(self.write(request))
    }

    async fn list_container(
        &self,
        aggregator: &str,
        content_id: &ContentId,
    ) -> Result<Vec<ContainerEntry>, NetworkError> {
        self.record(CallKind::List, aggregator)?;
        let state = self.lock();
        let entries = state
            .containers
            .get(content_id.as_str())
            .ok_or_else(not_found)?;
        Ok(entries
            .iter()
            .map(|e| ContainerEntry {
                identifier: e.identifier.clone(),
                entry_id: e.entry_id.clone(),
                tags: e.tags.clone(),
            })
            .collect())
    }

    async fn read_entry(&self, aggregator: &str, entry_id: &str) -> Result<Bytes, NetworkError> {
        self.record(CallKind::ReadEntry, aggregator)?;
        let state = self.lock();
        state
            .containers
            .values()
            .flatten()
            .find(|e| e.entry_id == entry_id)
            .map(|e| e.bytes.clone())
            .ok_or_else(not_found)
    }

    async fn read_by_identifier(
        &self,
        aggregator: &str,
        content_id: &ContentId,
        identifier: &str,
    ) -> Result<Bytes, NetworkError> {
        self.record(CallKind::ReadByIdentifier, aggregator)?;
        let state = self.lock();
        state
            .containers
            .get(content_id.as_str())
            .and_then(|entries| entries.iter().find(|e| e.identifier == identifier))
            .map(|e| e.bytes.clone())
            .ok_or_else(not_found)
    }

    async fn read_raw(
        &self,
        aggregator: &str,
        content_id: &ContentId,
    ) -> Result<Bytes, NetworkError> {
        self.record(CallKind::ReadRaw, aggregator)?;
        let state = self.lock();
        state
            .raw
            .get(content_id.as_str())
            .cloned()
            .ok_or_else(not_found)
    }
}
