//! Access-point selection by measured latency.

use std::{future::Future, time::Duration};

use futures::future::join_all;
use tokio::{
    sync::RwLock,
    time::{timeout_at, Instant},
};
use tracing::{debug, info, warn};

use crate::network::{NetworkError, StorageNetwork};

/// Probes candidate endpoints concurrently and picks the fastest healthy one.
#[derive(Debug, Clone, Copy)]
pub struct EndpointProber {
    timeout: Duration,
}

impl EndpointProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Returns the lowest-latency candidate whose probe succeeded before the
    /// shared deadline, or `None` when every probe failed.
    pub async fn select_best<F, Fut>(&self, candidates: &[String], probe: F) -> Option<String>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<Duration, NetworkError>>,
    {
        if candidates.is_empty() {
            return None;
        }
        let deadline = Instant::now() + self.timeout;
        let probes = candidates.iter().map(|url| {
            let fut = probe(url.clone());
            async move { (url, timeout_at(deadline, fut).await) }
        });

        let mut best: Option<(&String, Duration)> = None;
        for (url, outcome) in join_all(probes).await {
            match outcome {
                Ok(Ok(latency)) => {
                    debug!(endpoint = %url, latency_ms = latency.as_millis() as u64, "probe ok");
                    if best.map_or(true, |(_, l)| latency < l) {
                        best = Some((url, latency));
                    }
                }
                Ok(Err(err)) => debug!(endpoint = %url, %err, "probe failed"),
                Err(_) => debug!(endpoint = %url, timeout = ?self.timeout, "probe timed out"),
            }
        }

        match best {
            Some((url, latency)) => {
                info!(
                    endpoint = %url,
                    latency_ms = latency.as_millis() as u64,
                    "selected endpoint"
                );
                Some(url.clone())
            }
            None => {
                warn!(candidates = candidates.len(), "no endpoint answered its probe");
                None
            }
        }
    }

    /// [`Self::select_best`] using the network's own probe.
    pub async fn select_via(
        &self,
        network: &dyn StorageNetwork,
        candidates: &[String],
    ) -> Option<String> {
        self.select_best(candidates, |url| async move { network.probe(&url).await })
            .await
    }
}

/// The access point currently in use for one role (publisher or aggregator).
///
/// Selection happens lazily on first use and again whenever a caller asks
/// for a re-probe. Concurrent re-probes may race; the last writer wins.
#[derive(Debug)]
pub struct SelectedEndpoint {
    role: &'static str,
    candidates: Vec<String>,
    selected: RwLock<Option<String>>,
    prober: EndpointProber,
}

impl SelectedEndpoint {
    pub fn new(role: &'static str, candidates: Vec<String>, prober: EndpointProber) -> Self {
        Self {
            role,
            candidates,
            selected: RwLock::new(None),
            prober,
        }
    }

    /// The selected endpoint, probing candidates on first use.
    pub async fn current(&self, network: &dyn StorageNetwork) -> String {
        if let Some(url) = self.selected.read().await.clone() {
            return url;
        }
        self.reprobe(network).await
    }

    /// Probes all candidates again and switches to the best one. Falls back
    /// to the first configured candidate when none answers.
    pub async fn reprobe(&self, network: &dyn StorageNetwork) -> String {
        let fallback = self.candidates.first().cloned().unwrap_or_default();
        let chosen = if self.candidates.len() <= 1 {
            fallback
        } else {
            self.prober
                .select_via(network, &self.candidates)
                .await
                .unwrap_or(fallback)
        };
        let mut selected = self.selected.write().await;
        if selected.as_deref() != Some(chosen.as_str()) {
            info!(role = self.role, endpoint = %chosen, "switching endpoint");
        }
        *selected = Some(chosen.clone());
        chosen
    }

    pub async fn selected(&self) -> Option<String> {
        self.selected.read().await.clone()
    }
}
