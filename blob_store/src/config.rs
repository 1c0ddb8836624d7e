//! Blob client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BlobError, BlobResult};

/// Configuration for [`BlobStorageClient`](crate::BlobStorageClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobClientConfig {
    /// Publisher URLs accepting writes. The fastest one is used.
    #[serde(default = "default_publishers")]
    pub publishers: Vec<String>,

    /// Aggregator URLs serving reads. The fastest one is used.
    #[serde(default = "default_aggregators")]
    pub aggregators: Vec<String>,

    /// Optional upload relay.
    #[serde(default)]
    pub relay: Option<RelayConfig>,

    /// Address that should own stored blob objects.
    #[serde(default)]
    pub send_object_to: Option<String>,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub verification: VerificationConfig,
}

impl Default for BlobClientConfig {
    fn default() -> Self {
        Self {
            publishers: default_publishers(),
            aggregators: default_aggregators(),
            relay: None,
            send_object_to: None,
            upload: UploadConfig::default(),
            timeouts: TimeoutConfig::default(),
            verification: VerificationConfig::default(),
        }
    }
}

impl BlobClientConfig {
    pub fn validate(&self) -> BlobResult<()> {
        let invalid = |reason: &str| {
            Err(BlobError::FatalStore {
                reason: format!("invalid blob client config: {reason}"),
            })
        };
        if self.publishers.is_empty() {
            return invalid("at least one publisher is required");
        }
        if self.aggregators.is_empty() {
            return invalid("at least one aggregator is required");
        }
        for url in self.publishers.iter().chain(self.aggregators.iter()) {
            if url::Url::parse(url).is_err() {
                return invalid(&format!("endpoint {url:?} is not a valid URL"));
            }
        }
        if let Some(relay) = &self.relay {
            if url::Url::parse(&relay.url).is_err() {
                return invalid(&format!("relay {:?} is not a valid URL", relay.url));
            }
        }
        if self.upload.max_attempts == 0 {
            return invalid("upload.max_attempts must be at least 1");
        }
        if self.upload.min_epochs == 0 {
            return invalid("upload.min_epochs must be at least 1");
        }
        if self.upload.min_epochs > self.upload.max_epochs {
            return invalid("upload.min_epochs must not exceed upload.max_epochs");
        }
        if self.upload.base_delay_ms > self.upload.max_delay_ms {
            return invalid("upload.base_delay_ms must not exceed upload.max_delay_ms");
        }
        Ok(())
    }
}

fn default_publishers() -> Vec<String> {
    vec!["https://publisher.walrus-testnet.walrus.space".to_string()]
}

fn default_aggregators() -> Vec<String> {
    vec!["https://aggregator.walrus-testnet.walrus.space".to_string()]
}

/// Upload relay endpoint and tip ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub url: String,

    /// Largest tip, in the network's smallest unit, offered per upload.
    #[serde(default)]
    pub max_tip: Option<u64>,
}

/// Retry and storage-duration tuning for uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Epochs requested on the first attempts.
    pub min_epochs: u32,
    /// Largest epoch count later attempts escalate to.
    pub max_epochs: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 8_000,
            min_epochs: 1,
            max_epochs: 5,
        }
    }
}

impl UploadConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Per-call deadlines. Reads get longer than writes since node discovery on
/// the read path is slower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub write_secs: u64,
    pub read_secs: u64,
    pub probe_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            write_secs: 60,
            read_secs: 120,
            probe_secs: 3,
        }
    }
}

impl TimeoutConfig {
    pub fn write(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }
}

/// How retrieved bytes are checked against their fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Rewrite mismatching head/tail bytes from the recorded samples before
    /// validating.
    pub repair_boundaries: bool,
    /// Refuse to return a candidate whose recorded hash does not match.
    pub strict: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            repair_boundaries: true,
            strict: false,
        }
    }
}
