use std::path::PathBuf;

use anyhow::{Context, Result};
use blob_store::{ContentId, ExpectedMetadata, Verification};
use clap::Args as ClapArgs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::{build_client, cancel_on_ctrl_c, report};
use crate::config::VaultConfig;

#[derive(Debug, ClapArgs)]
pub struct Args {
    content_id: String,

    /// Identifier of the wanted file inside a multi-file container
    #[arg(short, long)]
    identifier: Option<String>,

    /// Expected SHA-256 of the payload, lowercase hex
    #[arg(long)]
    hash: Option<String>,

    /// Write the payload here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Fail instead of returning a payload whose hash does not match
    #[arg(long)]
    strict: bool,
}

impl Args {
    pub async fn run(self, mut config: VaultConfig) -> Result<()> {
        if self.strict {
            config.blob_client.verification.strict = true;
        }
        let expected = ExpectedMetadata {
            identifier: self.identifier,
            hash: self.hash,
        };
        let expected = (!expected.is_empty()).then_some(expected);

        let client = build_client(&config)?;
        let blob = client
            .retrieve_with(
                &ContentId::new(self.content_id),
                expected,
                &cancel_on_ctrl_c(),
            )
            .await
            .map_err(report)?;

        match &blob.verification {
            Verification::Unverified { expected, actual } => warn!(
                expected_hash = %expected,
                actual_hash = %actual,
                "payload does NOT match its recorded hash"
            ),
            verification => info!(
                ?verification,
                strategy = blob.strategy,
                size_bytes = blob.payload.len(),
                "retrieved"
            ),
        }

        match self.output {
            Some(path) => tokio::fs::write(&path, &blob.payload)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?,
            None => {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(&blob.payload).await?;
                stdout.flush().await?;
            }
        }
        Ok(())
    }
}
