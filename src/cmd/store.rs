use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use blob_store::{BlobMetadata, SignerContext, IDENTIFIER_KEY};
use bytes::Bytes;
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::info;

use super::{build_client, cancel_on_ctrl_c, report};
use crate::config::VaultConfig;

#[derive(Debug, ClapArgs)]
pub struct Args {
    /// File whose bytes are stored as-is
    file: PathBuf,

    /// Logical name of the file; defaults to a timestamp
    #[arg(short, long)]
    identifier: Option<String>,

    /// Extra metadata tag, as key=value. Repeatable.
    #[arg(short, long = "tag", value_name = "key=value")]
    tags: Vec<String>,

    /// Address that should own the stored blob object
    #[arg(long)]
    send_object_to: Option<String>,
}

#[derive(Serialize)]
struct StoreOutput<'a> {
    content_id: &'a str,
    entry_id: Option<&'a str>,
    epochs: u32,
    deletable: bool,
    metadata: &'a BlobMetadata,
}

impl Args {
    pub async fn run(self, config: VaultConfig) -> Result<()> {
        let payload = tokio::fs::read(&self.file)
            .await
            .with_context(|| format!("failed to read {}", self.file.display()))?;
        let metadata = parse_metadata(self.identifier, &self.tags)?;
        let signer = SignerContext {
            send_object_to: self.send_object_to,
        };

        let client = build_client(&config)?;
        let stored = client
            .store_with(Bytes::from(payload), metadata, &signer, &cancel_on_ctrl_c())
            .await
            .map_err(report)?;
        info!(content_id = %stored.content_id, writes = stored.writes, "stored");

        let output = StoreOutput {
            content_id: stored.content_id.as_str(),
            entry_id: stored.entry_id.as_deref(),
            epochs: stored.configuration.epochs,
            deletable: stored.configuration.deletable,
            metadata: &stored.metadata,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }
}

fn parse_metadata(identifier: Option<String>, tags: &[String]) -> Result<BlobMetadata> {
    let mut metadata = BlobMetadata::new();
    for tag in tags {
        let Some((key, value)) = tag.split_once('=') else {
            bail!("tag {tag:?} is not in key=value form");
        };
        if key.is_empty() {
            bail!("tag {tag:?} has an empty key");
        }
        metadata.insert(key, value);
    }
    if let Some(identifier) = identifier {
        metadata.insert(IDENTIFIER_KEY, identifier);
    }
    Ok(metadata)
}
