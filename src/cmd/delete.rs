use anyhow::Result;
use blob_store::ContentId;
use clap::Args as ClapArgs;

use super::{build_client, report};
use crate::config::VaultConfig;

#[derive(Debug, ClapArgs)]
pub struct Args {
    content_id: String,
}

impl Args {
    pub async fn run(self, config: VaultConfig) -> Result<()> {
        let client = build_client(&config)?;
        client
            .delete(&ContentId::new(self.content_id))
            .await
            .map_err(report)
    }
}
