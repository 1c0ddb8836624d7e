use anyhow::Result;
use clap::Args as ClapArgs;

use super::build_client;
use crate::config::VaultConfig;

#[derive(Debug, ClapArgs)]
pub struct Args {}

impl Args {
    pub async fn run(self, config: VaultConfig) -> Result<()> {
        let client = build_client(&config)?;
        let selected = client.reprobe().await;
        println!(
            "publisher:  {}",
            selected.publisher.as_deref().unwrap_or("-")
        );
        println!(
            "aggregator: {}",
            selected.aggregator.as_deref().unwrap_or("-")
        );
        if let Some(relay) = &config.blob_client.relay {
            println!("relay:      {}", relay.url);
        }
        Ok(())
    }
}
