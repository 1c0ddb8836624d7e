use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use blob_store::{BlobError, BlobStorageClient, HttpStorageNetwork};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::{config::VaultConfig, tracing::setup_tracing};

mod delete;
mod init_config;
mod probe;
mod retrieve;
mod store;

/// Global arguments for the CLI. These are arguments that are shared across all
/// subcommands.
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Path to the config file. Defaults apply when omitted.
    #[arg(global = true, short = 'c', long = "config", value_name = "config file")]
    pub config_path: Option<PathBuf>,
}

/// The list of commands that can be run on capsule-vault.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Store a file on the storage network
    Store(store::Args),
    /// Retrieve and verify stored content
    Retrieve(retrieve::Args),
    /// Probe publishers and aggregators and show the fastest
    Probe(probe::Args),
    /// Request deletion of stored content
    Delete(delete::Args),
    /// Write a config file with default values
    InitConfig(init_config::Args),
}

#[derive(Debug, Parser)]
#[command(name = "capsule-vault", version)]
#[command(about = "CLI for resilient blob storage on Walrus", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    #[command(flatten)]
    pub global_args: GlobalArgs,
}

impl Cli {
    /// Run the CLI
    pub async fn run(self) -> Result<()> {
        let config_path = self.global_args.config_path;
        let load = || -> Result<VaultConfig> {
            let config = VaultConfig::load(config_path.as_deref())?;
            setup_tracing(&config);
            Ok(config)
        };
        match self.command {
            Commands::Store(args) => args.run(load()?).await,
            Commands::Retrieve(args) => args.run(load()?).await,
            Commands::Probe(args) => args.run(load()?).await,
            Commands::Delete(args) => args.run(load()?).await,
            Commands::InitConfig(args) => args.run(),
        }
    }
}

fn build_client(config: &VaultConfig) -> Result<BlobStorageClient> {
    let network = Arc::new(HttpStorageNetwork::new()?);
    Ok(BlobStorageClient::new(config.blob_client.clone(), network)?)
}

/// Token cancelled on Ctrl-C, so an interrupt stops retries and backoff.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            child.cancel();
        }
    });
    token
}

/// Logs the error class and remediation hint before handing the error up.
fn report(err: BlobError) -> anyhow::Error {
    error!(class = err.class(), hint = err.hint(), "{err}");
    err.into()
}
