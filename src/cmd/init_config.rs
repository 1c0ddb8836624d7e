use std::path::PathBuf;

use anyhow::Result;
use clap::Args as ClapArgs;

use crate::config::VaultConfig;

#[derive(Debug, ClapArgs)]
pub struct Args {
    #[arg(default_value = "capsule-vault.yaml")]
    config_path: PathBuf,
}

impl Args {
    pub fn run(self) -> Result<()> {
        println!("Initializing config file at: {}", self.config_path.display());
        VaultConfig::generate(&self.config_path)
    }
}
