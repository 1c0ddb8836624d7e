use std::path::Path;

use anyhow::{Context, Result};
use blob_store::BlobClientConfig;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "CAPSULE_VAULT_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub blob_client: BlobClientConfig,
    /// Emit JSON log lines instead of the compact human format.
    #[serde(default)]
    pub structured_logging: bool,
}

impl VaultConfig {
    /// Defaults, overlaid with the YAML file when given, overlaid with
    /// `CAPSULE_VAULT_` environment variables (`__` separates nested keys).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(VaultConfig::default()));
        if let Some(path) = path {
            let config_str = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            figment = figment.merge(Yaml::string(&config_str));
        }
        let config: VaultConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.blob_client.validate()?;
        Ok(())
    }

    pub fn generate(path: &Path) -> Result<()> {
        let config_str = serde_yaml::to_string(&VaultConfig::default())?;
        std::fs::write(path, config_str)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }
}
