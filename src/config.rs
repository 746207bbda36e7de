use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};

use anyhow::anyhow;
use serde::Deserialize;

use crate::geofile::feature::LayerId;

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Portal root, `/api/<endpoint>` is appended per call.
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PortalConfig {
    pub gateway: GatewayConfig,
    /// Layers checked at start-up.
    #[serde(default)]
    pub checked_layers: Vec<LayerId>,
    /// Where mounted layers are written as GeoJSON, if set.
    #[serde(default)]
    pub export_dir: Option<PathBuf>,
}

impl PortalConfig {
    pub fn from_file(config_filepath: &Path) -> anyhow::Result<Self> {
        if !config_filepath.exists() {
            return Err(anyhow!("Config file {:?} not found", config_filepath));
        }
        let config_contents = read_to_string(config_filepath)?;
        let config: PortalConfig = serde_yaml::from_str(&config_contents)?;
        Ok(config)
    }
}
