//! Config store for loading config.toml.

use std::path::{Path, PathBuf};

use super::{Settings, parser};

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    /// Store at `<config dir>/stackfleet/config.toml`.
    pub fn from_default_dir() -> anyhow::Result<Self> {
        let global_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("stackfleet");
        Ok(Self::from_path(global_dir.join(CONFIG_FILE_NAME)))
    }

    pub fn from_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load settings. A missing file yields the defaults.
    pub fn load(&self) -> anyhow::Result<Settings> {
        if !self.config_path.exists() {
            return Ok(Settings::default());
        }
        tracing::debug!("Using config file: {}", self.config_path.display());
        parser::parse_settings(&self.config_path)
    }
}
