//! Configuration Module
//!
//! Persistent settings for the `vdisplay` tool: where the display server
//! lives, how to reach it and what display to request by default.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use vdisplay_protocol::{ChannelConfig, DisplayConfig, LifecycleConfig};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Control socket settings
    pub channel: ChannelConfig,
    /// Server process management
    pub server: LifecycleConfig,
    /// Display requested by `mirror`
    pub display: DisplayConfig,
}

impl Config {
    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vdisplay").join("config.toml"))
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config {:?}", path));
            }
        };

        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let content = self.to_toml()?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}
