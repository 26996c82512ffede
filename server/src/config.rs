//! Configuration management for the scheduler hub
//!
//! Handles loading, validation, and reloading of the hub's configuration
//! from a `hub.toml` file.

use anyhow::{Context, Result};
use koji_common::config::HubConfig;
use std::path::PathBuf;
use tracing::{debug, info};

const HUB_CONFIG_FILE: &str = "hub.toml";

/// Manages the hub's configuration. Always holds a validated `HubConfig`
/// once constructed successfully.
pub struct ConfigManager {
    pub config_path: PathBuf,
    pub hub_config: Option<HubConfig>,
}

impl ConfigManager {
    /// Creates a new `ConfigManager` and immediately loads the configuration.
    /// Accepts either a direct path to `hub.toml` or a directory containing it.
    pub fn new(config_path: PathBuf) -> Result<Self> {
        let config_path = if config_path.is_dir() {
            config_path.join(HUB_CONFIG_FILE)
        } else {
            config_path
        };

        if !config_path.exists() {
            return Err(anyhow::anyhow!(
                "configuration file does not exist: {}",
                config_path.display()
            ));
        }

        let mut manager = Self {
            config_path,
            hub_config: None,
        };
        manager.load_config()?;
        Ok(manager)
    }

    pub fn load_config(&mut self) -> Result<()> {
        info!("loading hub configuration from {}", self.config_path.display());

        let content = std::fs::read_to_string(&self.config_path)
            .with_context(|| format!("failed to read {}", self.config_path.display()))?;

        let hub_config: HubConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", self.config_path.display()))?;

        hub_config
            .validate()
            .with_context(|| format!("invalid hub configuration in {}", self.config_path.display()))?;

        debug!(listen_address = %hub_config.listen_address, "hub configuration loaded");
        debug!(
            api_key = if hub_config.api_key.is_empty() { "<empty>" } else { "<redacted>" },
        );
        debug!(channels = hub_config.channels.len(), "configured channels");
        debug!(maxjobs = hub_config.scheduler.maxjobs, "scheduler maxjobs");

        self.hub_config = Some(hub_config);
        Ok(())
    }

    /// Reloads the configuration file, restoring the prior configuration on
    /// failure so the hub keeps running with a known-good state. Returns
    /// whether the reload actually changed anything observable.
    pub fn reload_config(&mut self) -> Result<bool> {
        let old_config = self.hub_config.clone();
        match self.load_config() {
            Ok(()) => {
                let changed = old_config.as_ref() != self.hub_config.as_ref();
                if changed {
                    info!("hub configuration changed and reloaded");
                } else {
                    debug!("hub configuration unchanged");
                }
                Ok(changed)
            }
            Err(e) => {
                self.hub_config = old_config;
                Err(e)
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.hub_config.is_some()
    }

    /// Panics only if called before a successful `new`/`load_config`, which
    /// the constructor guarantees cannot happen.
    pub fn config(&self) -> &HubConfig {
        self.hub_config
            .as_ref()
            .expect("hub configuration should be loaded")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn new_fails_on_missing_file() {
        let result = ConfigManager::new(PathBuf::from("/nonexistent/hub.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn loads_minimal_valid_config() {
        let file = write_config(
            r#"
            listen_address = "127.0.0.1:8080"
            api_key = "secret"
            database_path = "/tmp/koji-test"
            "#,
        );
        let manager = ConfigManager::new(file.path().to_path_buf()).unwrap();
        assert!(manager.is_loaded());
        assert_eq!(manager.config().listen_address, "127.0.0.1:8080");
        assert_eq!(manager.config().scheduler.maxjobs, 15);
    }

    #[test]
    fn reload_detects_no_change() {
        let file = write_config(
            r#"
            listen_address = "127.0.0.1:8080"
            api_key = "secret"
            database_path = "/tmp/koji-test"
            "#,
        );
        let mut manager = ConfigManager::new(file.path().to_path_buf()).unwrap();
        let changed = manager.reload_config().unwrap();
        assert!(!changed);
    }
}
