//! Configuration management for the build host daemon
//!
//! Handles loading and validation of the daemon's configuration from a
//! `host.toml` file. Mirrors `server::config::ConfigManager`.

use anyhow::{Context, Result};
use koji_common::config::HostConfig;
use std::path::PathBuf;
use tracing::{debug, info};

const HOST_CONFIG_FILE: &str = "host.toml";

/// Manages the build host's configuration. Always holds a validated
/// `HostConfig` once constructed successfully.
pub struct ConfigManager {
    pub config_path: PathBuf,
    pub host_config: Option<HostConfig>,
}

impl ConfigManager {
    /// Creates a new `ConfigManager` and immediately loads the configuration.
    /// Accepts either a direct path to `host.toml` or a directory containing it.
    pub fn new(config_path: PathBuf) -> Result<Self> {
        let config_path = if config_path.is_dir() {
            config_path.join(HOST_CONFIG_FILE)
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
            host_config: None,
        };
        manager.load_config()?;
        Ok(manager)
    }

    pub fn load_config(&mut self) -> Result<()> {
        info!("loading host configuration from {}", self.config_path.display());

        let content = std::fs::read_to_string(&self.config_path)
            .with_context(|| format!("failed to read {}", self.config_path.display()))?;

        let host_config: HostConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", self.config_path.display()))?;

        host_config
            .validate()
            .with_context(|| format!("invalid host configuration in {}", self.config_path.display()))?;

        debug!(name = %host_config.name, hub_url = %host_config.hub_url, "host configuration loaded");
        debug!(arches = %host_config.arches, capacity = host_config.capacity, "host capabilities");

        self.host_config = Some(host_config);
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.host_config.is_some()
    }

    /// Panics only if called before a successful `new`/`load_config`, which
    /// the constructor guarantees cannot happen.
    pub fn config(&self) -> &HostConfig {
        self.host_config
            .as_ref()
            .expect("host configuration should be loaded")
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
        let result = ConfigManager::new(PathBuf::from("/nonexistent/host.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn loads_minimal_valid_config() {
        let file = write_config(
            r#"
            name = "builder1"
            hub_url = "http://localhost:8080"
            api_key = "secret"
            arches = "x86_64"
            channels = [1]
            capacity = 4.0
            "#,
        );
        let manager = ConfigManager::new(file.path().to_path_buf()).unwrap();
        assert!(manager.is_loaded());
        assert_eq!(manager.config().name, "builder1");
        assert_eq!(manager.config().poll_interval_seconds, 15);
    }

    #[test]
    fn rejects_config_with_no_channels() {
        let file = write_config(
            r#"
            name = "builder1"
            hub_url = "http://localhost:8080"
            arches = "x86_64"
            channels = []
            capacity = 4.0
            "#,
        );
        let result = ConfigManager::new(file.path().to_path_buf());
        assert!(result.is_err());
    }
}
