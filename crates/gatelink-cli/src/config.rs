//! Device configuration
//!
//! Stored in ~/.gatelink/config.json. Every field is optional on disk;
//! missing values fall back to the defaults below.

use anyhow::{Context, Result};
use gatelink_control::{ActivationSettings, SshSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR: &str = ".gatelink";

/// How this device reaches other devices over ssh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub binary: String,
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub timeout_secs: u64,
    /// Program invoked on the remote side
    pub remote_program: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            binary: "ssh".to_string(),
            user: None,
            identity_file: None,
            timeout_secs: 30,
            remote_program: "gatelink".to_string(),
        }
    }
}

/// Per-device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatelinkConfig {
    pub database_url: Option<String>,
    /// Name this device is registered under
    pub device_name: Option<String>,
    pub ssh: SshConfig,
    pub task_timeout_secs: u64,
    /// Directory holding the gateway, gateway-link and client-link build contexts
    pub resources_dir: Option<PathBuf>,
}

impl Default for GatelinkConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            device_name: None,
            ssh: SshConfig::default(),
            task_timeout_secs: 120,
            resources_dir: None,
        }
    }
}

impl GatelinkConfig {
    /// Configured store, or the per-device sqlite file
    pub fn database_url(&self) -> Result<String> {
        if let Some(url) = &self.database_url {
            return Ok(url.clone());
        }
        let dir = ConfigManager::config_dir()?;
        Ok(format!(
            "sqlite://{}?mode=rwc",
            dir.join("gatelink.db").display()
        ))
    }

    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            binary: self.ssh.binary.clone(),
            user: self.ssh.user.clone(),
            identity_file: self.ssh.identity_file.clone(),
            remote_program: self.ssh.remote_program.clone(),
        }
    }

    pub fn activation_settings(&self) -> ActivationSettings {
        ActivationSettings {
            shell_timeout: Duration::from_secs(self.ssh.timeout_secs),
            task_timeout: Duration::from_secs(self.task_timeout_secs),
        }
    }
}

/// Configuration manager
pub struct ConfigManager;

impl ConfigManager {
    /// ~/.gatelink
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(CONFIG_DIR))
    }

    fn get_config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load the configuration from ~/.gatelink/config.json
    pub fn load() -> Result<GatelinkConfig> {
        Self::load_from(&Self::get_config_path()?)
    }

    /// Load the configuration from `path`, defaulting when the file is missing
    pub fn load_from(path: &Path) -> Result<GatelinkConfig> {
        if !path.exists() {
            return Ok(GatelinkConfig::default());
        }

        let json =
            fs::read_to_string(path).context(format!("Failed to read config file: {:?}", path))?;

        let config: GatelinkConfig = serde_json::from_str(&json)
            .context(format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Save the configuration to ~/.gatelink/config.json
    pub fn save(config: &GatelinkConfig) -> Result<()> {
        Self::save_to(&Self::get_config_path()?, config)
    }

    pub fn save_to(path: &Path, config: &GatelinkConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create config directory: {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(path, json).context(format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Remember the name this device runs as
    pub fn set_device_name(name: String) -> Result<()> {
        let mut config = Self::load()?;
        config.device_name = Some(name);
        Self::save(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatelinkConfig::default();
        assert!(config.device_name.is_none());
        assert_eq!(config.task_timeout_secs, 120);
        assert_eq!(config.ssh.timeout_secs, 30);
        assert_eq!(config.ssh.remote_program, "gatelink");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: GatelinkConfig =
            serde_json::from_str(r#"{"device_name": "laptop", "ssh": {"user": "ops"}}"#).unwrap();

        assert_eq!(config.device_name.as_deref(), Some("laptop"));
        assert_eq!(config.ssh.user.as_deref(), Some("ops"));
        assert_eq!(config.ssh.binary, "ssh");
        assert_eq!(config.task_timeout_secs, 120);
    }

    #[test]
    fn test_activation_settings_from_timeouts() {
        let mut config = GatelinkConfig::default();
        config.ssh.timeout_secs = 5;
        config.task_timeout_secs = 60;

        let settings = config.activation_settings();
        assert_eq!(settings.shell_timeout, Duration::from_secs(5));
        assert_eq!(settings.task_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_explicit_database_url_wins() {
        let config = GatelinkConfig {
            database_url: Some("sqlite::memory:".to_string()),
            ..Default::default()
        };
        assert_eq!(config.database_url().unwrap(), "sqlite::memory:");
    }
}
