//! Configuration management for the bastion gateway.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/bastion-gateway/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be between 1 and 3600 seconds, got {value}")]
    InvalidTimeout { name: &'static str, value: u64 },

    #[error("search_limit must be greater than 0, got {0}")]
    InvalidSearchLimit(usize),

    #[error("channel_capacity must be greater than 0, got {0}")]
    InvalidChannelCapacity(usize),

    #[error("container root must be an absolute path, got {0}")]
    InvalidContainerRoot(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("asset {0} is listed more than once")]
    DuplicateAsset(String),

    #[error("asset {0} has neither password, private_key nor local_root")]
    MissingCredentials(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for transfer deadlines, in seconds.
const MAX_TIMEOUT_SECS: u64 = 3600;

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General gateway configuration.
    pub gateway: GatewayConfig,

    /// Transfer deadlines and limits.
    pub transfer: TransferConfig,

    /// Container exec settings.
    pub container: ContainerConfig,


    /// Audit log output.
    pub audit: AuditConfig,

    /// Statically configured assets.
    pub assets: Vec<AssetConfig>,
}

/// General gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Directory for gateway data.
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Write logs to daily files in this directory instead of stderr.
    pub log_dir: Option<PathBuf>,
}

/// Transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Read deadline in seconds (default: 300).
    pub read_timeout_secs: u64,

    /// Write deadline in seconds (default: 300).
    pub write_timeout_secs: u64,

    /// Maximum number of search results.
    pub search_limit: usize,
}

/// Container exec configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContainerConfig {
    /// Directory inside containers that the volume root maps to.
    pub root: String,

    /// Program used as the control-plane exec channel.
    pub kubectl: String,

    /// Skip TLS verification of the control plane.
    pub skip_tls_verify: bool,
}

/// Audit log configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    /// JSON-lines file records are appended to. Unset logs records only.
    pub log_path: Option<PathBuf>,

    /// Records buffered before new ones are dropped.
    pub channel_capacity: usize,
}

/// One statically configured asset with its credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AssetConfig {
    pub id: String,
    pub hostname: String,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,

    /// Control-plane address when the asset is a cluster application.
    pub cluster: Option<String>,

    /// Control-plane bearer token.
    pub token: Option<String>,

    /// Serve the asset from this gateway directory instead of over SFTP.
    pub local_root: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: 300, // 5 minutes
            write_timeout_secs: 300,
            search_limit: 200,
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            root: "/tmp".to_string(),
            kubectl: "kubectl".to_string(),
            skip_tls_verify: true,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            channel_capacity: 1024,
        }
    }
}

impl TransferConfig {
    /// Read deadline as a duration.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Write deadline as a duration.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bastion-gateway")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bastion-gateway")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - BASTION_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - BASTION_CONTAINER_ROOT: Override the container root directory
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("BASTION_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.gateway.log_level = level;
            }
        }

        if let Ok(root) = std::env::var("BASTION_CONTAINER_ROOT") {
            if !root.is_empty() {
                tracing::info!("Overriding container root from environment: {}", root);
                self.container.root = root;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("read_timeout_secs", self.transfer.read_timeout_secs),
            ("write_timeout_secs", self.transfer.write_timeout_secs),
        ] {
            if value == 0 || value > MAX_TIMEOUT_SECS {
                return Err(ConfigError::InvalidTimeout { name, value });
            }
        }

        if self.transfer.search_limit == 0 {
            return Err(ConfigError::InvalidSearchLimit(self.transfer.search_limit));
        }

        if self.audit.channel_capacity == 0 {
            return Err(ConfigError::InvalidChannelCapacity(self.audit.channel_capacity));
        }

        if !self.container.root.starts_with('/') {
            return Err(ConfigError::InvalidContainerRoot(self.container.root.clone()));
        }

        let level = self.gateway.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.gateway.log_level.clone()));
        }

        let mut seen = std::collections::HashSet::new();
        for asset in &self.assets {
            if !seen.insert(asset.id.as_str()) {
                return Err(ConfigError::DuplicateAsset(asset.id.clone()));
            }
            let is_application = asset.cluster.is_some();
            if !is_application
                && asset.password.is_none()
                && asset.private_key.is_none()
                && asset.local_root.is_none()
            {
                return Err(ConfigError::MissingCredentials(asset.id.clone()));
            }
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.gateway.log_level, "info");
        assert!(config.gateway.log_dir.is_none());
        assert_eq!(config.transfer.read_timeout_secs, 300);
        assert_eq!(config.transfer.write_timeout(), Duration::from_secs(300));
        assert_eq!(config.transfer.search_limit, 200);
        assert_eq!(config.container.root, "/tmp");
        assert_eq!(config.container.kubectl, "kubectl");
        assert!(config.container.skip_tls_verify);
        assert_eq!(config.audit.channel_capacity, 1024);
        assert!(config.assets.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml(
            r#"
            [transfer]
            read_timeout_secs = 60

            [container]
            root = "/srv"
            "#,
        )
        .unwrap();

        assert_eq!(config.transfer.read_timeout_secs, 60);
        assert_eq!(config.transfer.write_timeout_secs, 300);
        assert_eq!(config.container.root, "/srv");
        assert_eq!(config.container.kubectl, "kubectl");
    }

    #[test]
    fn test_from_toml_assets() {
        let config = Config::from_toml(
            r#"
            [[assets]]
            id = "a1"
            hostname = "web-01"
            address = "10.0.0.10"
            port = 22
            username = "root"
            password = "secret"

            [[assets]]
            id = "k8s"
            hostname = "cluster"
            cluster = "https://k8s.example:6443"
            token = "t0ken"
            username = "deploy"
            "#,
        )
        .unwrap();

        assert_eq!(config.assets.len(), 2);
        assert_eq!(config.assets[0].port, 22);
        assert_eq!(config.assets[1].cluster.as_deref(), Some("https://k8s.example:6443"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[transfer\nread_timeout_secs = 1");
        assert!(result.is_err());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("Invalid TOML configuration"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let result = Config::from_toml("[transfer]\nsearch_limit = \"lots\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::default();
        config.gateway.log_dir = Some(PathBuf::from("/var/log/bastion"));
        config.audit.log_path = Some(PathBuf::from("/var/log/bastion/ftp.jsonl"));
        config.assets.push(AssetConfig {
            id: "a1".to_string(),
            password: Some("pw".to_string()),
            ..Default::default()
        });

        let toml_str = config.to_toml().unwrap();
        let parsed = Config::from_toml(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("dir").join("config.toml");

        let config = Config::default();
        config.save(&config_path).unwrap();

        assert!(config_path.exists());
        assert_eq!(Config::load(&config_path).unwrap(), config);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "not [valid toml").unwrap();

        let msg = format!("{:#}", Config::load(&config_path).unwrap_err());
        assert!(msg.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("bastion-gateway"));
        assert!(path.ends_with("config.toml"));
    }

    #[test]
    fn test_validate_timeouts() {
        let mut config = Config::default();
        config.transfer.read_timeout_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidTimeout {
                name: "read_timeout_secs",
                value: 0
            })
        );

        config.transfer.read_timeout_secs = 300;
        config.transfer.write_timeout_secs = 3601;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidTimeout {
                name: "write_timeout_secs",
                value: 3601
            })
        );
    }

    #[test]
    fn test_validate_limits() {
        let mut config = Config::default();
        config.transfer.search_limit = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidSearchLimit(0)));

        let mut config = Config::default();
        config.audit.channel_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidChannelCapacity(0)));
    }

    #[test]
    fn test_validate_container_root() {
        let mut config = Config::default();
        config.container.root = "tmp".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidContainerRoot("tmp".to_string()))
        );
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.gateway.log_level = "loud".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("loud".to_string()))
        );

        config.gateway.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_assets() {
        let mut config = Config::default();
        config.assets.push(AssetConfig {
            id: "a1".to_string(),
            ..Default::default()
        });
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingCredentials("a1".to_string()))
        );

        config.assets[0].local_root = Some(PathBuf::from("/srv/staging"));
        assert!(config.validate().is_ok());

        config.assets[0].local_root = None;
        config.assets[0].password = Some("pw".to_string());
        config.assets.push(config.assets[0].clone());
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateAsset("a1".to_string()))
        );
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::set_var("BASTION_LOG_LEVEL", "debug");
        let mut config = Config::default();
        config.apply_env_overrides();
        std::env::remove_var("BASTION_LOG_LEVEL");

        assert_eq!(config.gateway.log_level, "debug");
    }

    #[test]
    #[serial]
    fn test_env_override_container_root() {
        std::env::set_var("BASTION_CONTAINER_ROOT", "/data");
        let mut config = Config::default();
        config.apply_env_overrides();
        std::env::remove_var("BASTION_CONTAINER_ROOT");

        assert_eq!(config.container.root, "/data");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("BASTION_LOG_LEVEL", "");
        let mut config = Config::default();
        config.apply_env_overrides();
        std::env::remove_var("BASTION_LOG_LEVEL");

        assert_eq!(config.gateway.log_level, "info");
    }
}
