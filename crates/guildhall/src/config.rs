//! Configuration management for the Guildhall server.
//!
//! This module handles loading and validation of the TOML configuration file.
//! The guild, party, storage and friend rule sections are the library's
//! [`RulesConfig`], flattened into the top level of the file.

use anyhow::Context;
use guildhall_core::sync::DEFAULT_DEDUP_CAPACITY;
use guildhall_core::RulesConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// `[guilds]`, `[parties]`, `[storage]` and `[friends]`
    #[serde(flatten)]
    pub rules: RulesConfig,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the sync gateway listens on (e.g., "127.0.0.1:7400")
    pub bind_address: String,
    /// Name this node reports in its logs
    pub node_name: String,
    /// Directory holding guild, storage and friend records
    pub data_dir: String,
    /// Keep all state in memory instead of `data_dir`
    pub ephemeral: bool,
    /// Number of recent sync replies remembered for duplicate detection
    pub dedup_cache_size: usize,
    /// Seconds between health reports (0 to disable)
    pub stats_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7400".to_string(),
            node_name: "guildhall-1".to_string(),
            data_dir: "data".to_string(),
            ephemeral: false,
            dedup_cache_size: DEFAULT_DEDUP_CAPACITY,
            stats_interval_secs: 60,
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.server.data_dir)
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }

        if self.server.node_name.trim().is_empty() {
            return Err("Node name cannot be empty".to_string());
        }

        if !self.server.ephemeral && self.server.data_dir.is_empty() {
            return Err("Data directory cannot be empty".to_string());
        }

        if self.server.dedup_cache_size == 0 {
            return Err("dedup_cache_size must be at least 1".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        self.rules.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guildhall_core::{ExperienceStrategy, LootStrategy};
    use tempfile::TempDir;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.server.bind_address, "127.0.0.1:7400");
        assert_eq!(config.server.dedup_cache_size, 1024);
        assert!(!config.server.ephemeral);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.rules.parties.max_size, 5);
        assert_eq!(config.rules.storage.initial_slots, 27);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("guildhall.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        // The written file loads back to the same configuration
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_load_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("guildhall.toml");
        let toml_content = r#"
[server]
bind_address = "0.0.0.0:7500"

[parties]
max_size = 8
default_loot_strategy = "NEED_BEFORE_GREED"

[storage]
interest_rate = 0.02
"#;
        tokio::fs::write(&path, toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&path).await.unwrap();

        assert_eq!(config.server.bind_address, "0.0.0.0:7500");
        assert_eq!(config.server.node_name, "guildhall-1");
        assert_eq!(config.rules.parties.max_size, 8);
        assert_eq!(config.rules.parties.default_experience_strategy, ExperienceStrategy::Equal);
        // Unknown loot strategy names fall back to round robin
        assert_eq!(config.rules.parties.default_loot_strategy, LootStrategy::RoundRobin);
        assert_eq!(config.rules.storage.interest_rate, 0.02);
        assert_eq!(config.rules.storage.upgrade_cost, 10_000.0);
        assert_eq!(config.rules.guilds.progression.max_level, 25);
        assert_eq!(config.logging.level, "info");
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("guildhall.toml");
        tokio::fs::write(&path, "[server\nbind_address = ").await.unwrap();
        assert!(AppConfig::load_from_file(&path).await.is_err());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.server.bind_address = "invalid".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.dedup_cache_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rules.guilds.min_name_length = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ephemeral_node_needs_no_data_dir() {
        let mut config = AppConfig::default();
        config.server.data_dir.clear();
        assert!(config.validate().is_err());
        config.server.ephemeral = true;
        assert!(config.validate().is_ok());
    }
}
