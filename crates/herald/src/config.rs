//! TOML configuration file for the herald node.
//!
//! The file mirrors [`HeraldConfig`] section by section and adds a
//! `[logging]` table. A missing file is created with the defaults.

use herald_core::config::{MessagesConfig, NodeConfig, ReplicationConfig, StoreConfig};
use herald_core::HeraldConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub messages: MessagesConfig,
}

/// Logging system configuration. Logs always go to stderr; stdout carries
/// the bridge protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file, creating a default file if the
    /// path does not exist yet.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Core configuration without the node-only sections.
    pub fn herald(&self) -> HeraldConfig {
        HeraldConfig {
            node: self.node.clone(),
            store: self.store.clone(),
            replication: self.replication.clone(),
            messages: self.messages.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }
        self.herald().validate().map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::adapter::{PlatformKind, PluginMode};
    use herald_core::config::{StoreBackend, TemplateEntry};
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.node.process_id, "herald-1");
        assert_eq!(config.node.mode, PluginMode::Auto);
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("herald.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        // The generated file loads back to the same configuration.
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[node]
process_id = "proxy"
platform = "proxy"
peers = ["survival", "creative"]

[store]
backend = "memory"

[replication]
snapshot_interval = "30s"

[logging]
level = "debug"

[messages]
returning_after = "7d"

[messages.templates]
join = "{player} joined {server}"
first-join = ["Welcome {player}!", "Say hi to {player}!"]
leave = ""

[messages.server_aliases]
survival = "Survival World"
"#;
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.node.platform, PlatformKind::Proxy);
        assert_eq!(config.node.peers.len(), 2);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.json_format);
        assert_eq!(
            config.messages.templates.get("first-join"),
            Some(&TemplateEntry::Variants(vec![
                "Welcome {player}!".to_string(),
                "Say hi to {player}!".to_string(),
            ]))
        );
        assert_eq!(config.messages.time_format, "%H:%M");
        assert!(config.validate().is_ok());
        assert_eq!(config.herald().effective_mode(), PluginMode::Proxy);
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.node.process_id = " ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.contains("process id"), "{}", err);

        let mut config = AppConfig::default();
        config.replication.snapshot_interval = "often".to_string();
        assert!(config.validate().is_err());
    }
}
