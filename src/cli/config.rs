use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::ConnectionConfig;

pub const CONFIG_FILENAME: &str = ".logtail.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub keepalive_secs: Option<u64>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

impl Config {
    /// Load `.logtail.toml` from the working directory, falling back to the
    /// per-user config file.
    pub fn load() -> Result<Self> {
        if Path::new(CONFIG_FILENAME).exists() {
            return load_config_from_path(CONFIG_FILENAME);
        }
        match user_config_path() {
            Some(path) if path.exists() => load_config_from_path(path),
            _ => anyhow::bail!("No {} found", CONFIG_FILENAME),
        }
    }

    pub fn save(&self) -> Result<()> {
        save_config_to_path(self, CONFIG_FILENAME)
    }

    /// Connection tuning with file overrides applied on top of the defaults.
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::default();
        if let Some(secs) = self.keepalive_secs {
            config.keepalive_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = self.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs.max(1));
        }
        config
    }
}

/// `<config_dir>/logtail/config.toml`
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("logtail").join("config.toml"))
}

pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.as_ref().display()))?;
    Ok(config)
}

pub fn save_config_to_path(config: &Config, path: impl AsRef<Path>) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path.as_ref(), content)
        .with_context(|| format!("Failed to write {}", path.as_ref().display()))?;
    Ok(())
}

pub fn try_load_config() -> Option<Config> {
    Config::load().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DEFAULT_KEEPALIVE_INTERVAL;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
endpoint = "logs.example.com:4443"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.endpoint.as_deref(), Some("logs.example.com:4443"));
        assert!(!config.tls);
        assert!(!config.insecure_skip_verify);
        assert_eq!(config.proxy, None);
        assert_eq!(config.keepalive_secs, None);
    }

    #[test]
    fn test_load_config_not_found() {
        let result = load_config_from_path("/nonexistent/.logtail.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        let config = Config {
            endpoint: Some("logs.example.com:4443".to_string()),
            tls: true,
            proxy: Some("proxy.local:3128".to_string()),
            keepalive_secs: Some(10),
            ..Default::default()
        };

        save_config_to_path(&config, &path).unwrap();
        let loaded = load_config_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_connection_config_applies_overrides() {
        let config = Config {
            keepalive_secs: Some(5),
            connect_timeout_secs: Some(0),
            ..Default::default()
        };
        let connection = config.connection_config();
        assert_eq!(connection.keepalive_interval, Duration::from_secs(5));
        assert_eq!(connection.connect_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_connection_config_defaults() {
        let connection = Config::default().connection_config();
        assert_eq!(connection.keepalive_interval, DEFAULT_KEEPALIVE_INTERVAL);
    }
}
