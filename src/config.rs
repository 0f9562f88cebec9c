use crate::core::channel::{ChannelConfig, DEFAULT_NETLINK_FAMILY};
use crate::utils::get_config_dir;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration read from `config.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Netlink protocol family registered by the kernel module
    #[serde(default = "default_family")]
    pub netlink_family: i32,
    #[serde(default)]
    pub multicast_group: u32,
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// Largest response accepted from the kernel
    #[serde(default = "default_receive_buffer_bytes")]
    pub receive_buffer_bytes: usize,
    /// `tracing` level for the log file: trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Append fetch/apply events to the audit log (opt-in)
    #[serde(default)]
    pub enable_event_log: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            netlink_family: default_family(),
            multicast_group: 0,
            receive_timeout_ms: default_receive_timeout_ms(),
            receive_buffer_bytes: default_receive_buffer_bytes(),
            log_level: default_log_level(),
            enable_event_log: false,
        }
    }
}

impl AppConfig {
    pub fn to_channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            family: self.netlink_family,
            multicast_group: self.multicast_group,
            receive_timeout: Duration::from_millis(self.receive_timeout_ms),
            receive_buffer: self.receive_buffer_bytes,
        }
    }

    /// Parsed `log_level`, falling back to INFO for unknown names
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

/// Family baked in at build time via `NLFW_DEFAULT_FAMILY`, else 25
fn default_family() -> i32 {
    option_env!("NLFW_DEFAULT_FAMILY")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_NETLINK_FAMILY)
}

fn default_receive_timeout_ms() -> u64 {
    3500
}

fn default_receive_buffer_bytes() -> usize {
    crate::core::channel::DEFAULT_RECEIVE_BUFFER
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Loads the app config from disk, or returns default if not found.
pub async fn load_config() -> AppConfig {
    match get_config_dir() {
        Some(mut path) => {
            path.push("config.json");
            load_config_from(&path).await
        }
        None => AppConfig::default(),
    }
}

/// Loads a config file. Missing or invalid files yield the defaults.
pub async fn load_config_from(path: &Path) -> AppConfig {
    let Ok(json) = tokio::fs::read_to_string(path).await else {
        return AppConfig::default();
    };
    match serde_json::from_str::<AppConfig>(&json) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Ignoring invalid config file {}: {}", path.display(), e);
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.receive_timeout_ms, 3500);
        assert_eq!(config.multicast_group, 0);
        assert_eq!(config.receive_buffer_bytes, 1024 * 1024);
        assert!(!config.enable_event_log);
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.json")).await;
        assert_eq!(config, AppConfig::default());
    }

    #[tokio::test]
    async fn test_partial_file_keeps_other_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"multicast_group": 17, "log_level": "debug"}}"#
        )
        .unwrap();

        let config = load_config_from(file.path()).await;
        assert_eq!(config.multicast_group, 17);
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);
        assert_eq!(config.receive_timeout_ms, 3500);
    }

    #[tokio::test]
    async fn test_invalid_file_yields_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert_eq!(load_config_from(file.path()).await, AppConfig::default());
    }

    #[test]
    fn test_to_channel_config() {
        let config = AppConfig {
            netlink_family: 31,
            receive_timeout_ms: 250,
            ..AppConfig::default()
        };
        let channel = config.to_channel_config();
        assert_eq!(channel.family, 31);
        assert_eq!(channel.receive_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_unknown_log_level_falls_back() {
        let config = AppConfig {
            log_level: "loud".into(),
            ..AppConfig::default()
        };
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
    }
}
