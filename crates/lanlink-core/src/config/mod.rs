//! Configuration management for LanLink.
//!
//! This module handles loading, saving, and managing LanLink configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/lanlink/config.toml` |
//! | macOS | `~/Library/Application Support/com.lanlink.LanLink/config.toml` |
//! | Windows | `%APPDATA%\lanlink\LanLink\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use lanlink_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Nickname: {}", config.general.nickname);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Main configuration struct for LanLink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Network settings
    pub network: NetworkConfig,
    /// Transfer settings
    pub transfer: TransferConfig,
    /// History settings
    pub history: HistoryConfig,
}

/// General configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Display name announced to peers
    pub nickname: String,
    /// Fixed user id; derived from the hostname when unset
    pub user_id: Option<Uuid>,
    /// Directory for received files
    pub download_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            nickname: hostname::get().map_or_else(
                |_| "LanLink User".to_string(),
                |h| h.to_string_lossy().to_string(),
            ),
            user_id: None,
            download_dir: None,
        }
    }
}

impl GeneralConfig {
    /// Resolve the download directory, falling back to `~/Downloads/LanLink`.
    #[must_use]
    pub fn resolved_download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(default_download_dir)
    }
}

/// Default location for received files.
#[must_use]
pub fn default_download_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| {
            dirs.download_dir()
                .map_or_else(|| dirs.home_dir().join("Downloads"), PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from("Downloads"))
        .join("LanLink")
}

/// Network configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP service port
    pub tcp_port: u16,
    /// UDP discovery port
    pub discovery_port: u16,
    /// Client heartbeat interval
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// Presence broadcast interval
    #[serde(with = "humantime_serde")]
    pub broadcast_interval: Duration,
    /// Silence after which a peer is dropped
    #[serde(with = "humantime_serde")]
    pub user_timeout: Duration,
    /// Delay between reconnect attempts
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tcp_port: crate::DEFAULT_TCP_PORT,
            discovery_port: crate::DEFAULT_DISCOVERY_PORT,
            heartbeat_interval: crate::DEFAULT_HEARTBEAT_INTERVAL,
            broadcast_interval: crate::DEFAULT_HEARTBEAT_INTERVAL,
            user_timeout: crate::DEFAULT_USER_TIMEOUT,
            reconnect_delay: crate::DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Size of one file block in bytes
    pub block_size: usize,
    /// Throttle between outbound blocks
    #[serde(with = "humantime_serde")]
    pub send_interval: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: crate::DEFAULT_BLOCK_SIZE,
            send_interval: crate::DEFAULT_SEND_INTERVAL,
        }
    }
}

/// History configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Enable transfer history
    pub enabled: bool,
    /// Maximum number of entries to keep
    pub max_entries: usize,
    /// Suppress history and clear what is already stored
    pub incognito: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 100,
            incognito: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that parse but cannot work.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.transfer.block_size == 0 {
            return Err(invalid("transfer.block_size", "must be at least 1 byte"));
        }
        if self.network.user_timeout <= self.network.broadcast_interval {
            return Err(invalid(
                "network.user_timeout",
                "must be longer than network.broadcast_interval",
            ));
        }
        if self.network.tcp_port != 0 && self.network.tcp_port == self.network.discovery_port {
            return Err(invalid(
                "network.discovery_port",
                "must differ from network.tcp_port",
            ));
        }
        Ok(())
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                crate::error::Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| {
            crate::error::Error::ConfigError(format!("Failed to serialize config: {e}"))
        })?;

        std::fs::write(path, content)
            .map_err(|e| crate::error::Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "lanlink", "LanLink")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Get the data directory used by the contact and history stores.
    #[must_use]
    pub fn data_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "lanlink", "LanLink")
            .map(|dirs| dirs.data_dir().to_path_buf())
    }
}

fn invalid(key: &str, reason: &str) -> crate::error::Error {
    crate::error::Error::InvalidConfig {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();
        s.strip_suffix("ms")
            .map(|millis| {
                millis
                    .parse()
                    .map(Duration::from_millis)
                    .map_err(serde::de::Error::custom)
            })
            .or_else(|| {
                s.strip_suffix('s').map(|secs| {
                    secs.parse()
                        .map(Duration::from_secs)
                        .map_err(serde::de::Error::custom)
                })
            })
            .or_else(|| {
                s.strip_suffix('m').map(|mins| {
                    mins.parse::<u64>()
                        .map(|m| Duration::from_secs(m * 60))
                        .map_err(serde::de::Error::custom)
                })
            })
            .unwrap_or_else(|| Err(serde::de::Error::custom("invalid duration format")))
    }
}
