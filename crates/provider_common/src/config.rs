//! Provider configuration

use crate::channel::{ReadPolicy, DEFAULT_READ_TIMEOUT, DEFAULT_WINDOW_SIZE};
use crate::error::{ProviderError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunables for every provider, read from `provider.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub watch: WatchConfig,
    pub channel: ChannelConfig,
    pub copy: CopyConfig,
    pub observe: ObserveConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    /// Report every change as an overflow instead of per-entry events
    pub overflow_events: bool,
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            overflow_events: false,
            poll_interval_ms: 1000,
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    /// Bytes fetched per backend read
    pub window_size: usize,
    pub timeout_ms: u64,
    pub cancel_pending_read: bool,
    pub join_cancelled_read: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            cancel_pending_read: true,
            join_cancelled_read: false,
        }
    }
}

impl ChannelConfig {
    pub fn to_read_policy(&self) -> ReadPolicy {
        ReadPolicy {
            window_size: self.window_size.max(1),
            timeout: Duration::from_millis(self.timeout_ms),
            cancel_pending_read: self.cancel_pending_read,
            join_cancelled_read: self.join_cancelled_read,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CopyConfig {
    pub progress_interval_ms: u64,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 500,
        }
    }
}

impl CopyConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObserveConfig {
    /// Minimum spacing between two notifications of one observer
    pub interval_ms: u64,
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

impl ObserveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// How long matches are batched before the listener sees them
    pub interval_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { interval_ms: 500 }
    }
}

impl SearchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl ProviderConfig {
    /// Load from the default location, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("Using default provider configuration");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ProviderError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::info!("Configuration loaded from {:?}", path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| ProviderError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        tracing::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        ProjectDirs::from("com", "ByteProvider", "ByteProvider")
            .map(|dirs| dirs.config_dir().join("provider.toml"))
            .unwrap_or_else(|| PathBuf::from("./provider.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: ProviderConfig = toml::from_str("[watch]\noverflow_events = true\n").unwrap();
        assert!(config.watch.overflow_events);
        assert_eq!(config.watch.poll_interval_ms, 1000);
        assert_eq!(config.channel, ChannelConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("provider.toml");
        let mut config = ProviderConfig::default();
        config.search.interval_ms = 42;
        config.channel.window_size = 4096;
        config.save_to(&path).unwrap();
        assert_eq!(ProviderConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProviderConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ProviderConfig::default());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provider.toml");
        std::fs::write(&path, "watch = 3").unwrap();
        assert!(matches!(ProviderConfig::load_from(&path), Err(ProviderError::Config(_))));
    }

    #[test]
    fn test_read_policy_never_zero_window() {
        let config = ChannelConfig {
            window_size: 0,
            ..ChannelConfig::default()
        };
        assert_eq!(config.to_read_policy().window_size, 1);
    }
}
