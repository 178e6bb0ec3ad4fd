use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::background::DEFAULT_HISTORY_LIMIT;
use crate::dedup::DEFAULT_CAPTURE_WINDOW;

/// Runtime configuration, read from `~/.chat-capture/config.json` when present
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Quiet period after the last page change before capturing
    pub debounce_ms: u64,
    /// Delay of the one-shot capture after start
    pub initial_delay_ms: u64,
    /// How often the watcher re-reads the snapshot file
    pub poll_interval_ms: u64,
    /// Recently captured turns remembered for deduplication
    pub capture_window: usize,
    /// Cap on locally persisted history
    pub history_limit: usize,
    /// Base URL of the prompt API, remote forwarding is off when unset
    pub api_base_url: Option<String>,
    pub request_timeout_secs: u64,
    /// SQLite file backing local storage, defaults under the config directory
    pub storage_path: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            initial_delay_ms: 2000,
            poll_interval_ms: 500,
            capture_window: DEFAULT_CAPTURE_WINDOW,
            history_limit: DEFAULT_HISTORY_LIMIT,
            api_base_url: None,
            request_timeout_secs: 30,
            storage_path: None,
        }
    }
}

impl CaptureConfig {
    /// Load from `path`, or the default location. A missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config: CaptureConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        Ok(config)
    }

    pub fn config_dir() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Ok(PathBuf::from(home).join(".chat-capture"))
    }

    fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    pub fn storage_path(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("storage.sqlite")),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture_window == 0 {
            return Err(anyhow!("❌ capture_window must be at least 1"));
        }
        if self.history_limit == 0 {
            return Err(anyhow!("❌ history_limit must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("❌ poll_interval_ms must be greater than 0"));
        }
        if let Some(url) = &self.api_base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(anyhow!("❌ api_base_url must be an http(s) URL, got {}", url));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = CaptureConfig::load(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(config.debounce(), Duration::from_secs(1));
        assert_eq!(config.initial_delay(), Duration::from_secs(2));
        assert_eq!(config.capture_window, 50);
        assert_eq!(config.history_limit, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"debounce_ms": 0, "api_base_url": "http://localhost:5000/api"}"#).unwrap();
        let config = CaptureConfig::load(Some(&path)).unwrap();
        assert_eq!(config.debounce_ms, 0);
        assert_eq!(config.initial_delay_ms, 2000);
        assert_eq!(config.api_base_url.as_deref(), Some("http://localhost:5000/api"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = CaptureConfig {
            history_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CaptureConfig {
            api_base_url: Some("ftp://host".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_storage_path() {
        let config = CaptureConfig {
            storage_path: Some(PathBuf::from("/tmp/store.sqlite")),
            ..Default::default()
        };
        assert_eq!(config.storage_path().unwrap(), PathBuf::from("/tmp/store.sqlite"));
    }
}
