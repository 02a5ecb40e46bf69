//! Host-level settings shared by every user of one relay process.
//!
//! These are not per-user: the storage root, the relay's public URL (used to
//! build click-through links), and HTTP behaviour for the ntfy transport.
//!
//! Resolution order:
//! 1. `{storage_dir}/host.json` if present, otherwise defaults
//! 2. Environment overrides (`LOUNGE_NTFY_BASE_URL`, `LOUNGE_NTFY_REQUEST_TIMEOUT`)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name, used for the default storage directory.
pub const APP_NAME: &str = "lounge-ntfy";

/// Env var overriding the storage directory.
pub const STORAGE_DIR_ENV: &str = "LOUNGE_NTFY_STORAGE_DIR";

/// Settings file name inside the storage directory.
const HOST_FILE_NAME: &str = "host.json";

/// Host settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    /// Public URL of the relay web client, e.g. `https://irc.example.com`.
    /// Click-through links are only added when this is set.
    pub base_url: Option<String>,
    /// Timeout in seconds for a single ntfy publish request.
    pub request_timeout_secs: u64,
    /// ntfy tags attached to every notification.
    pub default_tags: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: 10,
            default_tags: vec!["speech_balloon".to_string()],
        }
    }
}

impl HostConfig {
    /// Resolve the storage directory.
    ///
    /// Priority: explicit argument, then `LOUNGE_NTFY_STORAGE_DIR`, then the
    /// platform config directory (`~/.config/lounge-ntfy` on Linux).
    pub fn storage_dir(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(dir) = explicit {
            return Ok(dir.to_path_buf());
        }

        if let Ok(dir) = std::env::var(STORAGE_DIR_ENV) {
            return Ok(PathBuf::from(dir));
        }

        dirs::config_dir()
            .context("Could not determine config directory")
            .map(|d| d.join(APP_NAME))
    }

    /// Load from `{storage_dir}/host.json`, then apply env overrides.
    pub fn load(storage_dir: &Path) -> Result<Self> {
        let mut config = Self::load_from_file(storage_dir)?.unwrap_or_default();
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file(storage_dir: &Path) -> Result<Option<Self>> {
        let path = storage_dir.join(HOST_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?;
        Ok(Some(config))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(base_url) = std::env::var("LOUNGE_NTFY_BASE_URL") {
            self.base_url = if base_url.is_empty() {
                None
            } else {
                Some(base_url)
            };
        }

        if let Ok(timeout) = std::env::var("LOUNGE_NTFY_REQUEST_TIMEOUT") {
            match timeout.parse::<u64>() {
                Ok(secs) => self.request_timeout_secs = secs,
                Err(e) => log::warn!(
                    "Ignoring LOUNGE_NTFY_REQUEST_TIMEOUT={}: {}",
                    timeout,
                    e
                ),
            }
        }
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.base_url, None);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.default_tags, vec!["speech_balloon".to_string()]);
    }

    #[test]
    fn test_load_from_file_partial() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(HOST_FILE_NAME),
            r#"{ "base_url": "https://irc.example.com" }"#,
        )
        .unwrap();

        let config = HostConfig::load_from_file(dir.path()).unwrap().unwrap();
        assert_eq!(config.base_url.as_deref(), Some("https://irc.example.com"));
        assert_eq!(config.request_timeout_secs, 10);
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(HostConfig::load_from_file(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_explicit_storage_dir_wins() {
        let dir = HostConfig::storage_dir(Some(Path::new("/srv/lounge"))).unwrap();
        assert_eq!(dir, PathBuf::from("/srv/lounge"));
    }
}
