use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_DIR: &str = "socialhome";
const CONFIG_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Socialhome instance, e.g. https://socialhome.network
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long a fetch may run before the loading indicator is raised
    #[serde(default = "default_loading_delay")]
    pub loading_indicator_delay_ms: u64,

    #[serde(default = "default_toast_lifetime")]
    pub toast_lifetime_secs: u64,

    /// Upper bound on live-notification ids kept per stream
    #[serde(default = "default_max_unfetched_backlog")]
    pub max_unfetched_backlog: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            loading_indicator_delay_ms: default_loading_delay(),
            toast_lifetime_secs: default_toast_lifetime(),
            max_unfetched_backlog: default_max_unfetched_backlog(),
        }
    }
}

impl ClientConfig {
    /// Reads the config file when present, then applies env overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::default_path().context("no config directory on this platform")?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let raw = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, raw).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn apply_env(&mut self) {
        if let Some(base_url) = env::var("SOCIALHOME_BASE_URL")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
        {
            self.base_url = base_url;
        }
        if let Some(timeout) = env::var("SOCIALHOME_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
        {
            self.request_timeout_secs = timeout;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn loading_indicator_delay(&self) -> Duration {
        Duration::from_millis(self.loading_indicator_delay_ms)
    }

    pub fn toast_lifetime(&self) -> Duration {
        Duration::from_secs(self.toast_lifetime_secs)
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_loading_delay() -> u64 {
    500
}

fn default_toast_lifetime() -> u64 {
    5
}

fn default_max_unfetched_backlog() -> usize {
    200
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_fields_take_defaults() {
        let config: ClientConfig = toml::from_str("base_url = \"https://example.org\"").unwrap();
        assert_eq!(config.base_url, "https://example.org");
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.loading_indicator_delay(), Duration::from_millis(500));
        assert_eq!(config.max_unfetched_backlog, 200);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let config = ClientConfig {
            base_url: "https://socialhome.network".into(),
            toast_lifetime_secs: 9,
            ..ClientConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(ClientConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "request_timeout_secs = \"soon\"").unwrap();
        let err = ClientConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("invalid config"));
    }
}
