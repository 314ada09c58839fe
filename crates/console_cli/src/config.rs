use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use session_manager::SessionConfig;
use status_channel::ChannelConfig;

use crate::paths::{config_json_path, labconsole_dir};

const CONFIG_FILE_PATH: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Directory holding `session.json`; defaults to `~/.labconsole`
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    #[serde(default)]
    pub http_proxy: String,
    #[serde(default)]
    pub https_proxy: String,
    /// Retries for transient REST failures (5xx, connection resets)
    #[serde(default = "default_transient_retries")]
    pub max_transient_retries: u32,
}

fn default_transient_retries() -> u32 {
    3
}

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            channel: ChannelConfig::default(),
            storage_dir: None,
            http_proxy: String::new(),
            https_proxy: String::new(),
            max_transient_retries: default_transient_retries(),
        }
    }
}

impl Config {
    /// `~/.labconsole/config.json`, then `./config.toml`, then environment.
    pub fn load() -> Self {
        let mut config = Self::from_files(&config_json_path(), Path::new(CONFIG_FILE_PATH));
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Loads `explicit` (JSON or TOML by extension), then environment.
    pub fn load_from(explicit: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(explicit)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", explicit.display()))?;
        let mut config: Config = if explicit.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_files(json_path: &Path, toml_path: &Path) -> Self {
        if json_path.exists() {
            match std::fs::read_to_string(json_path)
                .map_err(anyhow::Error::from)
                .and_then(|content| Ok(serde_json::from_str::<Config>(&content)?))
            {
                Ok(config) => return config,
                Err(e) => tracing::warn!("Ignoring {}: {}", json_path.display(), e),
            }
        }

        if toml_path.exists() {
            match std::fs::read_to_string(toml_path)
                .map_err(anyhow::Error::from)
                .and_then(|content| Ok(toml::from_str::<Config>(&content)?))
            {
                Ok(config) => return config,
                Err(e) => tracing::warn!("Ignoring {}: {}", toml_path.display(), e),
            }
        }

        Config::default()
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(backend_url) = var("LAB_BACKEND_URL") {
            self.session.backend_url = backend_url;
        }
        if let Some(ws_url) = var("LAB_STATUS_WS_URL") {
            self.channel.url = ws_url;
        }
        if let Some(storage_dir) = var("LAB_STORAGE_DIR") {
            self.storage_dir = Some(PathBuf::from(storage_dir));
        }
        if let Some(http_proxy) = var("HTTP_PROXY") {
            self.http_proxy = http_proxy;
        }
        if let Some(https_proxy) = var("HTTPS_PROXY") {
            self.https_proxy = https_proxy;
        }
        if let Some(disabled) = var("LAB_RECONNECT_DISABLED") {
            self.channel.reconnect.enabled = !parse_bool_env(&disabled);
        }
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(labconsole_dir)
    }
}
