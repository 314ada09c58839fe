//! Status channel configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::error::{ChannelError, Result};

/// Status channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// WebSocket endpoint, e.g. `wss://lab.example.com/ws/status`
    #[serde(default = "default_url")]
    pub url: String,
    /// Query parameter carrying `Bearer <token>`; the transport has no headers
    #[serde(default = "default_token_param")]
    pub token_param: String,
    /// How long a query waits for its response, in milliseconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,
    /// Reconnection configuration
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_url() -> String {
    "ws://localhost:8000/ws/status".to_string()
}

fn default_token_param() -> String {
    "access_token_v2".to_string()
}

fn default_query_timeout() -> u64 {
    10000 // 10 seconds
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            token_param: default_token_param(),
            query_timeout_ms: default_query_timeout(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ChannelConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Endpoint URL with the token appended as a query parameter.
    pub fn endpoint_url(&self, access_token: &str) -> Result<Url> {
        let mut url = Url::parse(&self.url)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ChannelError::InvalidConfig(format!(
                    "unsupported scheme '{other}', expected ws or wss"
                )))
            }
        }
        url.query_pairs_mut()
            .append_pair(&self.token_param, &format!("Bearer {access_token}"));
        Ok(url)
    }
}

/// Reconnection configuration: fixed interval, capped attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Delay before every reconnect attempt in milliseconds
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    /// Attempts after which the channel stays disconnected
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    3000
}

fn default_max_attempts() -> u32 {
    5
}
