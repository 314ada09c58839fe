//! Session manager configuration

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SessionError};
use crate::structs::MAX_TTL_SECS;

/// Session manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Backend base URL, e.g. `https://lab.example.com`
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Token refresh endpoint path
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    /// Login endpoint path
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Route the navigator is sent to after logout
    #[serde(default = "default_landing_route")]
    pub landing_route: String,
    /// Subtracted from the server-issued TTL when computing `expires_at`
    #[serde(default = "default_safety_margin")]
    pub safety_margin_secs: u64,
    /// Timeout for the refresh and login calls in milliseconds
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_ms: u64,
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_refresh_path() -> String {
    "/api/auth/refresh".to_string()
}

fn default_login_path() -> String {
    "/api/auth/login".to_string()
}

fn default_landing_route() -> String {
    "/login".to_string()
}

fn default_safety_margin() -> u64 {
    300 // 5 minutes
}

fn default_auth_timeout() -> u64 {
    15000 // 15 seconds
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            refresh_path: default_refresh_path(),
            login_path: default_login_path(),
            landing_route: default_landing_route(),
            safety_margin_secs: default_safety_margin(),
            auth_timeout_ms: default_auth_timeout(),
        }
    }
}

impl SessionConfig {
    pub fn with_backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self
    }

    /// Checks endpoint URLs and the safety margin.
    pub fn validate(&self) -> Result<()> {
        self.refresh_url()?;
        self.login_url()?;
        if self.safety_margin_secs > MAX_TTL_SECS {
            return Err(SessionError::InvalidConfig(format!(
                "safety_margin_secs {} exceeds {}",
                self.safety_margin_secs, MAX_TTL_SECS
            )));
        }
        Ok(())
    }

    pub fn refresh_url(&self) -> Result<Url> {
        self.endpoint(&self.refresh_path)
    }

    pub fn login_url(&self) -> Result<Url> {
        self.endpoint(&self.login_path)
    }

    /// Paths the interceptor must never try to recover, or a failing refresh
    /// would trigger another refresh.
    pub fn is_auth_endpoint(&self, url: &Url) -> bool {
        let path = url.path();
        path == self.refresh_path || path == self.login_path
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let base = Url::parse(&self.backend_url)
            .map_err(|e| SessionError::InvalidConfig(format!("backend_url: {e}")))?;
        base.join(path)
            .map_err(|e| SessionError::InvalidConfig(format!("endpoint {path}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_join_backend_url() {
        let config = SessionConfig::default().with_backend_url("https://lab.example.com/");
        assert_eq!(
            config.refresh_url().unwrap().as_str(),
            "https://lab.example.com/api/auth/refresh"
        );
        assert_eq!(
            config.login_url().unwrap().as_str(),
            "https://lab.example.com/api/auth/login"
        );
    }

    #[test]
    fn invalid_backend_url_is_config_error() {
        let config = SessionConfig::default().with_backend_url("not a url");
        assert!(matches!(
            config.refresh_url(),
            Err(SessionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn oversized_safety_margin_is_config_error() {
        let config = SessionConfig {
            safety_margin_secs: u64::MAX,
            ..SessionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SessionError::InvalidConfig(_))
        ));
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn auth_endpoints_are_recognised_by_path() {
        let config = SessionConfig::default();
        let refresh = Url::parse("http://localhost:8000/api/auth/refresh").unwrap();
        let login = Url::parse("http://localhost:8000/api/auth/login?next=/").unwrap();
        let other = Url::parse("http://localhost:8000/api/devices").unwrap();
        assert!(config.is_auth_endpoint(&refresh));
        assert!(config.is_auth_endpoint(&login));
        assert!(!config.is_auth_endpoint(&other));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"backend_url": "https://lab.example.com"}"#).unwrap();
        assert_eq!(config.safety_margin_secs, 300);
        assert_eq!(config.refresh_path, "/api/auth/refresh");
        assert_eq!(config.landing_route, "/login");
    }
}
