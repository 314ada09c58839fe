//! Token record and auth backend wire types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound for server TTLs and the configured safety margin (ten years).
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

/// Authenticated session state as held in memory and persisted to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// Already reduced by the safety margin.
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<Value>,
}

impl TokenRecord {
    /// Builds a record from a token payload issued at `issued_at`.
    ///
    /// `user_info` from the payload wins over `previous_user_info`, so a refresh
    /// (which carries no profile) keeps the profile captured at login. If the
    /// expiry falls outside chrono's range the record is born expired.
    pub fn from_payload(
        payload: TokenPayload,
        issued_at: DateTime<Utc>,
        safety_margin: Duration,
        previous_user_info: Option<Value>,
    ) -> Self {
        let ttl = Duration::seconds(payload.expires_in.min(MAX_TTL_SECS) as i64);
        Self {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
            expires_at: issued_at
                .checked_add_signed(ttl)
                .and_then(|expiry| expiry.checked_sub_signed(safety_margin))
                .unwrap_or(issued_at),
            user_info: payload.user_info.or(previous_user_info),
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Response envelope shared by the auth endpoints: `{ code, message?, data? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default, alias = "msg", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayload {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<Value>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Result of a refresh attempt, shared by every caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    /// No refresh token was stored; local state was cleared.
    NoRefreshToken,
    /// The backend or the network failed; local state was cleared.
    Failed(String),
}

impl RefreshOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RefreshOutcome::Refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(expires_in: u64) -> TokenPayload {
        TokenPayload {
            access_token: "a2".to_string(),
            refresh_token: "r2".to_string(),
            expires_in,
            token_type: "Bearer".to_string(),
            user_info: None,
        }
    }

    #[test]
    fn expiry_subtracts_safety_margin() {
        let issued_at = Utc::now();
        let record = TokenRecord::from_payload(payload(3600), issued_at, Duration::minutes(5), None);
        assert_eq!(record.expires_at, issued_at + Duration::seconds(3300));
    }

    #[test]
    fn short_ttl_is_already_expired() {
        let issued_at = Utc::now();
        let record = TokenRecord::from_payload(payload(60), issued_at, Duration::minutes(5), None);
        assert!(!record.is_valid_at(issued_at));
    }

    #[test]
    fn out_of_range_margin_yields_expired_record() {
        let issued_at = Utc::now();
        let record = TokenRecord::from_payload(
            payload(3600),
            issued_at,
            Duration::seconds(i64::MAX / 1000),
            None,
        );
        assert_eq!(record.expires_at, issued_at);
        assert!(!record.is_valid_at(issued_at));
    }

    #[test]
    fn refresh_keeps_previous_user_info() {
        let previous = serde_json::json!({"name": "ada"});
        let record = TokenRecord::from_payload(
            payload(3600),
            Utc::now(),
            Duration::minutes(5),
            Some(previous.clone()),
        );
        assert_eq!(record.user_info, Some(previous));
    }

    #[test]
    fn validity_boundary_is_exclusive() {
        let issued_at = Utc::now();
        let record = TokenRecord::from_payload(payload(3600), issued_at, Duration::minutes(5), None);
        assert!(record.is_valid_at(record.expires_at - Duration::milliseconds(1)));
        assert!(!record.is_valid_at(record.expires_at));
    }

    #[test]
    fn envelope_parses_refresh_response() {
        let body = serde_json::json!({
            "code": 0,
            "data": {
                "access_token": "a2",
                "refresh_token": "r2",
                "expires_in": 3600,
                "token_type": "Bearer"
            }
        });
        let envelope: ApiEnvelope<TokenPayload> = serde_json::from_value(body).unwrap();
        assert!(envelope.is_success());
        assert_eq!(envelope.data.unwrap().access_token, "a2");
    }

    #[test]
    fn envelope_error_without_data() {
        let body = serde_json::json!({"code": 40101, "msg": "refresh token revoked"});
        let envelope: ApiEnvelope<TokenPayload> = serde_json::from_value(body).unwrap();
        assert!(!envelope.is_success());
        assert!(envelope.data.is_none());
        assert_eq!(envelope.message.as_deref(), Some("refresh token revoked"));
    }
}
