//! Session Manager service

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::masking::mask_token;
use crate::navigator::Navigator;
use crate::storage::{
    clear_token_record, load_token_record, save_token_record, SessionStorage, REFRESH_TOKEN_KEY,
    USER_INFO_KEY,
};
use crate::structs::{
    ApiEnvelope, LoginRequest, RefreshOutcome, RefreshRequest, TokenPayload, TokenRecord,
    MAX_TTL_SECS,
};
use chrono::{Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Session Manager - owns the token lifecycle for one signed-in user.
///
/// Construct once at startup and hand clones to consumers; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    http: reqwest::Client,
    storage: Arc<dyn SessionStorage>,
    navigator: Arc<dyn Navigator>,
    record: RwLock<Option<TokenRecord>>,
    pending_refresh: Mutex<Option<PendingRefresh>>,
}

impl SessionManager {
    /// Create a new SessionManager, restoring any persisted session.
    pub async fn new(
        config: SessionConfig,
        storage: Arc<dyn SessionStorage>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.auth_timeout_ms))
            .build()?;
        Self::with_http_client(config, http, storage, navigator).await
    }

    /// Like [`SessionManager::new`] but with a caller-built HTTP client
    /// (proxies, custom TLS).
    pub async fn with_http_client(
        config: SessionConfig,
        http: reqwest::Client,
        storage: Arc<dyn SessionStorage>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        config.validate()?;

        let record = load_token_record(storage.as_ref()).await?;
        if let Some(ref record) = record {
            debug!(
                "Restored session {} (expires at {})",
                mask_token(&record.access_token),
                record.expires_at
            );
        }

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http,
                storage,
                navigator,
                record: RwLock::new(record),
                pending_refresh: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// True iff a token record is held and has not reached `expires_at`.
    pub fn is_authenticated(&self) -> bool {
        self.inner
            .record
            .read()
            .as_ref()
            .is_some_and(|record| record.is_valid_at(Utc::now()))
    }

    /// Current access token, used to sign outgoing requests.
    ///
    /// Returned even when past its expiry: the backend answers 401 and the
    /// interceptor refreshes.
    pub fn access_token(&self) -> Option<String> {
        self.inner
            .record
            .read()
            .as_ref()
            .map(|record| record.access_token.clone())
    }

    pub fn token_record(&self) -> Option<TokenRecord> {
        self.inner.record.read().clone()
    }

    pub fn user_info(&self) -> Option<Value> {
        self.inner
            .record
            .read()
            .as_ref()
            .and_then(|record| record.user_info.clone())
    }

    /// Exchange credentials for a token pair and persist it.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenRecord> {
        let url = self.inner.config.login_url()?;
        let payload = self
            .inner
            .request_tokens(url, &LoginRequest { username, password })
            .await?;
        let record = TokenRecord::from_payload(
            payload,
            Utc::now(),
            self.inner.safety_margin(),
            None,
        );
        save_token_record(self.inner.storage.as_ref(), &record).await?;
        *self.inner.record.write() = Some(record.clone());
        info!("Logged in as '{}'", username);
        Ok(record)
    }

    /// Refresh the token pair.
    ///
    /// Concurrent callers join the refresh already in flight and all observe
    /// its outcome; only one request reaches the backend.
    pub async fn refresh(&self) -> RefreshOutcome {
        let refresh = {
            let mut pending = self.inner.pending_refresh.lock();
            match pending.as_ref() {
                Some(in_flight) => {
                    debug!("Joining in-flight token refresh");
                    in_flight.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let refresh = async move {
                        let outcome = match AssertUnwindSafe(inner.perform_refresh())
                            .catch_unwind()
                            .await
                        {
                            Ok(outcome) => outcome,
                            Err(_) => {
                                error!("Token refresh panicked, clearing session");
                                inner.clear_local_state().await;
                                RefreshOutcome::Failed("token refresh panicked".to_string())
                            }
                        };
                        inner.pending_refresh.lock().take();
                        outcome
                    }
                    .boxed()
                    .shared();
                    *pending = Some(refresh.clone());
                    refresh
                }
            }
        };
        refresh.await
    }

    /// Whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.pending_refresh.lock().is_some()
    }

    /// Drop all auth state and send the user to the landing route.
    pub async fn logout(&self) {
        self.inner.clear_local_state().await;
        info!("Logged out");
        self.inner
            .navigator
            .redirect(&self.inner.config.landing_route);
    }
}

impl Inner {
    fn safety_margin(&self) -> Duration {
        Duration::seconds(self.config.safety_margin_secs.min(MAX_TTL_SECS) as i64)
    }

    async fn perform_refresh(&self) -> RefreshOutcome {
        let refresh_token = match self.storage.get_item(REFRESH_TOKEN_KEY).await {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => {
                info!("No refresh token stored, clearing session");
                self.clear_local_state().await;
                return RefreshOutcome::NoRefreshToken;
            }
            Err(e) => {
                error!("Failed to read refresh token: {}", e);
                self.clear_local_state().await;
                return RefreshOutcome::Failed(e.to_string());
            }
        };

        let url = match self.config.refresh_url() {
            Ok(url) => url,
            Err(e) => {
                self.clear_local_state().await;
                return RefreshOutcome::Failed(e.to_string());
            }
        };

        debug!("Refreshing session with {}", mask_token(&refresh_token));
        let payload = match self
            .request_tokens(
                url,
                &RefreshRequest {
                    refresh_token: &refresh_token,
                },
            )
            .await
        {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Token refresh failed, clearing session: {}", e);
                self.clear_local_state().await;
                return RefreshOutcome::Failed(e.to_string());
            }
        };

        let previous_user_info = match self.storage.get_item(USER_INFO_KEY).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            _ => None,
        };
        let record = TokenRecord::from_payload(
            payload,
            Utc::now(),
            self.safety_margin(),
            previous_user_info,
        );

        if let Err(e) = save_token_record(self.storage.as_ref(), &record).await {
            error!("Failed to persist refreshed session: {}", e);
            self.clear_local_state().await;
            return RefreshOutcome::Failed(e.to_string());
        }

        info!(
            "Session refreshed, new token {} valid until {}",
            mask_token(&record.access_token),
            record.expires_at
        );
        *self.record.write() = Some(record);
        RefreshOutcome::Refreshed
    }

    async fn request_tokens<B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<TokenPayload> {
        let response = self.http.post(url.clone()).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Rejected {
                code: i64::from(status.as_u16()),
                message: format!("HTTP {status} from {url}"),
            });
        }

        let envelope: ApiEnvelope<TokenPayload> = response.json().await?;
        if !envelope.is_success() {
            return Err(SessionError::Rejected {
                code: envelope.code,
                message: envelope.message.unwrap_or_default(),
            });
        }

        envelope.data.ok_or_else(|| SessionError::Rejected {
            code: 0,
            message: "response carried no token payload".to_string(),
        })
    }

    async fn clear_local_state(&self) {
        self.record.write().take();
        if let Err(e) = clear_token_record(self.storage.as_ref()).await {
            error!("Failed to clear persisted session: {}", e);
        }
    }
}
