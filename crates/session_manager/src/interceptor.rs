//! Request signing and 401/403 recovery for the REST client.

use crate::error::SessionError;
use crate::manager::SessionManager;
use anyhow::anyhow;
use async_trait::async_trait;
use http::Extensions;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Request, Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use tracing::{debug, warn};
use url::Url;

/// Auth bookkeeping carried by one logical request.
///
/// Immutable: a replay gets a new context from [`RequestContext::retried`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    retries: u32,
}

impl RequestContext {
    /// A request is replayed at most this many times after a refresh.
    pub const MAX_RETRIES: u32 = 1;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn has_retried(&self) -> bool {
        self.retries >= Self::MAX_RETRIES
    }

    #[must_use]
    pub fn retried(self) -> Self {
        Self {
            retries: self.retries + 1,
        }
    }
}

/// What the HTTP layer should do with a request that failed authentication.
#[derive(Debug)]
pub enum InterceptDecision {
    /// Hand the failed response back untouched (auth endpoints).
    PassThrough,
    /// Re-sign with the refreshed token and send again.
    Replay(RequestContext),
    /// Session is gone; the caller receives this error.
    Fail(SessionError),
}

pub fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

impl SessionManager {
    /// Decide how to recover a request to `url` that came back with `status`.
    ///
    /// The refresh and login endpoints are never recovered. A request that
    /// already had its one replay logs the user out.
    pub async fn intercept_unauthorized(
        &self,
        url: &Url,
        status: StatusCode,
        context: RequestContext,
    ) -> InterceptDecision {
        if self.config().is_auth_endpoint(url) {
            return InterceptDecision::PassThrough;
        }

        let original = SessionError::Unauthorized {
            status: status.as_u16(),
        };

        if context.has_retried() {
            warn!(
                "Request to {} still unauthorized after refresh, logging out",
                url.path()
            );
            self.logout().await;
            return InterceptDecision::Fail(original);
        }

        let outcome = self.refresh().await;
        if outcome.is_success() {
            debug!("Replaying request to {} with refreshed token", url.path());
            InterceptDecision::Replay(context.retried())
        } else {
            warn!(
                "Refresh after HTTP {} on {} failed ({:?}), logging out",
                status,
                url.path(),
                outcome
            );
            self.logout().await;
            InterceptDecision::Fail(original)
        }
    }
}

/// Middleware that signs requests with the session's bearer token and
/// recovers one 401/403 per request through a token refresh.
pub struct AuthMiddleware {
    session: SessionManager,
}

impl AuthMiddleware {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    fn sign(&self, request: &mut Request) -> reqwest_middleware::Result<()> {
        let Some(token) = self.session.access_token() else {
            return Ok(());
        };
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| reqwest_middleware::Error::Middleware(anyhow!("invalid access token: {e}")))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let mut context = extensions
            .get::<RequestContext>()
            .copied()
            .unwrap_or_default();
        let mut request = req;

        loop {
            let replay = request.try_clone();
            let url = request.url().clone();
            self.sign(&mut request)?;

            let response = next.clone().run(request, extensions).await?;
            let status = response.status();
            if !is_auth_failure(status) {
                return Ok(response);
            }

            match self
                .session
                .intercept_unauthorized(&url, status, context)
                .await
            {
                InterceptDecision::PassThrough => return Ok(response),
                InterceptDecision::Replay(next_context) => {
                    let Some(again) = replay else {
                        warn!(
                            "Request to {} has a streaming body and cannot be replayed",
                            url.path()
                        );
                        return Ok(response);
                    };
                    context = next_context;
                    extensions.insert(context);
                    request = again;
                }
                InterceptDecision::Fail(err) => {
                    return Err(reqwest_middleware::Error::Middleware(anyhow::Error::new(err)))
                }
            }
        }
    }
}

/// Build the REST client used for backend calls: bearer signing and
/// 401/403 recovery outermost, transient-failure retries underneath.
pub fn build_api_client(
    session: SessionManager,
    client: Client,
    max_transient_retries: u32,
) -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_transient_retries);

    ClientBuilder::new(client)
        .with(AuthMiddleware::new(session))
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}
