//! # Session Service
//!
//! Talks to the auth endpoints and keeps the [`TokenStore`] in step with
//! the server:
//!
//! - `POST /user/login` – password login, may ask for an MFA code
//! - `GET /user/verify/code/{email}/{code}` – completes an MFA login
//! - `GET /user/refresh/token` – trades the refresh token for a new pair
//!
//! All three answer `{ "data": { user, access_token, refresh_token } }`.
//!
//! Nothing here retries. Transport failures come back as
//! [`AuthError::Network`] and the caller decides what to do.
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{LoginOutcome, SessionService};
//! use core_runtime::config::ClientConfig;
//! # async fn example(config: ClientConfig) -> core_auth::Result<()> {
//! let session = SessionService::new(config);
//! session.restore().await?;
//!
//! match session.login("counsel@firm.test", "hunter2").await? {
//!     LoginOutcome::Authenticated(user) => println!("welcome {}", user.display_name()),
//!     LoginOutcome::MfaRequired { email } => {
//!         session.verify_mfa_code(&email, "123456").await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::cache::ResponseCache;
use crate::coordinator::TokenRefresher;
use crate::error::{AuthError, Result};
use crate::token_store::TokenStore;
use crate::types::{decode_claims, ApiEnvelope, ApiErrorBody, AuthPayload, TokenPair, UserProfile};
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::config::ClientConfig;
use core_runtime::events::{EventBus, SessionEvent};
use core_runtime::logging::mask_email;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const LOGIN_PATH: &str = "/user/login";
const REFRESH_PATH: &str = "/user/refresh/token";
const VERIFY_SEGMENTS: [&str; 3] = ["user", "verify", "code"];

/// Result of a password login.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Authenticated(UserProfile),
    /// Credentials accepted, a verification code was sent to `email`
    MfaRequired { email: String },
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Builds the error text shown for a failed call.
///
/// Prefers the body's `message`, then `reason`, then `error`, and falls back
/// to `HTTP <status>`.
pub fn normalize_error(status: u16, body: &[u8]) -> String {
    ApiErrorBody::parse(body)
        .best_message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status))
}

pub struct SessionService {
    config: ClientConfig,
    store: Arc<TokenStore>,
    cache: Arc<ResponseCache>,
}

impl SessionService {
    pub fn new(config: ClientConfig) -> Self {
        let store = Arc::new(TokenStore::new(
            Arc::clone(&config.secure_store),
            config.auth.storage_keys.clone(),
        ));
        let cache = Arc::new(ResponseCache::new(config.response_cache_capacity));
        Self {
            config,
            store,
            cache,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn response_cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.config.event_bus
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.config.clock
    }

    /// Loads the persisted session. Returns whether it is still valid.
    ///
    /// A corrupted profile blob is dropped and does not fail the restore.
    pub async fn restore(&self) -> Result<bool> {
        match self.store.load().await {
            Ok(()) => {}
            Err(AuthError::StorageCorrupted(reason)) => {
                warn!(%reason, "Discarded corrupted session data during restore");
            }
            Err(err) => return Err(err),
        }
        Ok(self.is_authenticated())
    }

    #[instrument(skip(self, email, password), fields(email = %mask_email(email)))]
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome> {
        let request = HttpRequest::post(self.config.endpoint(LOGIN_PATH))
            .json(&LoginRequest { email, password })
            .map_err(|e| AuthError::Serialization(e.to_string()))?;

        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(credential_error(&response));
        }

        let payload = parse_payload(&response)?;
        match payload.token_pair() {
            Some(tokens) => {
                let user = self.establish(tokens, payload.user).await?;
                Ok(LoginOutcome::Authenticated(user))
            }
            None => {
                info!("Login requires a verification code");
                self.config.event_bus.emit_session(SessionEvent::MfaRequired {
                    email: email.to_string(),
                });
                Ok(LoginOutcome::MfaRequired {
                    email: email.to_string(),
                })
            }
        }
    }

    /// Completes a login that answered [`LoginOutcome::MfaRequired`].
    #[instrument(skip(self, email, code), fields(email = %mask_email(email)))]
    pub async fn verify_mfa_code(&self, email: &str, code: &str) -> Result<UserProfile> {
        let url = self.endpoint_with_segments(&[email, code])?;
        let response = self.send(HttpRequest::get(url)).await?;
        if !response.is_success() {
            return Err(credential_error(&response));
        }

        let payload = parse_payload(&response)?;
        let tokens = payload.token_pair().ok_or_else(|| {
            AuthError::InvalidResponse("verification response carried no tokens".to_string())
        })?;
        self.establish(tokens, payload.user).await
    }

    /// Exchanges the refresh token for a new pair and persists it.
    ///
    /// If the session is cleared while the call is in flight, whatever the
    /// call returned is dropped and `AuthError::SessionEnded` is returned. A
    /// 401/403 from the refresh endpoint ends the session locally.
    #[instrument(skip(self))]
    pub async fn refresh_token(&self) -> Result<TokenPair> {
        self.store.ensure_loaded().await?;
        let epoch = self.store.epoch();
        let refresh_token = self.store.refresh_token().ok_or(AuthError::NotAuthenticated)?;

        let request = HttpRequest::get(self.config.endpoint(REFRESH_PATH)).bearer_token(refresh_token);
        let sent = self.send(request).await;
        if self.store.epoch() != epoch {
            debug!("Session ended while the refresh was in flight");
            return Err(AuthError::SessionEnded);
        }
        let response = sent?;

        if !response.is_success() {
            let message = normalize_error(response.status, &response.body);
            if matches!(response.status, 401 | 403) {
                warn!(status = response.status, "Refresh token rejected, clearing session");
                if let Err(err) = self.store.clear().await {
                    warn!(error = %err, "Failed to clear rejected session");
                }
                self.cache.clear().await;
            }
            return Err(AuthError::RefreshFailed(message));
        }

        let payload = parse_payload(&response)?;
        let tokens = payload.token_pair().ok_or_else(|| {
            AuthError::InvalidResponse("refresh response carried no tokens".to_string())
        })?;

        if !self.store.set_tokens_if_epoch(&tokens, epoch).await? {
            return Err(AuthError::SessionEnded);
        }

        if let Some(user) = payload.user {
            if let Err(err) = self.store.set_user(&user).await {
                warn!(error = %err, "Failed to cache refreshed user profile");
            }
        }

        debug!("Token pair refreshed");
        Ok(tokens)
    }

    /// Local check only: an access token is stored, it is a well-formed JWT,
    /// and its `exp` lies in the future.
    pub fn is_authenticated(&self) -> bool {
        match self.seconds_until_expiry() {
            Some(remaining) => remaining > 0,
            None => false,
        }
    }

    /// Seconds until the access token expires; negative once it has.
    /// `None` when there is no decodable token.
    pub fn seconds_until_expiry(&self) -> Option<i64> {
        let token = self.store.access_token()?;
        let claims = decode_claims(&token).ok()?;
        Some(claims.exp - self.config.clock.unix_timestamp())
    }

    pub fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        let token = self.store.access_token()?;
        let claims = decode_claims(&token).ok()?;
        DateTime::from_timestamp(claims.exp, 0)
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.store.user()
    }

    pub fn access_token(&self) -> Option<String> {
        self.store.access_token()
    }

    /// Ends the session locally: tokens and profile are removed, cached
    /// responses evicted, and `LoggedOut` tells the host where to navigate.
    ///
    /// The event is emitted even if the secure store fails to delete.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        let cleared = self.store.clear().await;
        self.cache.clear().await;

        info!("Logged out");
        self.config.event_bus.emit_session(SessionEvent::LoggedOut {
            redirect_to: self.config.auth.login_route.clone(),
        });

        cleared
    }

    async fn establish(&self, tokens: TokenPair, user: Option<UserProfile>) -> Result<UserProfile> {
        let user = user.ok_or_else(|| {
            AuthError::InvalidResponse("authentication response carried no user".to_string())
        })?;

        self.store.set_tokens(&tokens).await?;
        self.store.set_user(&user).await?;

        info!(user_id = %user.id, "Session established");
        self.config.event_bus.emit_session(SessionEvent::LoggedIn {
            user_id: user.id.clone(),
            email: user.email.clone(),
        });

        Ok(user)
    }

    async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        if request.timeout.is_none() {
            request.timeout = self.config.request_timeout;
        }
        let path = request.path();
        self.config.http_client.execute(request).await.map_err(|e| {
            warn!(%path, error = %e, "Auth request failed in transport");
            AuthError::from(e)
        })
    }

    fn endpoint_with_segments(&self, tail: &[&str]) -> Result<String> {
        let mut url = url::Url::parse(&self.config.api_base_url)
            .map_err(|e| AuthError::InvalidResponse(format!("invalid API base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| AuthError::InvalidResponse("API base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(VERIFY_SEGMENTS.iter().chain(tail.iter()));
        Ok(url.to_string())
    }
}

#[async_trait]
impl TokenRefresher for SessionService {
    async fn refresh(&self) -> Result<TokenPair> {
        self.refresh_token().await
    }
}

fn parse_payload(response: &HttpResponse) -> Result<AuthPayload> {
    serde_json::from_slice::<ApiEnvelope<AuthPayload>>(&response.body)
        .map(|envelope| envelope.data)
        .map_err(|e| AuthError::InvalidResponse(format!("unexpected auth response: {}", e)))
}

fn credential_error(response: &HttpResponse) -> AuthError {
    let message = normalize_error(response.status, &response.body);
    if response.is_unauthorized() {
        AuthError::InvalidCredentials(message)
    } else {
        AuthError::Api {
            status: response.status,
            message,
        }
    }
}
