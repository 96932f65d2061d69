//! # Authenticated Client
//!
//! The request pipeline every API call goes through:
//!
//! 1. Requests on the bypass list go out as-is and are returned as-is,
//!    even on 401.
//! 2. GETs are served from the response cache when possible. A successful
//!    write (any other method) empties the cache.
//! 3. The request is sent with the current access token.
//! 4. A 401 that names an expired token triggers a refresh through the
//!    [`RefreshCoordinator`] and the request is sent once more with the new
//!    token. Expiring again after that ends the session
//!    ([`AuthError::SessionExpired`]); a failed refresh is returned without
//!    retrying the request.
//! 5. Every other response, including other 401s, goes back to the caller.

use crate::cache::ResponseCache;
use crate::coordinator::RefreshCoordinator;
use crate::decorator::{AuthDecorator, FailureKind};
use crate::error::{AuthError, Result};
use crate::session::{normalize_error, SessionService};
use bridge_traits::http::{HttpMethod, HttpRequest, HttpResponse};
use core_runtime::events::SessionEvent;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Clone)]
pub struct AuthenticatedClient {
    session: Arc<SessionService>,
    coordinator: Arc<RefreshCoordinator>,
    decorator: AuthDecorator,
}

impl AuthenticatedClient {
    pub fn new(session: Arc<SessionService>, coordinator: Arc<RefreshCoordinator>) -> Self {
        let decorator = AuthDecorator::from_settings(&session.config().auth);
        Self {
            session,
            coordinator,
            decorator,
        }
    }

    pub fn session(&self) -> &Arc<SessionService> {
        &self.session
    }

    pub fn decorator(&self) -> &AuthDecorator {
        &self.decorator
    }

    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path()))]
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        if self.decorator.is_bypassed(&request) {
            debug!("Bypassing authorization");
            return self.send(request).await;
        }

        self.session.token_store().ensure_loaded().await?;

        let cache = self.cache();
        if let Some(hit) = cache.get(&request).await {
            return Ok(hit);
        }

        let sent_token = self.session.access_token();
        let response = self
            .send(self.decorator.decorate(&request, sent_token.as_deref()))
            .await?;

        let response = match self.decorator.classify(&response) {
            FailureKind::Expired { reason } => {
                debug!(%reason, "Access token expired, refreshing");
                let token = self.fresh_token(sent_token.as_deref()).await?;
                let retried = self
                    .send(self.decorator.decorate(&request, Some(&token)))
                    .await?;

                if let FailureKind::Expired { reason } = self.decorator.classify(&retried) {
                    warn!(%reason, "Token expired again after refresh");
                    self.session
                        .event_bus()
                        .emit_session(SessionEvent::SessionExpired {
                            reason: reason.clone(),
                        });
                    return Err(AuthError::SessionExpired(reason));
                }
                retried
            }
            FailureKind::Unauthorized { .. } | FailureKind::Other => response,
        };

        if request.method != HttpMethod::Get && response.is_success() {
            debug!("Write succeeded, dropping cached reads");
            cache.clear().await;
        } else {
            cache.put(&request, &response).await;
        }
        Ok(response)
    }

    /// A token newer than `sent`: the one already in the store if another
    /// caller refreshed in the meantime, otherwise a fresh refresh.
    async fn fresh_token(&self, sent: Option<&str>) -> Result<String> {
        match self.session.access_token() {
            Some(current) if Some(current.as_str()) != sent => {
                debug!("Token already refreshed by another request");
                Ok(current)
            }
            _ => Ok(self.coordinator.refresh().await?.access_token),
        }
    }

    /// GETs `path` and decodes the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.execute(HttpRequest::get(self.url_for(path))).await?;
        decode(response)
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send_json(HttpMethod::Post, path, body).await
    }

    pub async fn put_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send_json(HttpMethod::Put, path, body).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .execute(HttpRequest::new(HttpMethod::Delete, self.url_for(path)))
            .await?;
        ensure_success(&response)
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let request = HttpRequest::new(method, self.url_for(path))
            .json(body)
            .map_err(|e| AuthError::Serialization(e.to_string()))?;
        let response = self.execute(request).await?;
        decode(response)
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            self.session.config().endpoint(path)
        }
    }

    fn cache(&self) -> &ResponseCache {
        self.session.response_cache()
    }

    async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        if request.timeout.is_none() {
            request.timeout = self.session.config().request_timeout;
        }
        Ok(self.session.config().http_client.execute(request).await?)
    }
}

fn ensure_success(response: &HttpResponse) -> Result<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(AuthError::Api {
            status: response.status,
            message: normalize_error(response.status, &response.body),
        })
    }
}

fn decode<T: DeserializeOwned>(response: HttpResponse) -> Result<T> {
    ensure_success(&response)?;
    serde_json::from_slice(&response.body)
        .map_err(|e| AuthError::InvalidResponse(format!("unexpected response body: {}", e)))
}
