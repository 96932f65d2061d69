//! Shared fixtures for the session integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bridge_desktop::MemorySecureStore;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, AUTHORIZATION};
use bridge_traits::time::ManualClock;
use chrono::{TimeZone, Utc};
use core_auth::{AuthContext, TokenPair};
use core_runtime::config::{ClientConfig, ClientConfigBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const BASE_URL: &str = "https://api.lexdesk.test";
pub const NOW: i64 = 1_750_000_000;

/// Unsigned JWT expiring at `exp`; `tag` keeps otherwise equal tokens apart.
pub fn jwt(exp: i64, tag: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u-1","exp":{},"jti":"{}"}}"#, exp, tag));
    format!("{}.{}.sig", header, payload)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    Succeed,
    Reject,
    NetworkError,
}

/// In-memory stand-in for the Lexdesk API.
///
/// Protected routes accept exactly one bearer token, which changes every
/// time `/user/refresh/token` succeeds. Refresh responses can be held back
/// until [`FakeApi::release_refresh`] is called, and the answer to one
/// protected path until [`FakeApi::release_path`].
pub struct FakeApi {
    accepted: Mutex<String>,
    refresh_mode: Mutex<RefreshMode>,
    issued: AtomicUsize,
    refresh_arrivals: AtomicUsize,
    hold_refresh: Mutex<bool>,
    gate: Semaphore,
    held_path: Mutex<Option<String>>,
    path_gate: Semaphore,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeApi {
    pub fn new(accepted: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            accepted: Mutex::new(accepted.into()),
            refresh_mode: Mutex::new(RefreshMode::Succeed),
            issued: AtomicUsize::new(0),
            refresh_arrivals: AtomicUsize::new(0),
            hold_refresh: Mutex::new(false),
            gate: Semaphore::new(0),
            held_path: Mutex::new(None),
            path_gate: Semaphore::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn set_refresh_mode(&self, mode: RefreshMode) {
        *self.refresh_mode.lock().unwrap() = mode;
    }

    pub fn hold_refresh(&self) {
        *self.hold_refresh.lock().unwrap() = true;
    }

    pub fn release_refresh(&self) {
        *self.hold_refresh.lock().unwrap() = false;
        self.gate.add_permits(1_000);
    }

    /// Requests to `path` are answered only after [`FakeApi::release_path`],
    /// judged against the token accepted at that point.
    pub fn hold_path(&self, path: &str) {
        *self.held_path.lock().unwrap() = Some(path.to_string());
    }

    pub fn release_path(&self) {
        *self.held_path.lock().unwrap() = None;
        self.path_gate.add_permits(1_000);
    }

    pub fn accepted_token(&self) -> String {
        self.accepted.lock().unwrap().clone()
    }

    /// Token the next successful refresh will issue.
    pub fn next_access_token(&self) -> String {
        jwt(NOW + 3600, &format!("issued-{}", self.issued.load(Ordering::SeqCst) + 1))
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_arrivals.load(Ordering::SeqCst)
    }

    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path() == path)
            .cloned()
            .collect()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    async fn refresh(&self) -> BridgeResult<HttpResponse> {
        self.refresh_arrivals.fetch_add(1, Ordering::SeqCst);

        let held = *self.hold_refresh.lock().unwrap();
        if held {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }

        let mode = *self.refresh_mode.lock().unwrap();
        match mode {
            RefreshMode::NetworkError => Err(BridgeError::Network("connection reset".into())),
            RefreshMode::Reject => Ok(HttpResponse::new(
                401,
                r#"{"reason":"refresh token expired","message":"Please sign in again"}"#,
            )),
            RefreshMode::Succeed => {
                let access = self.next_access_token();
                self.issued.fetch_add(1, Ordering::SeqCst);
                *self.accepted.lock().unwrap() = access.clone();
                let body = serde_json::json!({
                    "data": { "access_token": access, "refresh_token": "refresh-next" }
                });
                Ok(HttpResponse::new(200, body.to_string()))
            }
        }
    }
}

impl FakeApi {
    /// Password `pw` signs in directly, `mfa` asks for a code; anything else
    /// is answered with an expiry-looking 401.
    fn login(&self, request: &HttpRequest) -> HttpResponse {
        let body: serde_json::Value = request
            .body
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
            .unwrap_or_default();

        match body["password"].as_str() {
            Some("pw") => self.session_response(),
            Some("mfa") => HttpResponse::new(
                200,
                serde_json::json!({ "data": { "user": user_json() } }).to_string(),
            ),
            _ => HttpResponse::new(401, r#"{"reason":"token expired"}"#),
        }
    }

    fn verify(&self, path: &str) -> HttpResponse {
        if path.ends_with("/123456") {
            self.session_response()
        } else {
            HttpResponse::new(401, r#"{"reason":"Invalid verification code"}"#)
        }
    }

    fn session_response(&self) -> HttpResponse {
        let access = self.accepted_token();
        let body = serde_json::json!({
            "data": { "user": user_json(), "access_token": access, "refresh_token": "refresh-1" }
        });
        HttpResponse::new(200, body.to_string())
    }
}

pub fn user_json() -> serde_json::Value {
    serde_json::json!({
        "id": 42,
        "email": "counsel@firm.test",
        "firstName": "Ada",
        "lastName": "Lovelace",
        "role": "attorney",
        "organizationId": "org-7"
    })
}

#[async_trait]
impl HttpClient for FakeApi {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let path = request.path();

        match path.as_str() {
            "/user/refresh/token" => self.refresh().await,
            "/user/login" => Ok(self.login(&request)),
            p if p.starts_with("/user/verify/code/") => Ok(self.verify(p)),
            _ => {
                let held = self.held_path.lock().unwrap().as_deref() == Some(path.as_str());
                if held {
                    if let Ok(permit) = self.path_gate.acquire().await {
                        permit.forget();
                    }
                }

                let expected = format!("Bearer {}", self.accepted_token());
                if request.header_value(AUTHORIZATION) == Some(expected.as_str()) {
                    let body = serde_json::json!({ "path": path });
                    Ok(HttpResponse::new(200, body.to_string()))
                } else {
                    Ok(HttpResponse::new(401, r#"{"reason":"jwt expired"}"#))
                }
            }
        }
    }
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.timestamp_opt(NOW, 0).unwrap()))
}

pub fn config_builder(api: Arc<FakeApi>, clock: Arc<ManualClock>) -> ClientConfigBuilder {
    ClientConfig::builder()
        .api_base_url(BASE_URL)
        .http_client(api)
        .secure_store(Arc::new(MemorySecureStore::new()))
        .clock(clock)
        .keepalive_interval(Duration::from_secs(120))
        .refresh_ahead(Duration::from_secs(300))
}

/// Context whose store already holds `access` plus a refresh token.
pub async fn signed_in(api: Arc<FakeApi>, access: impl Into<String>) -> AuthContext {
    let config = config_builder(api, clock()).build().unwrap();
    let context = AuthContext::new(config);
    context
        .session()
        .token_store()
        .set_tokens(&TokenPair::new(access, "refresh-1"))
        .await
        .unwrap();
    context
}

pub fn url(path: &str) -> String {
    format!("{}{}", BASE_URL, path)
}

pub fn bearer_of(request: &HttpRequest) -> Option<String> {
    request
        .header_value(AUTHORIZATION)
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Yields until `condition` holds; panics after a bounded number of tries.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
