//! # Client Configuration
//!
//! Builder-based configuration shared by every session component.
//!
//! ## Required Dependencies
//!
//! - API base URL
//! - `HttpClient` - transport (desktop default: reqwest)
//! - `SecureStore` - token persistence (desktop default: OS keychain)
//!
//! When the `desktop-shims` feature is enabled the two bridges are filled
//! in automatically if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::ClientConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = ClientConfig::builder()
//!     .api_base_url("https://api.lexdesk.example")
//!     .http_client(Arc::new(MyHttpClient))
//!     .secure_store(Arc::new(MySecureStore))
//!     .keepalive_interval(Duration::from_secs(120))
//!     .build()?;
//! ```
//!
//! Missing bridges fail fast with an actionable message:
//!
//! ```should_panic
//! use core_runtime::config::ClientConfig;
//!
//! let config = ClientConfig::builder()
//!     .build()
//!     .expect("Should fail - missing base URL");
//! ```

use crate::error::{Error, Result};
use crate::events::EventBus;
use bridge_traits::{Clock, HttpClient, SecureStore, SystemClock};
use std::sync::Arc;
use std::time::Duration;

/// Path fragments whose requests never carry a bearer token and never
/// trigger a refresh.
pub const DEFAULT_BYPASS_PATHS: &[&str] = &["login", "register", "resetpassword", "refresh", "verify"];

/// Substring of a 401 `reason` that marks an expired access token.
pub const DEFAULT_EXPIRY_MARKER: &str = "expired";

/// How often the keep-alive task looks at the access token.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);

/// Refresh preemptively when the access token expires within this window.
pub const DEFAULT_REFRESH_AHEAD: Duration = Duration::from_secs(300);

pub const DEFAULT_LOGIN_ROUTE: &str = "/login";

pub const DEFAULT_RESPONSE_CACHE_CAPACITY: usize = 128;

/// Storage keys for the persisted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub access_token: String,
    pub refresh_token: String,
    pub user: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            access_token: "access_token".to_string(),
            refresh_token: "refresh_token".to_string(),
            user: "user".to_string(),
        }
    }
}

/// Settings of the authenticated-request pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSettings {
    /// Requests whose path contains any of these (case-insensitive) bypass
    /// decoration and the refresh flow.
    pub bypass_paths: Vec<String>,
    /// Matched case-insensitively against the 401 `reason`.
    pub expiry_marker: String,
    pub keepalive_interval: Duration,
    pub refresh_ahead: Duration,
    /// Where the host navigates after logout.
    pub login_route: String,
    pub storage_keys: StorageKeys,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            bypass_paths: DEFAULT_BYPASS_PATHS.iter().map(|s| s.to_string()).collect(),
            expiry_marker: DEFAULT_EXPIRY_MARKER.to_string(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            refresh_ahead: DEFAULT_REFRESH_AHEAD,
            login_route: DEFAULT_LOGIN_ROUTE.to_string(),
            storage_keys: StorageKeys::default(),
        }
    }
}

/// Configuration for the client session core.
///
/// Use [`ClientConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API, without trailing slash
    pub api_base_url: String,

    pub http_client: Arc<dyn HttpClient>,

    pub secure_store: Arc<dyn SecureStore>,

    pub clock: Arc<dyn Clock>,

    pub event_bus: EventBus,

    pub auth: AuthSettings,

    /// Maximum number of cached GET responses; 0 disables the cache
    pub response_cache_capacity: usize,

    /// Per-request timeout applied to requests that set none
    pub request_timeout: Option<Duration>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url)
            .field("http_client", &"HttpClient { ... }")
            .field("secure_store", &"SecureStore { ... }")
            .field("event_bus", &self.event_bus)
            .field("auth", &self.auth)
            .field("response_cache_capacity", &self.response_cache_capacity)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Builder pre-populated from the environment.
    ///
    /// Reads `LEXDESK_API_URL`, `LEXDESK_KEEPALIVE_SECS` and
    /// `LEXDESK_LOGIN_ROUTE`. Unset variables leave the defaults in place;
    /// unparsable ones are an error.
    pub fn from_env() -> Result<ClientConfigBuilder> {
        let mut builder = Self::builder();

        if let Ok(url) = std::env::var("LEXDESK_API_URL") {
            builder = builder.api_base_url(url);
        }

        if let Ok(secs) = std::env::var("LEXDESK_KEEPALIVE_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "LEXDESK_KEEPALIVE_SECS must be a whole number of seconds, got '{}'",
                    secs
                ))
            })?;
            builder = builder.keepalive_interval(Duration::from_secs(secs));
        }

        if let Ok(route) = std::env::var("LEXDESK_LOGIN_ROUTE") {
            builder = builder.login_route(route);
        }

        Ok(builder)
    }

    /// Joins `path` onto the API base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base_url, path.trim_start_matches('/'))
    }

    /// Validates the configuration.
    ///
    /// This checks:
    /// - The base URL is an absolute http(s) URL
    /// - The expiry marker is not empty
    /// - The keep-alive interval is non-zero
    /// - The login route is an absolute path
    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.api_base_url)
            .map_err(|e| Error::Config(format!("Invalid API base URL '{}': {}", self.api_base_url, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "API base URL must use http or https, got '{}'",
                parsed.scheme()
            )));
        }

        if self.auth.expiry_marker.trim().is_empty() {
            return Err(Error::Config("Expiry marker cannot be empty".to_string()));
        }

        if self.auth.keepalive_interval.is_zero() {
            return Err(Error::Config(
                "Keep-alive interval must be greater than zero".to_string(),
            ));
        }

        if !self.auth.login_route.starts_with('/') {
            return Err(Error::Config(format!(
                "Login route must be an absolute path, got '{}'",
                self.auth.login_route
            )));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required to reach the API. \
                 Desktop: enable the 'desktop-shims' feature to use the default ReqwestHttpClient. \
                 Tests: inject a scripted HttpClient."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn secure_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SecureStore".to_string(),
        message: "SecureStore implementation is required to persist the session. \
                 Desktop: enable the 'desktop-shims' feature to use the default KeyringSecureStore. \
                 Tests: inject bridge_desktop::MemorySecureStore."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new().map_err(|e| Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: e.to_string(),
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    use bridge_desktop::KeyringSecureStore;

    Ok(Arc::new(KeyringSecureStore::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(secure_store_missing_error())
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    api_base_url: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    clock: Option<Arc<dyn Clock>>,
    event_bus: Option<EventBus>,
    auth: AuthSettings,
    response_cache_capacity: Option<usize>,
    request_timeout: Option<Duration>,
}

impl ClientConfigBuilder {
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    /// Time source for expiry checks (defaults to the system clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share an existing event bus with the host instead of creating one.
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Replaces the whole bypass allow-list.
    pub fn bypass_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auth.bypass_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn expiry_marker(mut self, marker: impl Into<String>) -> Self {
        self.auth.expiry_marker = marker.into();
        self
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.auth.keepalive_interval = interval;
        self
    }

    pub fn refresh_ahead(mut self, window: Duration) -> Self {
        self.auth.refresh_ahead = window;
        self
    }

    pub fn login_route(mut self, route: impl Into<String>) -> Self {
        self.auth.login_route = route.into();
        self
    }

    pub fn storage_keys(mut self, keys: StorageKeys) -> Self {
        self.auth.storage_keys = keys;
        self
    }

    pub fn response_cache_capacity(mut self, capacity: usize) -> Self {
        self.response_cache_capacity = Some(capacity);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds and validates the final `ClientConfig`.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the base URL is missing or any value is invalid
    /// - `Error::CapabilityMissing` if a required bridge is missing and no
    ///   desktop default is available
    pub fn build(self) -> Result<ClientConfig> {
        let api_base_url = self.api_base_url.ok_or_else(|| {
            Error::Config("API base URL is required. Use .api_base_url() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let config = ClientConfig {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            http_client,
            secure_store,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_bus: self.event_bus.unwrap_or_default(),
            auth: self.auth,
            response_cache_capacity: self
                .response_cache_capacity
                .unwrap_or(DEFAULT_RESPONSE_CACHE_CAPACITY),
            request_timeout: self.request_timeout,
        };

        config.validate()?;

        Ok(config)
    }
}
