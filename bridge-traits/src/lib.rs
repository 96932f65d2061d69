//! # Host Bridge Traits
//!
//! Capability traits the client core needs from its host.
//!
//! ## Overview
//!
//! The session core never talks to the network, the keychain or the system
//! clock directly. Each of those is a trait here, implemented once per host
//! (desktop via `bridge-desktop`, test doubles inside the test modules).
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Executes a single HTTP request. Status
//!   codes are data, only transport failures are errors.
//! - [`SecureStore`](storage::SecureStore) - Credential persistence (the
//!   access/refresh token pair and cached profile live here).
//! - [`Clock`](time::Clock) - Time source, injectable for expiry tests.
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to the host.
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert platform errors into it and keep messages actionable.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so one instance can be shared by
//! every in-flight request and the keep-alive task.
//!
//! ## Example
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient {
//!     client: reqwest::Client,
//! }
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         // Implementation
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use storage::SecureStore;
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
