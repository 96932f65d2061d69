//! # Authentication Module
//!
//! Session handling for the Lexdesk API: login with optional MFA, token
//! persistence, authenticated requests with transparent token refresh, and
//! logout.
//!
//! ## Overview
//!
//! - [`TokenStore`] owns the token pair and the cached user profile
//! - [`AuthDecorator`] attaches the bearer token and recognises expiry
//! - [`RefreshCoordinator`] lets only one refresh run at a time
//! - [`SessionService`] talks to the auth endpoints
//! - [`AuthenticatedClient`] runs every API call through the pipeline above
//! - [`SessionKeepAlive`] refreshes ahead of expiry in the background
//!
//! [`AuthContext`] wires them together from a `ClientConfig`.

pub mod cache;
pub mod client;
pub mod context;
pub mod coordinator;
pub mod decorator;
pub mod error;
pub mod keepalive;
pub mod session;
pub mod token_store;
pub mod types;

pub use cache::ResponseCache;
pub use client::AuthenticatedClient;
pub use context::AuthContext;
pub use coordinator::{RefreshCoordinator, TokenRefresher};
pub use decorator::{AuthDecorator, BypassList, FailureKind};
pub use error::{AuthError, Result};
pub use keepalive::{SessionKeepAlive, TickOutcome};
pub use session::{normalize_error, LoginOutcome, SessionService};
pub use token_store::TokenStore;
pub use types::{decode_claims, ApiEnvelope, ApiErrorBody, AuthPayload, Claims, TokenPair, UserProfile};
