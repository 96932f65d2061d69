//! Attaches the bearer token to outgoing requests and classifies
//! authorization failures.

use crate::types::ApiErrorBody;
use bridge_traits::http::{HttpRequest, HttpResponse, AUTHORIZATION};
use core_runtime::config::AuthSettings;

/// Path fragments that mark a request as part of the auth flow itself.
///
/// Matching is a case-insensitive substring test against the request path,
/// so `login` covers `/user/login` and `/admin/LoginHistory` alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BypassList {
    entries: Vec<String>,
}

impl BypassList {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = path.to_lowercase();
        self.entries.iter().any(|entry| path.contains(entry.as_str()))
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

impl Default for BypassList {
    fn default() -> Self {
        Self::new(core_runtime::config::DEFAULT_BYPASS_PATHS)
    }
}

/// How a response relates to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// 401 whose reason names an expired access token
    Expired { reason: String },
    /// Any other 401
    Unauthorized { reason: Option<String> },
    Other,
}

#[derive(Debug, Clone)]
pub struct AuthDecorator {
    bypass: BypassList,
    expiry_marker: String,
}

impl AuthDecorator {
    pub fn new(bypass: BypassList, expiry_marker: impl Into<String>) -> Self {
        Self {
            bypass,
            expiry_marker: expiry_marker.into().to_lowercase(),
        }
    }

    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::new(
            BypassList::new(&settings.bypass_paths),
            settings.expiry_marker.clone(),
        )
    }

    pub fn is_bypassed(&self, request: &HttpRequest) -> bool {
        self.bypass.matches(&request.path())
    }

    /// Returns a copy of `request` carrying `Authorization: Bearer <token>`.
    ///
    /// Bypassed requests and a missing token leave the request untouched.
    /// Any existing authorization header is replaced.
    pub fn decorate(&self, request: &HttpRequest, token: Option<&str>) -> HttpRequest {
        let mut decorated = request.clone();
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return decorated;
        };
        if self.is_bypassed(request) {
            return decorated;
        }

        decorated
            .headers
            .retain(|name, _| !name.eq_ignore_ascii_case(AUTHORIZATION));
        decorated.bearer_token(token)
    }

    pub fn classify(&self, response: &HttpResponse) -> FailureKind {
        if !response.is_unauthorized() {
            return FailureKind::Other;
        }

        let reason = ApiErrorBody::parse(&response.body).reason;
        match reason {
            Some(reason) if reason.to_lowercase().contains(&self.expiry_marker) => {
                FailureKind::Expired { reason }
            }
            reason => FailureKind::Unauthorized { reason },
        }
    }
}

impl Default for AuthDecorator {
    fn default() -> Self {
        Self::new(
            BypassList::default(),
            core_runtime::config::DEFAULT_EXPIRY_MARKER,
        )
    }
}
