use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors surfaced by the session core.
///
/// `Clone` so a single refresh outcome can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Access token expired: {0}")]
    TokenExpired(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Session ended while the request was in flight")]
    SessionEnded,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Secure storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Stored session data is corrupted: {0}")]
    StorageCorrupted(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl AuthError {
    /// True when the session cannot continue and the host should send the
    /// user back to the login screen.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            AuthError::RefreshFailed(_)
                | AuthError::SessionExpired(_)
                | AuthError::SessionEnded
                | AuthError::NotAuthenticated
        )
    }
}

impl From<BridgeError> for AuthError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Network(msg) => AuthError::Network(msg),
            other => AuthError::Network(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_fatal_classification() {
        assert!(AuthError::RefreshFailed("401".into()).is_session_fatal());
        assert!(AuthError::SessionExpired("expired".into()).is_session_fatal());
        assert!(AuthError::SessionEnded.is_session_fatal());
        assert!(!AuthError::Network("timeout".into()).is_session_fatal());
        assert!(!AuthError::Api {
            status: 403,
            message: "forbidden".into()
        }
        .is_session_fatal());
    }

    #[test]
    fn test_bridge_error_conversion() {
        let err: AuthError = BridgeError::Network("connection refused".into()).into();
        assert_eq!(err, AuthError::Network("connection refused".into()));

        let err: AuthError = BridgeError::NotAvailable("offline".into()).into();
        assert!(matches!(err, AuthError::Network(msg) if msg.contains("offline")));
    }
}
