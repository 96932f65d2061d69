//! # Event Bus System
//!
//! Typed broadcast channel the session core uses to tell the rest of the
//! application what happened to the session.
//!
//! ## Overview
//!
//! ```text
//! ┌────────────────┐   emit   ┌───────────┐  subscribe  ┌──────────────────────┐
//! │ SessionService ├─────────>│           ├────────────>│ notification socket  │
//! └────────────────┘          │ EventBus  │             └──────────────────────┘
//! ┌────────────────┐   emit   │ (broadcast│  subscribe  ┌──────────────────────┐
//! │ RefreshCoord.  ├─────────>│  channel) ├────────────>│ router (login redir.)│
//! └────────────────┘          └───────────┘             └──────────────────────┘
//! ```
//!
//! `LoggedIn` is the signal per-session background services (socket
//! connections, unread counters) start on. `LoggedOut` carries the route the
//! host should navigate to. `SessionExpired` and `RefreshFailed` mean the
//! host must force a logout.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Session(SessionEvent::LoggedOut {
//!         redirect_to: "/login".to_string(),
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "User logged out");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; it can
//!   keep receiving.
//! - **`RecvError::Closed`**: every sender is gone, the subscriber should
//!   exit.
//!
//! Emitting with no subscribers returns an error that callers ignore; the
//! session core never depends on someone listening.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Session lifecycle events
    Session(SessionEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Session(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Session(SessionEvent::RefreshFailed { .. })
            | CoreEvent::Session(SessionEvent::SessionExpired { .. }) => EventSeverity::Error,
            CoreEvent::Session(SessionEvent::MfaRequired { .. }) => EventSeverity::Warning,
            CoreEvent::Session(SessionEvent::LoggedIn { .. })
            | CoreEvent::Session(SessionEvent::LoggedOut { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// True when the host is expected to drop the session and show the
    /// login screen.
    pub fn requires_logout(&self) -> bool {
        matches!(
            self,
            CoreEvent::Session(SessionEvent::RefreshFailed { .. })
                | CoreEvent::Session(SessionEvent::SessionExpired { .. })
        )
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Session Events
// ============================================================================

/// Events describing the authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// Login (password or MFA) succeeded and tokens were persisted.
    LoggedIn {
        user_id: String,
        email: String,
    },
    /// Credentials were accepted but a second factor is needed.
    MfaRequired {
        email: String,
    },
    /// A refresh call was issued.
    TokenRefreshing,
    /// A refresh call succeeded and the new pair was persisted.
    TokenRefreshed {
        /// Expiry of the new access token (Unix epoch seconds), if decodable.
        expires_at: Option<i64>,
    },
    /// The refresh call failed. The session is no longer usable.
    RefreshFailed {
        message: String,
    },
    /// Tokens and cached profile were cleared.
    LoggedOut {
        /// Route the host should navigate to.
        redirect_to: String,
    },
    /// The session ended without an explicit logout (expired token found by
    /// the keep-alive, or a second expiry right after a refresh).
    SessionExpired {
        reason: String,
    },
}

impl SessionEvent {
    fn description(&self) -> &str {
        match self {
            SessionEvent::LoggedIn { .. } => "User logged in",
            SessionEvent::MfaRequired { .. } => "Second factor required",
            SessionEvent::TokenRefreshing => "Refreshing access token",
            SessionEvent::TokenRefreshed { .. } => "Access token refreshed",
            SessionEvent::RefreshFailed { .. } => "Token refresh failed",
            SessionEvent::LoggedOut { .. } => "User logged out",
            SessionEvent::SessionExpired { .. } => "Session expired",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus clones the sender; every `subscribe()` creates an
/// independent receiver that sees events emitted after it was created.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Shorthand for emitting a [`SessionEvent`] and ignoring the
    /// no-subscriber case.
    pub fn emit_session(&self, event: SessionEvent) {
        let _ = self.sender.send(CoreEvent::Session(event));
    }

    /// Creates a new subscriber to receive events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter.
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream};
///
/// let event_bus = EventBus::default();
/// let fatal_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| event.requires_logout());
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without waiting.
    ///
    /// Returns `None` if no matching event is currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
