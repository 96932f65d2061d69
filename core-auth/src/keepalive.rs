//! Background task that keeps an active session from lapsing.
//!
//! Every `keepalive_interval` the access token is inspected. If it expires
//! within `refresh_ahead`, or has already expired, it is refreshed through
//! the shared [`RefreshCoordinator`], so a concurrent request-triggered
//! refresh is joined rather than duplicated. Only a failed refresh ends the
//! session; the coordinator reports it with `RefreshFailed`.

use crate::coordinator::RefreshCoordinator;
use crate::error::AuthError;
use crate::session::SessionService;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a single keep-alive check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No usable token; nothing to keep alive
    SignedOut,
    /// Token is valid beyond the refresh window
    Fresh { expires_in: i64 },
    Refreshed,
    RefreshFailed(AuthError),
}

pub struct SessionKeepAlive {
    session: Arc<SessionService>,
    coordinator: Arc<RefreshCoordinator>,
    refresh_ahead: Duration,
    interval: Duration,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SessionKeepAlive {
    /// Creates a stopped keep-alive using the session's settings.
    pub fn new(session: Arc<SessionService>, coordinator: Arc<RefreshCoordinator>) -> Arc<Self> {
        let settings = &session.config().auth;
        let refresh_ahead = settings.refresh_ahead;
        let interval = settings.keepalive_interval;
        Arc::new(Self {
            session,
            coordinator,
            refresh_ahead,
            interval,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    /// Creates the keep-alive and starts its timer. Must be called within a
    /// tokio runtime.
    pub fn start(session: Arc<SessionService>, coordinator: Arc<RefreshCoordinator>) -> Arc<Self> {
        let keepalive = Self::new(session, coordinator);
        keepalive.spawn();
        keepalive
    }

    fn spawn(self: &Arc<Self>) {
        let mut slot = lock(&self.handle);
        if slot.is_some() {
            return;
        }

        // The task holds only a weak reference so dropping the last handle
        // stops it.
        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let period = self.interval;

        info!(interval_secs = period.as_secs(), "Starting session keep-alive");
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(keepalive) = weak.upgrade() else { break };
                        keepalive.tick().await;
                    }
                }
            }
            debug!("Session keep-alive stopped");
        }));
    }

    pub fn is_running(&self) -> bool {
        lock(&self.handle)
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        lock(&self.handle).take();
    }

    /// Runs one check immediately.
    pub async fn tick(&self) -> TickOutcome {
        if let Err(err) = self.session.token_store().ensure_loaded().await {
            warn!(error = %err, "Stored session could not be read");
            return TickOutcome::SignedOut;
        }
        let Some(remaining) = self.session.seconds_until_expiry() else {
            return TickOutcome::SignedOut;
        };

        if remaining > 0 && remaining as u64 > self.refresh_ahead.as_secs() {
            return TickOutcome::Fresh {
                expires_in: remaining,
            };
        }

        if remaining <= 0 {
            info!(expired_for = -remaining, "Access token already expired, refreshing");
        } else {
            debug!(expires_in = remaining, "Refreshing token ahead of expiry");
        }
        match self.coordinator.refresh().await {
            Ok(_) => TickOutcome::Refreshed,
            Err(err) => {
                warn!(error = %err, "Keep-alive refresh failed");
                TickOutcome::RefreshFailed(err)
            }
        }
    }
}

impl Drop for SessionKeepAlive {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::jwt_with_exp;
    use crate::types::TokenPair;
    use async_trait::async_trait;
    use bridge_desktop::MemorySecureStore;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
    use bridge_traits::storage::SecureStore;
    use bridge_traits::time::ManualClock;
    use chrono::{TimeZone, Utc};
    use core_runtime::config::ClientConfig;
    use core_runtime::events::{CoreEvent, SessionEvent};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NOW: i64 = 1_750_000_000;

    struct RefreshEndpoint {
        issued: String,
        status: u16,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for RefreshEndpoint {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.status != 200 {
                return Ok(HttpResponse::new(self.status, r#"{"reason":"refresh token revoked"}"#));
            }
            let body = serde_json::json!({
                "data": { "access_token": self.issued, "refresh_token": "r2" }
            });
            Ok(HttpResponse::new(200, body.to_string()))
        }
    }

    async fn keepalive_with(access: Option<String>) -> (Arc<SessionKeepAlive>, Arc<SessionService>) {
        let (keepalive, session, _) = keepalive_over(access, 200, Arc::new(MemorySecureStore::new())).await;
        (keepalive, session)
    }

    async fn keepalive_over(
        access: Option<String>,
        refresh_status: u16,
        backing: Arc<MemorySecureStore>,
    ) -> (Arc<SessionKeepAlive>, Arc<SessionService>, Arc<RefreshEndpoint>) {
        let endpoint = Arc::new(RefreshEndpoint {
            issued: jwt_with_exp(NOW + 3600),
            status: refresh_status,
            calls: AtomicUsize::new(0),
        });
        let config = ClientConfig::builder()
            .api_base_url("https://api.lexdesk.test")
            .http_client(endpoint.clone())
            .secure_store(backing)
            .clock(Arc::new(ManualClock::new(Utc.timestamp_opt(NOW, 0).unwrap())))
            .build()
            .unwrap();
        let session = Arc::new(SessionService::new(config));
        if let Some(access) = access {
            session
                .token_store()
                .set_tokens(&TokenPair::new(access, "r1"))
                .await
                .unwrap();
        }
        let coordinator = Arc::new(RefreshCoordinator::new(
            session.clone(),
            session.event_bus().clone(),
        ));
        (SessionKeepAlive::new(session.clone(), coordinator), session, endpoint)
    }

    #[tokio::test]
    async fn test_tick_without_session() {
        let (keepalive, _) = keepalive_with(None).await;
        assert_eq!(keepalive.tick().await, TickOutcome::SignedOut);
    }

    #[tokio::test]
    async fn test_tick_leaves_fresh_token_alone() {
        let (keepalive, session) = keepalive_with(Some(jwt_with_exp(NOW + 3600))).await;
        let before = session.access_token();

        assert_eq!(
            keepalive.tick().await,
            TickOutcome::Fresh { expires_in: 3600 }
        );
        assert_eq!(session.access_token(), before);
    }

    #[tokio::test]
    async fn test_tick_refreshes_inside_window() {
        let (keepalive, session) = keepalive_with(Some(jwt_with_exp(NOW + 120))).await;

        assert_eq!(keepalive.tick().await, TickOutcome::Refreshed);
        assert_eq!(session.access_token(), Some(jwt_with_exp(NOW + 3600)));
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn test_tick_refreshes_expired_token() {
        let (keepalive, session, endpoint) =
            keepalive_over(Some(jwt_with_exp(NOW - 5)), 200, Arc::new(MemorySecureStore::new())).await;
        let mut events = session.event_bus().subscribe();

        assert_eq!(keepalive.tick().await, TickOutcome::Refreshed);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        assert!(session.is_authenticated());

        let mut seen = Vec::new();
        while let Ok(CoreEvent::Session(event)) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen
            .iter()
            .any(|e| matches!(e, SessionEvent::TokenRefreshed { .. })));
        assert!(!seen
            .iter()
            .any(|e| matches!(e, SessionEvent::SessionExpired { .. })));
    }

    #[tokio::test]
    async fn test_tick_reports_rejected_refresh_once() {
        let (keepalive, session, endpoint) =
            keepalive_over(Some(jwt_with_exp(NOW - 5)), 401, Arc::new(MemorySecureStore::new())).await;
        let mut events = session.event_bus().subscribe();

        assert_eq!(
            keepalive.tick().await,
            TickOutcome::RefreshFailed(AuthError::RefreshFailed("refresh token revoked".into()))
        );
        assert_eq!(keepalive.tick().await, TickOutcome::SignedOut);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);

        let mut failures = 0;
        while let Ok(event) = events.try_recv() {
            if let CoreEvent::Session(SessionEvent::RefreshFailed { .. }) = event {
                failures += 1;
            }
        }
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_tick_reads_stored_session() {
        let backing = Arc::new(MemorySecureStore::new());
        backing
            .set_secret("access_token", jwt_with_exp(NOW + 3600).as_bytes())
            .await
            .unwrap();
        backing.set_secret("refresh_token", b"r1").await.unwrap();

        let (keepalive, session, _) = keepalive_over(None, 200, backing).await;
        assert_eq!(
            keepalive.tick().await,
            TickOutcome::Fresh { expires_in: 3600 }
        );
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn test_stop_cancels_task() {
        let (keepalive, _) = keepalive_with(None).await;
        keepalive.spawn();
        assert!(keepalive.is_running());

        keepalive.stop();
        assert!(!keepalive.is_running());
    }
}
