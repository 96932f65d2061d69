//! # Refresh Coordinator
//!
//! Makes sure at most one token refresh is in flight. The first caller
//! starts the refresh; everyone who arrives while it runs awaits the same
//! outcome instead of issuing another call.
//!
//! The refresh runs on its own task, so it completes even if every waiter
//! is dropped. The coordinator returns to idle before the outcome reaches
//! the waiters, and the refresher has persisted the new pair by then, so a
//! retried request always reads the fresh token.

use crate::error::{AuthError, Result};
use crate::types::{decode_claims, TokenPair};
use async_trait::async_trait;
use core_runtime::events::{EventBus, SessionEvent};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

/// Performs the actual refresh call and persists its result.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<TokenPair>;
}

type SharedRefresh = Shared<BoxFuture<'static, Result<TokenPair>>>;

enum State {
    Idle,
    Refreshing { id: u64, outcome: SharedRefresh },
}

/// Single-flight gate in front of a [`TokenRefresher`].
pub struct RefreshCoordinator {
    refresher: Arc<dyn TokenRefresher>,
    event_bus: EventBus,
    state: Arc<Mutex<State>>,
    next_id: AtomicU64,
    completed: Arc<AtomicU64>,
}

impl RefreshCoordinator {
    pub fn new(refresher: Arc<dyn TokenRefresher>, event_bus: EventBus) -> Self {
        Self {
            refresher,
            event_bus,
            state: Arc::new(Mutex::new(State::Idle)),
            next_id: AtomicU64::new(0),
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Refreshes the token pair, joining the refresh already in flight if
    /// there is one. Every waiter of one refresh gets the same outcome.
    ///
    /// Must be called within a tokio runtime.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<TokenPair> {
        let outcome = {
            let mut state = lock(&self.state);
            match &*state {
                State::Refreshing { id, outcome } => {
                    debug!(refresh_id = id, "Joining in-flight refresh");
                    outcome.clone()
                }
                State::Idle => {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                    let outcome = self.start(id);
                    *state = State::Refreshing {
                        id,
                        outcome: outcome.clone(),
                    };
                    outcome
                }
            }
        };

        outcome.await
    }

    fn start(&self, id: u64) -> SharedRefresh {
        info!(refresh_id = id, "Starting token refresh");
        self.event_bus.emit_session(SessionEvent::TokenRefreshing);

        let refresher = Arc::clone(&self.refresher);
        let state = Arc::clone(&self.state);
        let completed = Arc::clone(&self.completed);
        let event_bus = self.event_bus.clone();

        let task = tokio::spawn(async move {
            let result = refresher.refresh().await;
            completed.fetch_add(1, Ordering::SeqCst);

            {
                let mut state = lock(&state);
                if matches!(&*state, State::Refreshing { id: current, .. } if *current == id) {
                    *state = State::Idle;
                }
            }

            match &result {
                Ok(pair) => {
                    let expires_at = decode_claims(&pair.access_token).ok().map(|c| c.exp);
                    info!(refresh_id = id, ?expires_at, "Token refresh succeeded");
                    event_bus.emit_session(SessionEvent::TokenRefreshed { expires_at });
                }
                Err(AuthError::SessionEnded) => {
                    info!(refresh_id = id, "Refresh finished after the session ended");
                }
                Err(err) => {
                    warn!(refresh_id = id, error = %err, "Token refresh failed");
                    event_bus.emit_session(SessionEvent::RefreshFailed {
                        message: err.to_string(),
                    });
                }
            }

            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(join_err) => Err(AuthError::RefreshFailed(format!(
                    "refresh task did not complete: {}",
                    join_err
                ))),
            }
        }
        .boxed()
        .shared()
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(&*lock(&self.state), State::Refreshing { .. })
    }

    /// Number of refresh calls that have completed, successfully or not.
    pub fn refresh_count(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::jwt_with_exp;
    use core_runtime::events::CoreEvent;
    use futures::future::join_all;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    struct GatedRefresher {
        gate: Semaphore,
        calls: AtomicU64,
        outcome: Result<TokenPair>,
    }

    impl GatedRefresher {
        fn new(outcome: Result<TokenPair>) -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                calls: AtomicU64::new(0),
                outcome,
            })
        }

        fn release(&self) {
            self.gate.add_permits(1);
        }
    }

    #[async_trait]
    impl TokenRefresher for GatedRefresher {
        async fn refresh(&self) -> Result<TokenPair> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            self.outcome.clone()
        }
    }

    fn fresh_pair() -> TokenPair {
        TokenPair::new(jwt_with_exp(2_000_000_000), "r2")
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let refresher = GatedRefresher::new(Ok(fresh_pair()));
        let coordinator = RefreshCoordinator::new(refresher.clone(), EventBus::default());

        let callers = join_all((0..5).map(|_| coordinator.refresh()));
        let (results, _) = tokio::join!(callers, async {
            refresher.release();
        });

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.refresh_count(), 1);
        for result in results {
            assert_eq!(result.unwrap(), fresh_pair());
        }
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let refresher = GatedRefresher::new(Err(AuthError::RefreshFailed("HTTP 401".into())));
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let coordinator = RefreshCoordinator::new(refresher.clone(), bus);

        let callers = join_all((0..3).map(|_| coordinator.refresh()));
        let (results, _) = tokio::join!(callers, async {
            refresher.release();
        });

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap_err(), AuthError::RefreshFailed("HTTP 401".into()));
        }

        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Session(SessionEvent::TokenRefreshing)
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Session(SessionEvent::RefreshFailed { .. })
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sequential_refreshes_each_call_refresher() {
        let refresher = GatedRefresher::new(Ok(fresh_pair()));
        let coordinator = RefreshCoordinator::new(refresher.clone(), EventBus::default());

        refresher.release();
        coordinator.refresh().await.unwrap();
        refresher.release();
        coordinator.refresh().await.unwrap();

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_refresh_completes_when_waiters_go_away() {
        let refresher = GatedRefresher::new(Ok(fresh_pair()));
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let coordinator = RefreshCoordinator::new(refresher.clone(), bus);

        let abandoned = tokio::time::timeout(Duration::from_millis(10), coordinator.refresh()).await;
        assert!(abandoned.is_err());
        assert!(coordinator.is_refreshing());

        refresher.release();

        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Session(SessionEvent::TokenRefreshing)
        );
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Session(SessionEvent::TokenRefreshed {
                expires_at: Some(2_000_000_000)
            })
        );
        assert_eq!(coordinator.refresh_count(), 1);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_session_ended_is_not_reported_as_failure() {
        let refresher = GatedRefresher::new(Err(AuthError::SessionEnded));
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let coordinator = RefreshCoordinator::new(refresher.clone(), bus);

        refresher.release();
        assert_eq!(coordinator.refresh().await, Err(AuthError::SessionEnded));

        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Session(SessionEvent::TokenRefreshing)
        );
        assert!(events.try_recv().is_err());
    }
}
