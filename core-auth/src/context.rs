//! One-stop wiring of the session components.

use crate::client::AuthenticatedClient;
use crate::coordinator::RefreshCoordinator;
use crate::error::Result;
use crate::keepalive::SessionKeepAlive;
use crate::session::SessionService;
use core_runtime::config::ClientConfig;
use std::sync::Arc;
use tracing::info;

/// The session service, its refresh coordinator and the authenticated
/// client, sharing one token store and event bus.
///
/// ```no_run
/// use core_auth::AuthContext;
/// use core_runtime::config::ClientConfig;
/// # async fn example(config: ClientConfig) -> core_auth::Result<()> {
/// let auth = AuthContext::initialize(config).await?;
/// let _keepalive = auth.start_keepalive();
///
/// let cases: serde_json::Value = auth.client().get_json("/cases").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AuthContext {
    session: Arc<SessionService>,
    coordinator: Arc<RefreshCoordinator>,
    client: AuthenticatedClient,
}

impl AuthContext {
    /// Builds the components without touching storage.
    pub fn new(config: ClientConfig) -> Self {
        let session = Arc::new(SessionService::new(config));
        let coordinator = Arc::new(RefreshCoordinator::new(
            session.clone(),
            session.event_bus().clone(),
        ));
        let client = AuthenticatedClient::new(session.clone(), coordinator.clone());
        Self {
            session,
            coordinator,
            client,
        }
    }

    /// Builds the components and restores any persisted session.
    pub async fn initialize(config: ClientConfig) -> Result<Self> {
        let context = Self::new(config);
        let authenticated = context.session.restore().await?;
        info!(authenticated, "Auth context initialized");
        Ok(context)
    }

    pub fn session(&self) -> &Arc<SessionService> {
        &self.session
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    /// Starts the background keep-alive. It runs until the returned handle
    /// is stopped or dropped.
    pub fn start_keepalive(&self) -> Arc<SessionKeepAlive> {
        SessionKeepAlive::start(self.session.clone(), self.coordinator.clone())
    }
}
