//! Session Token Storage
//!
//! Owns the token pair and the cached user profile. Values are persisted
//! through the host `SecureStore` and mirrored in an in-memory snapshot so
//! the request pipeline can read them synchronously.
//!
//! ## Guarantees
//!
//! - Both tokens are persisted before the snapshot changes, and the snapshot
//!   is replaced in one step: readers never see a half-updated pair
//! - Token values are never logged
//! - A corrupted user blob is deleted on read
//! - Every `clear()` advances the session epoch; writes tagged with an older
//!   epoch are dropped (see [`TokenStore::set_tokens_if_epoch`])
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{TokenPair, TokenStore};
//! use core_runtime::config::StorageKeys;
//! use std::sync::Arc;
//! # use bridge_traits::storage::SecureStore;
//! # async fn example(secure_store: Arc<dyn SecureStore>) -> core_auth::Result<()> {
//! let store = TokenStore::new(secure_store, StorageKeys::default());
//! store.load().await?;
//!
//! store.set_tokens(&TokenPair::new("access", "refresh")).await?;
//! assert_eq!(store.access_token().as_deref(), Some("access"));
//!
//! store.clear().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::{TokenPair, UserProfile};
use bridge_traits::storage::SecureStore;
use core_runtime::config::StorageKeys;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone)]
struct Snapshot {
    tokens: Option<TokenPair>,
    user: Option<UserProfile>,
}

/// Persistent session state with a synchronous read path.
pub struct TokenStore {
    secure_store: Arc<dyn SecureStore>,
    keys: StorageKeys,
    snapshot: RwLock<Snapshot>,
    epoch: AtomicU64,
    loaded: AtomicBool,
    /// Serializes writers so an epoch check and the write that follows it
    /// cannot interleave with `clear()`.
    write_lock: Mutex<()>,
}

impl TokenStore {
    pub fn new(secure_store: Arc<dyn SecureStore>, keys: StorageKeys) -> Self {
        debug!("Initializing TokenStore");
        Self {
            secure_store,
            keys,
            snapshot: RwLock::new(Snapshot::default()),
            epoch: AtomicU64::new(0),
            loaded: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    /// Hydrates the snapshot from secure storage.
    ///
    /// Tokens are only restored when both are present. A user blob that no
    /// longer parses is deleted and reported as `StorageCorrupted`; the
    /// tokens are still restored in that case.
    pub async fn load(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let access = self.read_string(&self.keys.access_token).await?;
        let refresh = self.read_string(&self.keys.refresh_token).await?;
        let tokens = match (access, refresh) {
            (Some(access), Some(refresh)) => Some(TokenPair::new(access, refresh)),
            (None, None) => None,
            _ => {
                warn!("Only one of the two tokens is stored, ignoring both");
                None
            }
        };

        let (user, corrupted) = match self.secure_store.get_secret(&self.keys.user).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<UserProfile>(&bytes) {
                Ok(user) => (Some(user), None),
                Err(e) => {
                    warn!(error = %e, "Cached user profile is corrupted, deleting it");
                    if let Err(delete_err) = self.secure_store.delete_secret(&self.keys.user).await {
                        warn!(error = %delete_err, "Failed to delete corrupted user profile");
                    }
                    (None, Some(e.to_string()))
                }
            },
            Ok(None) => (None, None),
            Err(e) => return Err(storage_error("read user profile", e)),
        };

        info!(
            has_tokens = tokens.is_some(),
            has_user = user.is_some(),
            "Session state loaded from secure storage"
        );

        self.replace_snapshot(Snapshot { tokens, user });
        self.loaded.store(true, Ordering::SeqCst);

        match corrupted {
            Some(reason) => Err(AuthError::StorageCorrupted(reason)),
            None => Ok(()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Runs [`TokenStore::load`] once, on the first call that finds the
    /// snapshot not yet hydrated. A corrupted profile blob is logged and
    /// dropped rather than failing the caller.
    pub async fn ensure_loaded(&self) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }
        match self.load().await {
            Err(AuthError::StorageCorrupted(reason)) => {
                warn!(%reason, "Discarded corrupted session data while hydrating");
                Ok(())
            }
            other => other,
        }
    }

    /// Persists a new token pair and publishes it.
    pub async fn set_tokens(&self, tokens: &TokenPair) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_tokens(tokens).await
    }

    /// Persists `tokens` only if no `clear()` happened since `epoch` was read.
    ///
    /// Returns `Ok(false)` without writing anything when the epoch moved.
    pub async fn set_tokens_if_epoch(&self, tokens: &TokenPair, epoch: u64) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let current = self.epoch();
        if current != epoch {
            info!(
                expected_epoch = epoch,
                current_epoch = current,
                "Discarding token write from an ended session"
            );
            return Ok(false);
        }

        self.write_tokens(tokens).await?;
        Ok(true)
    }

    async fn write_tokens(&self, tokens: &TokenPair) -> Result<()> {
        self.secure_store
            .set_secret(&self.keys.access_token, tokens.access_token.as_bytes())
            .await
            .map_err(|e| storage_error("store access token", e))?;
        self.secure_store
            .set_secret(&self.keys.refresh_token, tokens.refresh_token.as_bytes())
            .await
            .map_err(|e| storage_error("store refresh token", e))?;

        self.update_snapshot(|snapshot| snapshot.tokens = Some(tokens.clone()));
        self.loaded.store(true, Ordering::SeqCst);

        debug!("Token pair stored");
        Ok(())
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.read_snapshot().tokens
    }

    pub fn access_token(&self) -> Option<String> {
        self.read_snapshot().tokens.map(|t| t.access_token)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read_snapshot().tokens.map(|t| t.refresh_token)
    }

    /// Caches the signed-in user's profile.
    pub async fn set_user(&self, user: &UserProfile) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let json = serde_json::to_vec(user)?;
        self.secure_store
            .set_secret(&self.keys.user, &json)
            .await
            .map_err(|e| storage_error("store user profile", e))?;

        self.update_snapshot(|snapshot| snapshot.user = Some(user.clone()));
        Ok(())
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.read_snapshot().user
    }

    /// Removes tokens and profile and ends the current session epoch.
    ///
    /// The snapshot is emptied even when deleting from the secure store
    /// fails; the storage error is still returned.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.replace_snapshot(Snapshot::default());
        self.loaded.store(true, Ordering::SeqCst);

        let mut first_error = None;
        for key in [
            &self.keys.access_token,
            &self.keys.refresh_token,
            &self.keys.user,
        ] {
            if let Err(e) = self.secure_store.delete_secret(key).await {
                warn!(error = %e, "Failed to delete session entry");
                first_error.get_or_insert(storage_error("delete session entry", e));
            }
        }

        info!(epoch, "Session state cleared");

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Current session epoch; advanced by every `clear()`.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    async fn read_string(&self, key: &str) -> Result<Option<String>> {
        let bytes = self
            .secure_store
            .get_secret(key)
            .await
            .map_err(|e| storage_error("read token", e))?;

        match bytes {
            Some(bytes) => String::from_utf8(bytes)
                .map(|s| Some(s).filter(|s| !s.is_empty()))
                .map_err(|e| AuthError::StorageCorrupted(format!("token is not UTF-8: {}", e))),
            None => Ok(None),
        }
    }

    fn read_snapshot(&self) -> Snapshot {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace_snapshot(&self, next: Snapshot) {
        self.update_snapshot(|snapshot| *snapshot = next);
    }

    fn update_snapshot(&self, apply: impl FnOnce(&mut Snapshot)) {
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        apply(&mut guard);
    }
}

fn storage_error(operation: &str, err: bridge_traits::BridgeError) -> AuthError {
    AuthError::StorageUnavailable(format!("{}: {}", operation, err))
}
