//! Secure Credential Storage using OS Keychain

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use keyring::Entry;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Keychain entry listing every key this store has written.
const INDEX_KEY: &str = "__lexdesk_keys";

/// Keyring-based secure storage implementation
///
/// Uses platform-specific secure storage:
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service (libsecret)
///
/// The OS keychain cannot enumerate entries, so the store keeps its own
/// index entry to support `list_keys` and `clear_all`.
pub struct KeyringSecureStore {
    service_name: String,
    index_lock: Mutex<()>,
}

impl KeyringSecureStore {
    /// Create a new secure store with default service name
    pub fn new() -> Self {
        Self::with_service_name("lexdesk-client")
    }

    /// Create a new secure store with custom service name
    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            index_lock: Mutex::new(()),
        }
    }

    fn get_entry(&self, key: &str) -> std::result::Result<Entry, keyring::Error> {
        Entry::new(&self.service_name, key)
    }

    fn map_keyring_error(e: keyring::Error) -> BridgeError {
        BridgeError::OperationFailed(format!("Keyring error: {}", e))
    }

    fn read_raw(&self, key: &str) -> Result<Option<String>> {
        let entry = self.get_entry(key).map_err(Self::map_keyring_error)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }

    fn delete_raw(&self, key: &str) -> Result<()> {
        let entry = self.get_entry(key).map_err(Self::map_keyring_error)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }

    fn read_index(&self) -> Result<Vec<String>> {
        match self.read_raw(INDEX_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "Keychain index unreadable, starting a new one");
                Vec::new()
            })),
            None => Ok(Vec::new()),
        }
    }

    fn write_index(&self, keys: &[String]) -> Result<()> {
        let raw = serde_json::to_string(keys)
            .map_err(|e| BridgeError::OperationFailed(format!("Index encoding failed: {}", e)))?;
        let entry = self.get_entry(INDEX_KEY).map_err(Self::map_keyring_error)?;
        entry.set_password(&raw).map_err(Self::map_keyring_error)
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        // Keyring only stores strings
        let encoded = STANDARD.encode(value);

        let entry = self.get_entry(key).map_err(Self::map_keyring_error)?;
        entry
            .set_password(&encoded)
            .map_err(Self::map_keyring_error)?;

        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index()?;
        if !index.iter().any(|k| k == key) {
            index.push(key.to_string());
            self.write_index(&index)?;
        }

        debug!(key = key, "Stored secret in keyring");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(encoded) = self.read_raw(key)? else {
            debug!(key = key, "Secret not found in keyring");
            return Ok(None);
        };

        let decoded = STANDARD.decode(&encoded).map_err(|e| {
            error!(key = key, error = %e, "Failed to decode secret");
            BridgeError::OperationFailed(format!("Failed to decode secret: {}", e))
        })?;

        Ok(Some(decoded))
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        self.delete_raw(key)?;

        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index()?;
        let before = index.len();
        index.retain(|k| k != key);
        if index.len() != before {
            self.write_index(&index)?;
        }

        debug!(key = key, "Deleted secret from keyring");
        Ok(())
    }

    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self.read_raw(key)?.is_some())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let _guard = self.index_lock.lock().await;
        self.read_index()
    }

    async fn clear_all(&self) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        for key in self.read_index()? {
            self.delete_raw(&key)?;
        }
        self.delete_raw(INDEX_KEY)
    }
}
