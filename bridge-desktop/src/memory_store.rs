//! In-process `SecureStore`.

use async_trait::async_trait;
use bridge_traits::{error::Result, storage::SecureStore};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Secrets held in a map for the lifetime of the process.
///
/// Nothing is written to disk, so a restart always starts signed out.
#[derive(Debug, Default)]
pub struct MemorySecureStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureStore for MemorySecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn clear_all(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_and_delete() {
        let store = MemorySecureStore::new();
        store.set_secret("access_token", b"abc").await.unwrap();

        assert_eq!(
            store.get_secret("access_token").await.unwrap(),
            Some(b"abc".to_vec())
        );
        assert!(store.has_secret("access_token").await.unwrap());

        store.delete_secret("access_token").await.unwrap();
        assert!(!store.has_secret("access_token").await.unwrap());

        // Deleting twice is fine
        store.delete_secret("access_token").await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_all() {
        let store = MemorySecureStore::new();
        store.set_secret("a", b"1").await.unwrap();
        store.set_secret("b", b"2").await.unwrap();
        assert_eq!(store.list_keys().await.unwrap().len(), 2);

        store.clear_all().await.unwrap();
        assert!(store.list_keys().await.unwrap().is_empty());
    }
}
