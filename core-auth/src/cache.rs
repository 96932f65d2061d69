//! In-memory LRU cache of successful GET responses.
//!
//! Entries are keyed by method and full URL. The cache belongs to the
//! session: logout empties it so nothing fetched with one user's token is
//! served to the next.

use bridge_traits::http::{HttpMethod, HttpRequest, HttpResponse};
use lru::LruCache;
use std::num::NonZeroUsize;
use tokio::sync::Mutex;
use tracing::debug;

pub struct ResponseCache {
    /// `None` when caching is disabled (capacity 0)
    entries: Option<Mutex<LruCache<String, HttpResponse>>>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    /// Whether `request` is eligible for caching at all.
    pub fn accepts(&self, request: &HttpRequest) -> bool {
        self.is_enabled() && request.method == HttpMethod::Get
    }

    fn key(request: &HttpRequest) -> String {
        format!("{} {}", request.method, request.url)
    }

    pub async fn get(&self, request: &HttpRequest) -> Option<HttpResponse> {
        if !self.accepts(request) {
            return None;
        }
        let entries = self.entries.as_ref()?;
        let hit = entries.lock().await.get(&Self::key(request)).cloned();
        if hit.is_some() {
            debug!(method = %request.method, path = %request.path(), "Response cache hit");
        }
        hit
    }

    /// Stores a successful GET response; anything else is ignored.
    pub async fn put(&self, request: &HttpRequest, response: &HttpResponse) {
        if !self.accepts(request) || !response.is_success() {
            return;
        }
        if let Some(entries) = &self.entries {
            entries
                .lock()
                .await
                .put(Self::key(request), response.clone());
        }
    }

    pub async fn clear(&self) {
        if let Some(entries) = &self.entries {
            let mut entries = entries.lock().await;
            let evicted = entries.len();
            entries.clear();
            debug!(evicted, "Response cache cleared");
        }
    }

    pub async fn len(&self) -> usize {
        match &self.entries {
            Some(entries) => entries.lock().await.len(),
            None => 0,
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(core_runtime::config::DEFAULT_RESPONSE_CACHE_CAPACITY)
    }
}
