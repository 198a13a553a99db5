use std::num::NonZeroUsize;

use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

/// LRU embedding cache keyed by `hash(text) || model_version`. A hit
/// bypasses both the network call and the rate limiter.
pub struct EmbedCache {
    inner: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbedCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    #[must_use]
    pub fn cache_key(text: &str, model_version: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(b"||");
        hasher.update(model_version.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn get(&self, key: &str) -> Option<Vec<f32>> {
        self.inner.lock().await.get(key).cloned()
    }

    pub async fn put(&self, key: String, vector: Vec<f32>) {
        self.inner.lock().await.put(key, vector);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_returns_stored_vector_for_matching_key() {
        let cache = EmbedCache::new(4);
        let key = EmbedCache::cache_key("scrubbed text", "text-embed-v1");
        cache.put(key.clone(), vec![0.1, 0.2, 0.3]).await;
        assert_eq!(cache.get(&key).await, Some(vec![0.1, 0.2, 0.3]));
    }

    #[tokio::test]
    async fn cache_key_changes_with_model_version() {
        let a = EmbedCache::cache_key("same text", "v1");
        let b = EmbedCache::cache_key("same text", "v2");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn cache_evicts_least_recently_used_entry_beyond_capacity() {
        let cache = EmbedCache::new(1);
        cache.put("a".to_string(), vec![1.0]).await;
        cache.put("b".to_string(), vec![2.0]).await;
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, Some(vec![2.0]));
    }
}
