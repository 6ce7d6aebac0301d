//! Time-bounded memoization of upstream fetches.
//!
//! Entries expire after an idle TTL measured from last access and the map is
//! bounded; when full, expired entries are swept first and then the least
//! recently accessed entry is dropped. Concurrent misses on the same key are
//! coalesced so only one fetch per key is in flight.
//!
//! Every `invalidate` bumps a per-resource generation. A fetch that started
//! before the bump does not store its result, so a response read before an
//! upstream change can never outlive the invalidation that announced it.

use crate::client::ResourceClient;
use crate::error::IndexerResult;
use crate::telemetry::Telemetry;
use async_trait::async_trait;
use config::{CacheConfig, EndpointDescriptor};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub resource_type: String,
    pub include: String,
    pub object_id: String
}

impl CacheKey {
    pub fn new(endpoint: &EndpointDescriptor, object_id: Option<&str>) -> Self {
        Self {
            resource_type: endpoint.resource_type.clone(),
            include: endpoint.include_param().unwrap_or_default(),
            object_id: object_id.unwrap_or_default().to_string()
        }
    }
}

type ResourceRef = (String, String);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<str>,
    last_accessed_at: Instant
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_accessed_at.elapsed() >= ttl
    }
}

pub struct ResponseCache {
    entries: DashMap<CacheKey, CacheEntry>,
    in_flight: DashMap<CacheKey, Arc<Mutex<()>>>,
    generations: DashMap<ResourceRef, u64>,
    ttl: Duration,
    max_entries: usize
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            generations: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1)
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl(), config.max_entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<str>> {
        let mut entry = self.entries.get_mut(key)?;
        if entry.is_expired(self.ttl) {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        entry.last_accessed_at = Instant::now();
        Some(entry.value.clone())
    }

    /// Returns the cached value or runs `fetcher` once per key. Failed
    /// fetches are not cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, fetcher: F) -> IndexerResult<Arc<str>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = IndexerResult<String>>
    {
        if let Some(value) = self.get(&key) {
            Telemetry::record_cache_hit();
            return Ok(value);
        }

        let lock = self.in_flight.entry(key.clone()).or_default().clone();
        let _guard = lock.lock().await;

        if let Some(value) = self.get(&key) {
            Telemetry::record_cache_hit();
            return Ok(value);
        }

        Telemetry::record_cache_miss();
        let generation = self.generation(&key);
        let outcome = fetcher().await.map(|body| {
            let value: Arc<str> = Arc::from(body);
            if self.generation(&key) == generation {
                self.insert(key.clone(), value.clone());
                // invalidate bumps before it sweeps, so a bump landing here is seen now
                if self.generation(&key) != generation {
                    self.entries.remove(&key);
                }
            } else {
                debug!(
                    resource_type = %key.resource_type,
                    object_id = %key.object_id,
                    "Resource invalidated during fetch, result not cached"
                );
            }
            value
        });
        self.in_flight.remove(&key);
        outcome
    }

    fn generation(&self, key: &CacheKey) -> u64 {
        self.generations
            .get(&(key.resource_type.clone(), key.object_id.clone()))
            .map(|generation| *generation)
            .unwrap_or_default()
    }

    fn insert(&self, key: CacheKey, value: Arc<str>) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict();
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                last_accessed_at: Instant::now()
            }
        );
    }

    fn evict(&self) {
        self.entries.retain(|_, entry| !entry.is_expired(self.ttl));

        while self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.last_accessed_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break
            }
        }
    }

    /// Drops every cached fetch of `object_id` for `resource_type`, whatever
    /// include set it was fetched with.
    pub fn invalidate(&self, resource_type: &str, object_id: &str) -> usize {
        *self
            .generations
            .entry((resource_type.to_string(), object_id.to_string()))
            .or_default() += 1;

        let before = self.entries.len();
        self.entries
            .retain(|key, _| !(key.resource_type == resource_type && key.object_id == object_id));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(resource_type = %resource_type, object_id = %object_id, removed, "Invalidated cached fetches");
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// `ResourceClient` decorator serving repeated lookups from a `ResponseCache`.
pub struct CachedResourceClient {
    inner: Arc<dyn ResourceClient>,
    cache: Arc<ResponseCache>
}

impl CachedResourceClient {
    pub fn new(inner: Arc<dyn ResourceClient>, cache: Arc<ResponseCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl ResourceClient for CachedResourceClient {
    async fn fetch(
        &self,
        endpoint: &EndpointDescriptor,
        object_id: Option<&str>
    ) -> IndexerResult<String> {
        let key = CacheKey::new(endpoint, object_id);
        let value = self
            .cache
            .get_or_fetch(key, || self.inner.fetch(endpoint, object_id))
            .await?;
        Ok(value.to_string())
    }
}
