//! Response cache
//!
//! Maps a canonical request URL to the response last fetched for it. Every
//! entry lives for the same fixed TTL. Staleness is checked on every lookup,
//! so an expired entry is never served even if the sweeper has not reached it.
//!
//! Lock discipline: reads take the shared lock, inserts and evictions take
//! the exclusive lock, and the sweeper never holds the exclusive lock across
//! the whole map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::http::response::{Response, ResponseBuilder, StatusCode};

/// Default time-to-live of a cached response.
pub const DEFAULT_TTL: Duration = Duration::from_secs(20);

/// A cached origin response. Immutable once built; a refresh replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub status: StatusCode,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub fetched_at: Instant,
}

impl CacheEntry {
    pub fn new(status: StatusCode, headers: HashMap<String, String>, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            fetched_at: Instant::now(),
        }
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }

    /// Builds the client response for this entry.
    pub fn to_response(&self) -> Response {
        ResponseBuilder::new(self.status)
            .headers(self.headers.clone())
            .body(self.body.clone())
            .build()
    }
}

/// Aggregate view of the cache for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSnapshot {
    pub entries: usize,
    pub total_bytes: usize,
    /// `(key, body size)` pairs sorted by key.
    pub sizes: Vec<(String, usize)>,
}

/// Shared cache handle. Clones refer to the same map.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    entries: Arc<RwLock<HashMap<String, Arc<CacheEntry>>>>,
    ttl: Duration,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the entry for `key` if it is still fresh.
    ///
    /// A stale entry found here is evicted on the spot.
    pub async fn lookup(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.read().await.get(key).cloned()?;

        if entry.is_fresh(self.ttl) {
            return Some(entry);
        }

        self.evict_if_stale(key).await;
        None
    }

    /// Stores `entry` under `key`, replacing whatever was there.
    pub async fn insert(&self, key: impl Into<String>, entry: CacheEntry) {
        let key = key.into();
        tracing::trace!(key = %key, bytes = entry.body.len(), "Caching response");
        self.entries.write().await.insert(key, Arc::new(entry));
    }

    /// Evicts every entry older than the TTL and returns how many were removed.
    ///
    /// Candidates are collected under the shared lock, then each one is
    /// removed under its own short exclusive lock.
    pub async fn sweep(&self) -> usize {
        let candidates: Vec<String> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(_, entry)| !entry.is_fresh(self.ttl))
                .map(|(key, _)| key.clone())
                .collect()
        };

        let mut evicted = 0;
        for key in candidates {
            if self.evict_if_stale(&key).await {
                evicted += 1;
            }
            tokio::task::yield_now().await;
        }

        if evicted > 0 {
            tracing::debug!(evicted, "Cache sweep evicted stale entries");
        }
        evicted
    }

    /// Starts the background sweeper, pausing `interval` between passes.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.sweep().await;
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn snapshot(&self) -> CacheSnapshot {
        let entries = self.entries.read().await;
        let mut sizes: Vec<(String, usize)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.body.len()))
            .collect();
        sizes.sort();

        CacheSnapshot {
            entries: sizes.len(),
            total_bytes: sizes.iter().map(|(_, n)| n).sum(),
            sizes,
        }
    }

    /// Removes `key` only if the entry currently stored is stale, so a fresh
    /// insert racing with the eviction survives.
    async fn evict_if_stale(&self, key: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if !entry.is_fresh(self.ttl) => {
                entries.remove(key);
                tracing::trace!(key = %key, "Evicted stale cache entry");
                true
            }
            _ => false,
        }
    }
}
