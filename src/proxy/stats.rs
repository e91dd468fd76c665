//! Request timing statistics
//!
//! Reporting only. Nothing in the routing path depends on these numbers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Served from the cache
    Hit,
    /// Fetched from the origin
    Miss,
    /// Refused by the blacklist
    Blocked,
}

#[derive(Debug, Default, Clone, Copy)]
struct KeyTimings {
    hits: u32,
    hit_total: Duration,
    misses: u32,
    miss_total: Duration,
}

impl KeyTimings {
    /// Mean miss time minus mean hit time, when the key was seen both ways.
    fn saved_ms(&self) -> Option<f64> {
        if self.hits == 0 || self.misses == 0 {
            return None;
        }
        let hit = self.hit_total.as_secs_f64() * 1000.0 / self.hits as f64;
        let miss = self.miss_total.as_secs_f64() * 1000.0 / self.misses as f64;
        Some(miss - hit)
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    hits: u64,
    misses: u64,
    blocked: u64,
    per_key: HashMap<String, KeyTimings>,
}

/// Aggregate figures handed to the reporting side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsReport {
    pub hits: u64,
    pub misses: u64,
    pub blocked: u64,
    /// Mean over keys seen both as hit and miss of (mean miss - mean hit).
    pub average_time_saved_ms: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ProxyStats {
    inner: Arc<RwLock<StatsInner>>,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, key: &str, outcome: Outcome, elapsed: Duration) {
        let mut inner = self.inner.write().await;

        match outcome {
            Outcome::Blocked => {
                inner.blocked += 1;
                return;
            }
            Outcome::Hit => inner.hits += 1,
            Outcome::Miss => inner.misses += 1,
        }

        let timings = inner.per_key.entry(key.to_string()).or_default();
        match outcome {
            Outcome::Hit => {
                timings.hits += 1;
                timings.hit_total += elapsed;
            }
            Outcome::Miss => {
                timings.misses += 1;
                timings.miss_total += elapsed;
            }
            Outcome::Blocked => {}
        }
    }

    /// Drops per-key timings for every key `keep` rejects.
    ///
    /// Counters are untouched. Returns how many keys were dropped.
    pub async fn retain_keys<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let mut inner = self.inner.write().await;
        let before = inner.per_key.len();
        inner.per_key.retain(|key, _| keep(key));
        before - inner.per_key.len()
    }

    /// Number of keys with recorded timings.
    pub async fn tracked_keys(&self) -> usize {
        self.inner.read().await.per_key.len()
    }

    pub async fn report(&self) -> StatsReport {
        let inner = self.inner.read().await;

        let saved: Vec<f64> = inner.per_key.values().filter_map(KeyTimings::saved_ms).collect();
        let average_time_saved_ms = if saved.is_empty() {
            None
        } else {
            Some(saved.iter().sum::<f64>() / saved.len() as f64)
        };

        StatsReport {
            hits: inner.hits,
            misses: inner.misses,
            blocked: inner.blocked,
            average_time_saved_ms,
        }
    }
}
