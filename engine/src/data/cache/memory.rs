//! In-memory cache store using moka + dashmap
//!
//! Uses moka for the entries (LRU eviction, TTL since insertion) and dashmap
//! for per-dataset recency tracking, which bounds how many distinct datasets
//! a store keeps entries for.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use parking_lot::Mutex;
use serde::Serialize;

use super::error::CacheError;
use super::key::StoreKey;

/// Store sizing and expiry
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub ttl: Duration,
    pub max_entries: u64,
    /// Maximum distinct owning datasets; `None` leaves only the entry bound
    pub max_datasets: Option<usize>,
}

impl StoreConfig {
    pub fn validate(&self, name: &str) -> Result<(), CacheError> {
        if self.max_entries == 0 {
            return Err(CacheError::Config(format!(
                "{} cache max_entries must be greater than zero",
                name
            )));
        }
        if self.ttl.is_zero() {
            return Err(CacheError::Config(format!(
                "{} cache ttl must be greater than zero",
                name
            )));
        }
        if self.max_datasets == Some(0) {
            return Err(CacheError::Config(format!(
                "{} cache max_datasets must be greater than zero",
                name
            )));
        }
        Ok(())
    }
}

/// Cached value with access metadata
pub struct CacheEntry<V> {
    pub key: String,
    pub dataset_id: String,
    pub value: V,
    pub created_at: DateTime<Utc>,
    last_accessed_at: Mutex<DateTime<Utc>>,
    hit_count: AtomicU64,
}

impl<V> CacheEntry<V> {
    fn new(key: String, dataset_id: String, value: V) -> Self {
        let now = Utc::now();
        Self {
            key,
            dataset_id,
            value,
            created_at: now,
            last_accessed_at: Mutex::new(now),
            hit_count: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        *self.last_accessed_at.lock() = Utc::now();
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        *self.last_accessed_at.lock()
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }
}

/// Counters reported by [`CacheStore::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entry_count: u64,
    pub dataset_count: u64,
}

/// One typed cache store
pub struct CacheStore<K, V> {
    name: &'static str,
    cache: Cache<String, Arc<CacheEntry<V>>>,
    /// dataset id -> logical access tick
    recency: DashMap<String, u64>,
    max_datasets: Option<usize>,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    _key: PhantomData<fn(&K)>,
}

impl<K, V> CacheStore<K, V>
where
    K: StoreKey,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, config: StoreConfig) -> Result<Self, CacheError> {
        config.validate(name)?;

        let cache = Cache::builder()
            .name(name)
            .max_capacity(config.max_entries)
            .initial_capacity((config.max_entries as usize / 4).min(1_024))
            .eviction_policy(EvictionPolicy::lru())
            .time_to_live(config.ttl)
            .build();

        tracing::debug!(
            store = name,
            max_entries = config.max_entries,
            ttl_secs = config.ttl.as_secs(),
            max_datasets = ?config.max_datasets,
            "Cache store initialized"
        );

        Ok(Self {
            name,
            cache,
            recency: DashMap::new(),
            max_datasets: config.max_datasets,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            _key: PhantomData,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look up a value. Expired entries count as misses.
    pub fn get(&self, key: &K) -> Option<V> {
        match self.cache.get(&key.render()) {
            Some(entry) => {
                entry.touch();
                self.hits.fetch_add(1, Ordering::Relaxed);
                let tick = self.tick();
                self.recency.insert(key.dataset_id().to_string(), tick);
                Some(entry.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Entry metadata without counting a hit or miss
    pub fn peek(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
        self.cache.get(&key.render())
    }

    pub fn put(&self, key: &K, value: V) {
        let rendered = key.render();
        let dataset_id = key.dataset_id().to_string();
        let entry = Arc::new(CacheEntry::new(rendered.clone(), dataset_id.clone(), value));

        let tick = self.tick();
        self.recency.insert(dataset_id.clone(), tick);
        self.cache.insert(rendered, entry);
        self.enforce_dataset_limit(&dataset_id);
        self.cache.run_pending_tasks();
    }

    pub fn invalidate(&self, key: &K) {
        self.cache.invalidate(&key.render());
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
        self.recency.clear();
    }

    /// Remove every entry owned by `dataset_id`. Returns the number removed.
    pub fn invalidate_dataset(&self, dataset_id: &str) -> usize {
        let keys: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.dataset_id == dataset_id)
            .map(|(key, _)| key)
            .collect();

        for key in &keys {
            self.cache.invalidate(key.as_ref());
        }
        self.recency.remove(dataset_id);
        self.cache.run_pending_tasks();

        if !keys.is_empty() {
            tracing::debug!(
                store = self.name,
                dataset_id,
                removed = keys.len(),
                "Invalidated dataset entries"
            );
        }
        keys.len()
    }

    fn live_datasets(&self) -> Vec<String> {
        let mut datasets: Vec<String> = self
            .cache
            .iter()
            .map(|(_, entry)| entry.dataset_id.clone())
            .collect();
        datasets.sort();
        datasets.dedup();
        datasets
    }

    /// Evict least-recently-used datasets wholesale while over the limit
    fn enforce_dataset_limit(&self, keep: &str) {
        let Some(max) = self.max_datasets else {
            return;
        };

        let mut live = self.live_datasets();
        while live.len() > max {
            let victim = live
                .iter()
                .filter(|d| d.as_str() != keep)
                .min_by_key(|d| self.recency.get(d.as_str()).map(|t| *t).unwrap_or(0))
                .cloned();
            let Some(victim) = victim else {
                break;
            };
            tracing::debug!(store = self.name, dataset_id = %victim, "Evicting dataset");
            self.invalidate_dataset(&victim);
            live.retain(|d| d != &victim);
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.run_pending_tasks();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            entry_count: self.cache.entry_count(),
            dataset_count: self.live_datasets().len() as u64,
        }
    }
}
