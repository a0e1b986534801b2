//! Response cache for completions.
//!
//! [`ResponseCache`] maps a request [`Fingerprint`] to the text the model
//! returned for it. Entries are written only after a successful upstream
//! call and are never edited afterwards: expiry removes them, it does not
//! refresh them.
//!
//! # Expiry
//!
//! An entry created at `t0` is served for any read at `t` with
//! `t - t0 <= ttl` and is gone for any read after that. Reads that find an
//! expired entry evict it on the spot, so callers never observe a stale hit.
//! Entries that are written but never read again are reclaimed by
//! [`ResponseCache::sweep_expired`], which the client runs on a timer.
//!
//! Timestamps come from `tokio::time::Instant`, so tests can drive expiry
//! with a paused runtime clock instead of sleeping.
//!
//! # Capacity
//!
//! Storage is a moka LRU bounded by [`CacheConfig::max_entries`]. TTL is
//! tracked here rather than by moka so that the boundary above is exact
//! and sweeps can report how much they removed.

use std::time::Duration;

use moka::sync::Cache;
use tokio::time::Instant;
use tracing::debug;

use crate::fingerprint::Fingerprint;
use crate::telemetry;

/// Configuration for the response cache.
///
/// ```rust
/// # use muninn::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(10_000)
///     .ttl(Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether completions are cached at all. Default: true.
    pub enabled: bool,
    /// Maximum age of a served entry. Default: 1 hour.
    pub ttl: Duration,
    /// Maximum number of cached entries. Default: 10,000.
    pub max_entries: u64,
    /// Period of the background sweep. Default: `None`, meaning `ttl`.
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(3600),
            max_entries: 10_000,
            sweep_interval: None,
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Config with caching switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the time-to-live for cached entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set how often expired entries are swept.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Effective sweep period. Never zero, so the sweep loop cannot spin.
    pub fn effective_sweep_interval(&self) -> Duration {
        self.sweep_interval
            .unwrap_or(self.ttl)
            .max(Duration::from_millis(1))
    }
}

/// A cached completion.
#[derive(Debug, Clone)]
pub struct CachedCompletion {
    pub text: String,
    pub created_at: Instant,
    /// Model that produced the text.
    pub model: String,
    /// Approximate completion size in tokens.
    pub approx_tokens: u32,
}

impl CachedCompletion {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > ttl
    }
}

/// In-memory completion cache keyed by request fingerprint.
pub struct ResponseCache {
    entries: Cache<Fingerprint, CachedCompletion>,
    ttl: Duration,
}

impl ResponseCache {
    /// Create a new response cache with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let entries = Cache::builder().max_capacity(config.max_entries).build();
        Self {
            entries,
            ttl: config.ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a live entry.
    ///
    /// Returns `None` on miss or if the entry has outlived the TTL, in
    /// which case it is evicted. Emits cache hit/miss metrics.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CachedCompletion> {
        let found = match self.entries.get(fingerprint) {
            Some(entry) if entry.is_expired(self.ttl, Instant::now()) => {
                self.entries.invalidate(fingerprint);
                debug!(fingerprint = %fingerprint.short(), "cache entry expired on read");
                None
            }
            other => other,
        };

        if found.is_some() {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
        } else {
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
        }
        found
    }

    /// Insert a completion, replacing any previous entry for the fingerprint.
    pub fn insert(
        &self,
        fingerprint: Fingerprint,
        text: impl Into<String>,
        model: impl Into<String>,
        approx_tokens: u32,
    ) {
        let entry = CachedCompletion {
            text: text.into(),
            created_at: Instant::now(),
            model: model.into(),
            approx_tokens,
        };
        debug!(fingerprint = %fingerprint.short(), tokens = approx_tokens, "added to cache");
        self.entries.insert(fingerprint, entry);
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Fingerprint> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl, now))
            .map(|(key, _)| *key)
            .collect();

        for key in &expired {
            self.entries.invalidate(key);
        }

        if !expired.is_empty() {
            metrics::counter!(telemetry::CACHE_SWEPT_TOTAL).increment(expired.len() as u64);
            debug!(count = expired.len(), "swept expired cache entries");
        }
        expired.len()
    }

    /// Number of stored entries, live or not yet swept.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict all entries.
    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }
}
