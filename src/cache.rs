/// Response cache keyed by request fingerprint, with TTL expiry
///
/// Entries live in a sharded concurrent map, so readers and writers of
/// unrelated keys never contend on a common lock. TTL expiry is the only
/// deletion path: an expired entry is treated as absent and dropped when
/// observed.
use crate::clock::{Clock, MonotonicClock};
use crate::metrics::CacheMetrics;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache key schema version - increment when changing the fingerprint format
pub const KEY_SCHEMA_VERSION: u32 = 1;

/// Deterministic identifier for an outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Arbitrary caller-supplied key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Fingerprint of an outbound HTTP request.
    /// Format: v{VERSION}:req:{METHOD}:{sha256(url, body)}
    pub fn for_request(method: &str, url: &str, body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update([0u8]);
        hasher.update(body);
        let digest = hex::encode(hasher.finalize());
        Self(format!(
            "v{}:req:{}:{}",
            KEY_SCHEMA_VERSION,
            method.to_ascii_uppercase(),
            digest
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct CacheEntry<T> {
    value: T,
    stored_at: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) >= self.ttl
    }
}

/// TTL-bounded store of successful responses.
#[derive(Clone)]
pub struct ResponseCache<T> {
    entries: Arc<DashMap<CacheKey, CacheEntry<T>>>,
    clock: Arc<dyn Clock>,
}

impl<T: Clone> ResponseCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock: Arc::new(MonotonicClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The stored value iff present and not expired. A miss is `None`;
    /// an observed-expired entry is dropped.
    pub fn get(&self, key: &CacheKey) -> Option<T> {
        let now = self.clock.now();
        let hit = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => {
                CacheMetrics::record_operation("miss");
                return None;
            }
        };
        match hit {
            Some(value) => {
                CacheMetrics::record_operation("hit");
                Some(value)
            }
            None => {
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                CacheMetrics::record_operation("expired");
                None
            }
        }
    }

    /// Store a value, overwriting any existing entry and restarting its TTL.
    pub fn put(&self, key: CacheKey, value: T, ttl: Duration) {
        CacheMetrics::record_operation("store");
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: self.clock.now(),
                ttl,
            },
        );
    }

    /// Drop every expired entry in one sweep.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Clone> Default for ResponseCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache plus the TTL applied to entries it stores, as registered in the
/// policy registry. The executor consults it before any inner policy runs
/// and stores only successful outcomes.
#[derive(Clone)]
pub struct CachePolicy<T> {
    pub(crate) cache: ResponseCache<T>,
    pub(crate) ttl: Duration,
}

impl<T: Clone> CachePolicy<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: ResponseCache::new(),
            ttl,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.cache = self.cache.with_clock(clock);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn cache(&self) -> &ResponseCache<T> {
        &self.cache
    }

    pub(crate) fn lookup(&self, key: &CacheKey) -> Option<T> {
        let value = self.cache.get(key);
        if value.is_some() {
            debug!(key = %key, "cache hit, skipping inner policies");
        } else {
            debug!(key = %key, "cache miss");
        }
        value
    }

    pub(crate) fn store(&self, key: CacheKey, value: T) {
        self.cache.put(key, value, self.ttl);
    }
}
