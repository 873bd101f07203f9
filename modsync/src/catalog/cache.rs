//! Short-lived cache of raw catalog responses.
//!
//! Suppresses identical requests issued in quick succession. Entries are
//! stamped with the server time at which they were received and expire after
//! [`RESPONSE_TTL_SECS`] of server time. Expiry is checked on read; nothing
//! sweeps the map in the background.
//!
//! The cache is an optimization only. Anything doubtful (an expired entry, a
//! fingerprint that maps to a different request, a timestamp from the future)
//! is reported as a miss.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;
use tracing::{debug, trace};

/// Lifetime of a cached response, in seconds of server time.
pub const RESPONSE_TTL_SECS: i64 = 15;

#[derive(Clone)]
struct CacheEntry {
    /// Full request key, kept to detect fingerprint collisions.
    request: String,
    body: Vec<u8>,
    cached_at: i64,
}

impl CacheEntry {
    fn is_fresh(&self, now: i64, ttl: i64) -> bool {
        let age = now - self.cached_at;
        (0..ttl).contains(&age)
    }
}

/// Fingerprint → response map with a fixed TTL.
///
/// # Example
///
/// ```
/// use modsync::catalog::ResponseCache;
///
/// let cache = ResponseCache::new();
/// cache.put("GET /mods?_offset=0", b"{}".to_vec(), 1_000);
///
/// assert!(cache.get("GET /mods?_offset=0", 1_010).is_some());
/// assert!(cache.get("GET /mods?_offset=0", 1_020).is_none());
/// ```
pub struct ResponseCache {
    entries: Mutex<HashMap<u64, CacheEntry>>,
    ttl: i64,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache {
    /// Create a cache with the standard TTL.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: RESPONSE_TTL_SECS,
        }
    }

    /// Set the TTL in seconds.
    pub fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl = ttl_secs;
        self
    }

    /// Get the current TTL in seconds.
    pub fn ttl(&self) -> i64 {
        self.ttl
    }

    /// Fingerprint of a request key.
    pub fn fingerprint(request: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        request.hash(&mut hasher);
        hasher.finish()
    }

    /// Look up a response for `request` at server time `now`.
    pub fn get(&self, request: &str, now: i64) -> Option<Vec<u8>> {
        let fingerprint = Self::fingerprint(request);
        let mut entries = self.entries.lock();

        let entry = entries.get(&fingerprint)?;
        if entry.request != request {
            debug!(request, "Response cache fingerprint collision, treating as miss");
            return None;
        }
        if !entry.is_fresh(now, self.ttl) {
            trace!(request, "Response cache entry expired");
            entries.remove(&fingerprint);
            return None;
        }

        trace!(request, "Response cache hit");
        Some(entry.body.clone())
    }

    /// Store a response received at server time `server_time`.
    pub fn put(&self, request: &str, body: Vec<u8>, server_time: i64) {
        let entry = CacheEntry {
            request: request.to_string(),
            body,
            cached_at: server_time,
        };
        self.entries.lock().insert(Self::fingerprint(request), entry);
    }

    /// Drop the entry for one request.
    pub fn invalidate(&self, request: &str) {
        self.entries.lock().remove(&Self::fingerprint(request));
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Remove entries that are no longer fresh at `now`; returns how many.
    pub fn purge_expired(&self, now: i64) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now, self.ttl));
        before - entries.len()
    }

    /// Entry counts at server time `now`.
    pub fn stats(&self, now: i64) -> CacheStats {
        let entries = self.entries.lock();
        let valid_entries = entries
            .values()
            .filter(|entry| entry.is_fresh(now, self.ttl))
            .count();

        CacheStats {
            entries: entries.len(),
            valid_entries,
            expired_entries: entries.len() - valid_entries,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cached entries.
    pub entries: usize,
    /// Number of fresh entries.
    pub valid_entries: usize,
    /// Number of expired entries not yet evicted.
    pub expired_entries: usize,
}
