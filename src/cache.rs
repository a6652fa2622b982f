//! # Cache Module
//!
//! In-memory cache for finished reports and views, keyed by the full query.
//!
//! Two invalidation policies:
//! - [`InvalidationPolicy::TtlOnly`]: valid until the absolute expiry
//! - [`InvalidationPolicy::Fingerprint`]: additionally requires the source
//!   fingerprint recomputed at read time to equal the one taken at write time
//!
//! Any miss caused by expiry or a fingerprint mismatch evicts the entry.
//! Values are stored behind `Arc`, so a reader holds either the old or the new
//! value of a key, never a mix.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::fingerprint::{fingerprint, fingerprint_async};

/// Default time-to-live, five minutes.
pub const DEFAULT_TTL_SECONDS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationPolicy {
    TtlOnly,
    /// TTL plus a fingerprint over the record files under `root`
    Fingerprint { root: PathBuf },
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: Arc<V>,
    expires_at: DateTime<Utc>,
    fingerprint: Option<String>,
}

#[derive(Debug)]
pub struct UsageCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    policy: InvalidationPolicy,
}

impl<V> UsageCache<V> {
    pub fn new(policy: InvalidationPolicy) -> Self {
        UsageCache {
            entries: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Fingerprint under the current policy; `None` for TTL-only.
    pub fn current_fingerprint(&self) -> Option<String> {
        match &self.policy {
            InvalidationPolicy::TtlOnly => None,
            InvalidationPolicy::Fingerprint { root } => Some(fingerprint(root)),
        }
    }

    /// Same as [`Self::current_fingerprint`], with the directory walk on the
    /// blocking pool.
    pub async fn current_fingerprint_async(&self) -> Option<String> {
        match &self.policy {
            InvalidationPolicy::TtlOnly => None,
            InvalidationPolicy::Fingerprint { root } => {
                Some(fingerprint_async(root.clone()).await)
            }
        }
    }

    /// Store `value` for `ttl`. Last write per key wins.
    pub fn set(&self, key: &str, value: V, ttl: Duration) -> Arc<V> {
        let fp = self.current_fingerprint();
        let value = Arc::new(value);
        self.insert(key, Arc::clone(&value), Utc::now() + ttl, fp);
        value
    }

    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let fp = self.current_fingerprint();
        self.lookup(key, Utc::now(), fp.as_deref())
    }

    /// Insert with an explicit expiry and write-time fingerprint.
    pub fn insert(
        &self,
        key: &str,
        value: Arc<V>,
        expires_at: DateTime<Utc>,
        fingerprint: Option<String>,
    ) {
        if let Ok(mut cache) = self.entries.lock() {
            cache.insert(
                key.to_string(),
                CacheEntry {
                    value,
                    expires_at,
                    fingerprint,
                },
            );
        }
    }

    /// Look up `key` as of `now`, comparing against the read-time fingerprint
    /// when the policy uses one.
    pub fn lookup(&self, key: &str, now: DateTime<Utc>, fingerprint: Option<&str>) -> Option<Arc<V>> {
        let mut cache = self.entries.lock().ok()?;
        let entry = cache.get(key)?;

        if now >= entry.expires_at {
            debug!(key = key, "Cache entry expired, evicting");
            cache.remove(key);
            return None;
        }
        if matches!(self.policy, InvalidationPolicy::Fingerprint { .. })
            && entry.fingerprint.as_deref() != fingerprint
        {
            debug!(key = key, "Source files changed, evicting cache entry");
            cache.remove(key);
            return None;
        }
        debug!(key = key, "Cache hit");
        Some(Arc::clone(&entry.value))
    }

    /// Drop every entry.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.entries.lock() {
            cache.clear();
        }
    }

    /// Drop expired entries, returning how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        if let Ok(mut cache) = self.entries.lock() {
            let before = cache.len();
            cache.retain(|_, e| e.expires_at > now);
            before - cache.len()
        } else {
            0
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_before_expiry_miss_at_expiry() {
        let cache: UsageCache<u32> = UsageCache::new(InvalidationPolicy::TtlOnly);
        let t0 = Utc::now();
        let expiry = t0 + Duration::seconds(10);
        cache.insert("k", Arc::new(7), expiry, None);

        assert_eq!(cache.lookup("k", t0, None).as_deref(), Some(&7));
        assert_eq!(
            cache.lookup("k", expiry - Duration::milliseconds(1), None).as_deref(),
            Some(&7)
        );
        assert!(cache.lookup("k", expiry, None).is_none());
        // evicted
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_last_write_wins() {
        let cache: UsageCache<String> = UsageCache::new(InvalidationPolicy::TtlOnly);
        cache.set("k", "first".to_string(), Duration::seconds(60));
        let held = cache.get("k").unwrap();
        cache.set("k", "second".to_string(), Duration::seconds(60));
        assert_eq!(held.as_str(), "first");
        assert_eq!(cache.get("k").unwrap().as_str(), "second");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_missing_key() {
        let cache: UsageCache<u8> = UsageCache::new(InvalidationPolicy::TtlOnly);
        assert!(cache.get("nope").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_fingerprint_mismatch_is_miss() {
        let cache: UsageCache<u8> = UsageCache::new(InvalidationPolicy::Fingerprint {
            root: PathBuf::from("/nonexistent"),
        });
        let now = Utc::now();
        cache.insert("k", Arc::new(1), now + Duration::seconds(60), Some("aaa".into()));
        assert!(cache.lookup("k", now, Some("aaa")).is_some());
        assert!(cache.lookup("k", now, Some("bbb")).is_none());
        assert!(cache.lookup("k", now, Some("aaa")).is_none());
    }

    #[test]
    fn test_ttl_policy_ignores_fingerprint() {
        let cache: UsageCache<u8> = UsageCache::new(InvalidationPolicy::TtlOnly);
        let now = Utc::now();
        cache.insert("k", Arc::new(1), now + Duration::seconds(60), Some("aaa".into()));
        assert!(cache.lookup("k", now, Some("bbb")).is_some());
    }

    #[test]
    fn test_cleanup_and_clear() {
        let cache: UsageCache<u8> = UsageCache::new(InvalidationPolicy::TtlOnly);
        let now = Utc::now();
        cache.insert("old", Arc::new(1), now - Duration::seconds(1), None);
        cache.insert("new", Arc::new(2), now + Duration::seconds(60), None);
        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
