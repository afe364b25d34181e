// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! In-memory certificate caches.
//!
//! Three independent caches back the bridge: synthesized domain
//! certificates (short-lived, timer-pruned), cross-signed results keyed
//! by request fingerprint, and submitted originals keyed by the serial
//! of their cross-signed counterpart. The latter two never expire and
//! only their first entry is ever read.
//!
//! Entries are never mutated in place; writers append and the pruner
//! pops. Readers rely solely on each entry's expiration, so the deferred
//! pop is best-effort cleanup rather than a correctness requirement.
//! These caches don't support stream isolation yet.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Default lifetime of a cached domain certificate.
pub const DOMAIN_CACHE_TTL: Duration = Duration::from_secs(120);
/// A key is fresh while some entry still has more than this left.
pub const DOMAIN_FRESH_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedCert {
    expiration: Instant,
    pem: String,
}

/// Cache of synthesized certificates keyed by common name.
#[derive(Debug, Clone)]
pub struct DomainCache {
    inner: Arc<RwLock<HashMap<String, Vec<CachedCert>>>>,
    ttl: Duration,
    fresh_window: Duration,
}

impl Default for DomainCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainCache {
    pub fn new() -> Self {
        Self::with_policy(DOMAIN_CACHE_TTL, DOMAIN_FRESH_WINDOW)
    }

    pub fn with_policy(ttl: Duration, fresh_window: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            fresh_window,
        }
    }

    /// Return every cached certificate for `key` joined by blank lines,
    /// plus whether the issuance pipeline must run anyway. The key is
    /// fresh while at least one entry has more than the freshness window
    /// remaining.
    pub fn get(&self, key: &str) -> (String, bool) {
        let mut need_refresh = true;
        let mut results = Vec::new();

        let map = self.inner.read().expect("domain cache lock poisoned");
        if let Some(entries) = map.get(key) {
            let now = Instant::now();
            for entry in entries {
                if entry.expiration.saturating_duration_since(now) > self.fresh_window {
                    need_refresh = false;
                }
                results.push(entry.pem.as_str());
            }
        }

        (results.join("\n\n"), need_refresh)
    }

    /// Append an entry for `key` and schedule the matching head-pop once
    /// the entry's lifetime has passed.
    pub fn put_deferred(&self, key: String, pem: String) {
        self.insert(&key, pem);

        let cache = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(cache.ttl).await;
            cache.pop_head(&key);
        });
    }

    fn insert(&self, key: &str, pem: String) {
        let entry = CachedCert {
            expiration: Instant::now() + self.ttl,
            pem,
        };

        let mut map = self.inner.write().expect("domain cache lock poisoned");
        map.entry(key.to_string()).or_default().push(entry);
    }

    /// Remove the oldest entry for `key`, dropping the key entirely when
    /// it was the last one.
    fn pop_head(&self, key: &str) {
        let mut map = self.inner.write().expect("domain cache lock poisoned");
        if let Some(entries) = map.get_mut(key) {
            if entries.len() > 1 {
                entries.remove(0);
            } else {
                map.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn entry_count(&self, key: &str) -> usize {
        let map = self.inner.read().unwrap();
        map.get(key).map(|e| e.len()).unwrap_or(0)
    }
}

/// Cache whose entries never expire and whose first entry is the only
/// one ever read. Used for cross-signed results and their originals.
#[derive(Debug, Clone, Default)]
pub struct PinnedCache {
    inner: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl PinnedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// First entry for `key`, verbatim.
    pub fn get(&self, key: &str) -> Option<String> {
        let map = self.inner.read().expect("pinned cache lock poisoned");
        map.get(key).and_then(|entries| entries.first().cloned())
    }

    pub fn put(&self, key: &str, pem: String) {
        let mut map = self.inner.write().expect("pinned cache lock poisoned");
        map.entry(key.to_string()).or_default().push(pem);
    }
}
