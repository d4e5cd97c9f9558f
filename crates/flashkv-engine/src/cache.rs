//! Write-back cache index
//!
//! A single mutex guards the whole index; every method here is one bounded
//! critical section with no suspension points. Values are immutable once
//! published: a `set` installs a fresh entry (with a fresh version) rather
//! than mutating the old one, and the version token is what flush and
//! eviction use to detect that an entry was replaced behind their backs.

use flashkv_common::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Individual cache entry with LRU tracking and dirty flag
struct CacheEntry {
    value: Arc<Value>,
    /// Logical-clock reading of the last access
    last_access: u64,
    access_count: u64,
    /// True if modified in cache since the last successful disk write
    dirty: bool,
    /// Identity token, unique per installed entry
    version: u64,
}

/// A dirty entry captured under the lock for an out-of-lock disk write
pub struct DirtySnapshot {
    pub key: String,
    pub value: Arc<Value>,
    pub version: u64,
}

/// An eviction candidate captured under the lock
pub struct Victim {
    pub key: String,
    pub value: Arc<Value>,
    pub dirty: bool,
    pub version: u64,
}

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: AtomicU64,
    /// Number of cache misses
    pub misses: AtomicU64,
    /// Number of entries evicted
    pub evictions: AtomicU64,
    /// Number of dirty entries written back to disk
    pub writebacks: AtomicU64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

/// Key-to-entry mapping under a single lock
pub struct CacheIndex {
    entries: Mutex<HashMap<String, CacheEntry>>,
    /// Logical clock for LRU ordering
    clock: AtomicU64,
    /// Source of entry identity tokens
    next_version: AtomicU64,
    stats: CacheStats,
}

impl CacheIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(0),
            next_version: AtomicU64::new(0),
            stats: CacheStats::default(),
        }
    }

    /// Advance the logical clock and return the new value
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn next_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Current number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Current number of dirty entries
    pub fn dirty_len(&self) -> usize {
        self.entries.lock().values().filter(|e| e.dirty).count()
    }

    /// Install a fresh dirty entry, replacing any existing one.
    ///
    /// Returns the index size after the insert so the caller can decide
    /// whether eviction is due.
    pub fn insert_dirty(&self, key: &str, value: Arc<Value>) -> usize {
        let clock = self.tick();
        let version = self.next_version();
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                last_access: clock,
                access_count: 1,
                dirty: true,
                version,
            },
        );
        entries.len()
    }

    /// Look up a key, updating access stats on a hit
    pub fn get(&self, key: &str) -> Option<Arc<Value>> {
        let clock = self.tick();
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.access_count += 1;
            entry.last_access = clock;
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            Some(Arc::clone(&entry.value))
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Warm the cache with a value loaded from disk.
    ///
    /// Vacant-only: if an entry was installed while the load was in flight,
    /// that (newer) entry wins and its value is returned instead.
    pub fn warm(&self, key: &str, value: Value) -> Arc<Value> {
        let clock = self.tick();
        let version = self.next_version();
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry {
                value: Arc::new(value),
                last_access: clock,
                access_count: 1,
                dirty: false,
                version,
            });
        Arc::clone(&entry.value)
    }

    /// Remove an entry unconditionally. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Remove an entry only if its identity is unchanged since a snapshot.
    ///
    /// Counts as an eviction when it succeeds.
    pub fn remove_if_version(&self, key: &str, version: u64) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.version == version => {
                entries.remove(key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Whether a key is resident
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// All resident keys
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Snapshot every dirty entry for an out-of-lock write pass
    pub fn dirty_snapshot(&self) -> Vec<DirtySnapshot> {
        let entries = self.entries.lock();
        entries
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(key, entry)| DirtySnapshot {
                key: key.clone(),
                value: Arc::clone(&entry.value),
                version: entry.version,
            })
            .collect()
    }

    /// Clear the dirty flag for a key, but only if the entry is still the
    /// one that was snapshotted. A replaced entry keeps its flag so the
    /// newer value is flushed on a later pass.
    pub fn mark_clean_if_version(&self, key: &str, version: u64) -> bool {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            if entry.version == version && entry.dirty {
                entry.dirty = false;
                self.stats.writebacks.fetch_add(1, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    /// The `count` lowest-ranked entries by `(access_count, last_access)`
    /// ascending: cold one-hit entries rank below long-lived popular ones.
    pub fn lru_victims(&self, count: usize) -> Vec<Victim> {
        let entries = self.entries.lock();
        let mut ranked: Vec<(u64, u64, Victim)> = entries
            .iter()
            .map(|(key, entry)| {
                (
                    entry.access_count,
                    entry.last_access,
                    Victim {
                        key: key.clone(),
                        value: Arc::clone(&entry.value),
                        dirty: entry.dirty,
                        version: entry.version,
                    },
                )
            })
            .collect();
        ranked.sort_by_key(|(access_count, last_access, _)| (*access_count, *last_access));
        ranked
            .into_iter()
            .take(count)
            .map(|(_, _, victim)| victim)
            .collect()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self::new()
    }
}
