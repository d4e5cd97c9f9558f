//! Engine facade and lifecycle
//!
//! Writes land in the cache marked dirty and are persisted lazily: by the
//! background flush scheduler, by eviction when the cache runs over its
//! ceiling, and by the final flush in `stop`. Reads consult the cache and
//! fall back to a disk load that then warms the cache.

use crate::cache::{CacheIndex, CacheStats};
use crate::disk::DiskStore;
use crate::pool::IoPool;
use flashkv_common::{EngineConfig, Error, Result, Value, validate_key};
use futures::future;
use glob::Pattern;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// Lifecycle states: Fresh -> Running -> Stopping -> Stopped
const FRESH: u8 = 0;
const RUNNING: u8 = 1;
const STOPPING: u8 = 2;
const STOPPED: u8 = 3;

/// The FlashKV storage engine
pub struct Engine {
    config: EngineConfig,
    cache: CacheIndex,
    disk: Arc<DiskStore>,
    pool: IoPool,
    state: AtomicU8,
    shutdown_tx: watch::Sender<bool>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Create an engine over `config.data_dir`, creating the directory if
    /// absent. The flush scheduler does not run until [`Engine::start`].
    pub fn new(config: EngineConfig) -> Result<Self> {
        let disk = DiskStore::new(&config.data_dir, &config.file_extension)?;
        let (shutdown_tx, _) = watch::channel(false);
        info!(data_dir = %config.data_dir.display(), "engine initialized");
        Ok(Self {
            cache: CacheIndex::new(),
            disk: Arc::new(disk),
            pool: IoPool::new(config.max_workers),
            state: AtomicU8::new(FRESH),
            shutdown_tx,
            flush_task: Mutex::new(None),
            config,
        })
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of resident cache entries
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Number of dirty cache entries awaiting flush
    #[must_use]
    pub fn dirty_len(&self) -> usize {
        self.cache.dirty_len()
    }

    /// Cache hit/miss/eviction/writeback counters
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.load(Ordering::SeqCst) >= STOPPING {
            return Err(Error::EngineClosed);
        }
        Ok(())
    }

    /// Spawn the background flush scheduler. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.state.load(Ordering::SeqCst) >= STOPPING {
            warn!("start ignored: engine is closed");
            return;
        }
        let mut slot = self.flush_task.lock();
        if slot.is_some() {
            return;
        }
        if let Err(err) = self.disk.ensure_root() {
            warn!(error = %err, "could not create data directory");
        }
        self.state.store(RUNNING, Ordering::SeqCst);

        let interval = self.config.flush_interval();
        let mut shutdown = self.shutdown_tx.subscribe();
        let engine = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => break,
                }
                let Some(engine) = engine.upgrade() else { break };
                let flushed = engine.flush_inner().await;
                if flushed > 0 {
                    debug!(entries = flushed, "periodic flush");
                }
            }
            debug!("flush scheduler exited");
        }));
        info!(
            flush_interval_secs = self.config.flush_interval_secs,
            "engine started"
        );
    }

    /// Stop the engine: cancel the scheduler, flush everything dirty, close
    /// the worker pool. Subsequent operations fail with `EngineClosed`.
    /// Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let transitioned = self.state.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |state| {
            (state == FRESH || state == RUNNING).then_some(STOPPING)
        });
        if transitioned.is_err() {
            return Ok(());
        }

        let _ = self.shutdown_tx.send(true);
        let task = self.flush_task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "flush scheduler ended abnormally");
            }
        }

        let flushed = self.flush_inner().await;
        self.pool.close();
        self.state.store(STOPPED, Ordering::SeqCst);
        info!(flushed, "engine stopped");
        Ok(())
    }

    /// Store a value under a key.
    ///
    /// The write lands in the cache marked dirty; disk persistence happens on
    /// the next flush pass (or during eviction). May trigger eviction before
    /// returning.
    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.ensure_open()?;
        validate_key(key)?;

        let len = self.cache.insert_dirty(key, Arc::new(value));
        if len > self.config.cache_size {
            self.evict().await;
        }
        Ok(())
    }

    /// Fetch the value for a key, from cache or disk.
    ///
    /// A disk-side failure on the fallback path reads as not-found (and is
    /// logged); the record surfaces again once the disk recovers.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_open()?;
        validate_key(key)?;

        if let Some(value) = self.cache.get(key) {
            return Ok(Some(value.as_ref().clone()));
        }

        let disk = Arc::clone(&self.disk);
        let owned = key.to_string();
        let loaded = match self.pool.run(move || disk.load(&owned)).await? {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "disk load failed, treating as not found");
                None
            }
        };

        match loaded {
            Some(value) => {
                // Vacant-only warm: an entry installed while the load was in
                // flight is newer and wins.
                let winner = self.cache.warm(key, value);
                Ok(Some(winner.as_ref().clone()))
            }
            None => Ok(None),
        }
    }

    /// Delete a key from cache and disk. A missing disk record still counts
    /// as success.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        validate_key(key)?;

        self.cache.remove(key);

        let disk = Arc::clone(&self.disk);
        let owned = key.to_string();
        let removed = self.pool.run(move || disk.remove(&owned)).await??;
        Ok(removed)
    }

    /// Whether a key is resident in cache or has a disk record
    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        validate_key(key)?;

        if self.cache.contains(key) {
            return Ok(true);
        }
        let disk = Arc::clone(&self.disk);
        let owned = key.to_string();
        self.pool.run(move || disk.exists(&owned)).await
    }

    /// All keys matching a shell-style glob, as the union of live cache keys
    /// and disk records. `*` returns everything. Ordering unspecified.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.ensure_open()?;

        let matcher = if pattern == "*" {
            None
        } else {
            Some(Pattern::new(pattern).map_err(|err| {
                Error::invalid_pattern(pattern, err.to_string())
            })?)
        };

        let mut keys: HashSet<String> = self.cache.keys().into_iter().collect();
        let disk = Arc::clone(&self.disk);
        keys.extend(self.pool.run(move || disk.scan_keys()).await??);

        let keys = match matcher {
            None => keys.into_iter().collect(),
            Some(pattern) => keys.into_iter().filter(|k| pattern.matches(k)).collect(),
        };
        Ok(keys)
    }

    /// Number of distinct live keys across cache and disk
    pub async fn dbsize(&self) -> Result<usize> {
        Ok(self.keys("*").await?.len())
    }

    /// Drop every key from cache and disk
    pub async fn flushdb(&self) -> Result<()> {
        self.ensure_open()?;

        self.cache.clear();
        let disk = Arc::clone(&self.disk);
        self.pool.run(move || disk.clear_all()).await??;
        info!("database flushed");
        Ok(())
    }

    /// Write every dirty cache entry to disk and clear its flag.
    ///
    /// Returns the number of entries whose flag was cleared. Per-key write
    /// failures are logged and retried on the next pass; an entry replaced
    /// while its write was in flight stays dirty so the newer value is
    /// flushed later.
    pub async fn flush(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.flush_inner().await)
    }

    async fn flush_inner(&self) -> usize {
        let dirty = self.cache.dirty_snapshot();
        if dirty.is_empty() {
            return 0;
        }

        let writes = dirty.iter().map(|snap| {
            let disk = Arc::clone(&self.disk);
            let key = snap.key.clone();
            let value = Arc::clone(&snap.value);
            self.pool.run(move || disk.save(&key, value.as_ref()))
        });
        let results = future::join_all(writes).await;

        let mut cleared = 0;
        for (snap, result) in dirty.iter().zip(results) {
            match result {
                Ok(Ok(())) => {
                    if self.cache.mark_clean_if_version(&snap.key, snap.version) {
                        cleared += 1;
                    }
                }
                Ok(Err(err)) => warn!(key = %snap.key, error = %err, "flush write failed"),
                Err(err) => warn!(key = %snap.key, error = %err, "flush worker failed"),
            }
        }
        cleared
    }

    /// Evict the lowest-ranked ~10% of entries (at least one). Dirty
    /// victims are persisted first; a victim whose write fails, or that was
    /// replaced since it was ranked, stays in the cache.
    async fn evict(&self) {
        let len = self.cache.len();
        if len <= self.config.cache_size {
            return;
        }
        let count = len.div_ceil(10).max(1);

        for victim in self.cache.lru_victims(count) {
            if victim.dirty {
                let disk = Arc::clone(&self.disk);
                let key = victim.key.clone();
                let value = Arc::clone(&victim.value);
                match self.pool.run(move || disk.save(&key, value.as_ref())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(key = %victim.key, error = %err, "eviction write failed, keeping entry");
                        continue;
                    }
                    Err(err) => {
                        warn!(key = %victim.key, error = %err, "eviction worker failed, keeping entry");
                        continue;
                    }
                }
            }
            self.cache.remove_if_version(&victim.key, victim.version);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config(dir: &Path) -> EngineConfig {
        EngineConfig {
            data_dir: dir.to_path_buf(),
            cache_size: 100,
            flush_interval_secs: 60.0,
            max_workers: 4,
            file_extension: ".fkv".to_string(),
        }
    }

    fn engine(dir: &Path) -> Engine {
        Engine::new(config(dir)).unwrap()
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());

        engine.set("k", json!("v")).await.unwrap();
        assert_eq!(engine.get("k").await.unwrap(), Some(json!("v")));
    }

    #[tokio::test]
    async fn test_structured_value_round_trip() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());

        engine.set("x", json!({"n": 1})).await.unwrap();
        assert_eq!(engine.get("x").await.unwrap(), Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_overwrite_returns_latest() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());

        engine.set("k", json!("v1")).await.unwrap();
        engine.set("k", json!("v2")).await.unwrap();
        assert_eq!(engine.get("k").await.unwrap(), Some(json!("v2")));
    }

    #[tokio::test]
    async fn test_delete_erases_cache_and_disk() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());

        engine.set("k", json!("v")).await.unwrap();
        engine.flush().await.unwrap();

        assert!(engine.delete("k").await.unwrap());
        assert_eq!(engine.get("k").await.unwrap(), None);
        assert!(!engine.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        assert_eq!(engine.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_keys_leave_no_trace() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());

        let long = "k".repeat(257);
        assert!(matches!(
            engine.set("", json!(1)).await,
            Err(Error::InvalidKey { .. })
        ));
        assert!(matches!(
            engine.set(&long, json!(1)).await,
            Err(Error::InvalidKey { .. })
        ));
        assert!(matches!(
            engine.get("").await,
            Err(Error::InvalidKey { .. })
        ));

        engine.flush().await.unwrap();
        assert_eq!(engine.dbsize().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_eviction_bounds_cache_without_losing_keys() {
        let dir = tempdir().unwrap();
        let engine = Engine::new(EngineConfig {
            cache_size: 3,
            ..config(dir.path())
        })
        .unwrap();

        engine.set("a", json!(1)).await.unwrap();
        engine.set("b", json!(2)).await.unwrap();
        engine.set("c", json!(3)).await.unwrap();
        engine.set("d", json!(4)).await.unwrap();

        assert!(engine.cache_len() <= 3);

        engine.flush().await.unwrap();
        for (key, expected) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            assert_eq!(engine.get(key).await.unwrap(), Some(json!(expected)));
        }
        assert_eq!(engine.dbsize().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_eviction_spares_hot_keys() {
        let dir = tempdir().unwrap();
        let engine = Engine::new(EngineConfig {
            cache_size: 4,
            ..config(dir.path())
        })
        .unwrap();

        for key in ["k1", "k2", "k3", "k4"] {
            engine.set(key, json!(0)).await.unwrap();
        }
        for _ in 0..3 {
            engine.get("k1").await.unwrap();
            engine.get("k2").await.unwrap();
        }
        engine.set("k5", json!(0)).await.unwrap();

        assert!(engine.cache.contains("k1"));
        assert!(engine.cache.contains("k2"));
        assert!(!engine.cache.contains("k3"));
    }

    #[tokio::test]
    async fn test_durability_after_flush_and_reopen() {
        let dir = tempdir().unwrap();
        {
            let engine = engine(dir.path());
            engine.set("k", json!("v")).await.unwrap();
            assert_eq!(engine.flush().await.unwrap(), 1);
        }
        let reopened = engine(dir.path());
        assert_eq!(reopened.get("k").await.unwrap(), Some(json!("v")));
    }

    #[tokio::test]
    async fn test_stop_flushes_all_dirty_entries() {
        let dir = tempdir().unwrap();
        {
            let engine = engine(dir.path());
            for i in 0..5 {
                engine.set(&format!("k{i}"), json!(i)).await.unwrap();
            }
            engine.stop().await.unwrap();
        }
        let reopened = engine(dir.path());
        for i in 0..5 {
            assert_eq!(
                reopened.get(&format!("k{i}")).await.unwrap(),
                Some(json!(i))
            );
        }
    }

    #[tokio::test]
    async fn test_stopped_engine_rejects_operations() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.stop().await.unwrap();

        assert!(matches!(
            engine.set("k", json!(1)).await,
            Err(Error::EngineClosed)
        ));
        assert!(matches!(engine.get("k").await, Err(Error::EngineClosed)));
        assert!(matches!(engine.exists("k").await, Err(Error::EngineClosed)));
        assert!(matches!(engine.flush().await, Err(Error::EngineClosed)));

        // stop is idempotent
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_returns_cleared_count() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());

        engine.set("a", json!(1)).await.unwrap();
        engine.set("b", json!(2)).await.unwrap();
        engine.set("c", json!(3)).await.unwrap();

        assert_eq!(engine.flush().await.unwrap(), 3);
        assert_eq!(engine.flush().await.unwrap(), 0);
        assert_eq!(engine.dirty_len(), 0);
    }

    #[tokio::test]
    async fn test_flushdb_clears_everything() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());

        engine.set("a", json!(1)).await.unwrap();
        engine.flush().await.unwrap();
        engine.set("b", json!(2)).await.unwrap();

        engine.flushdb().await.unwrap();

        assert_eq!(engine.get("a").await.unwrap(), None);
        assert_eq!(engine.get("b").await.unwrap(), None);
        assert_eq!(engine.dbsize().await.unwrap(), 0);
        assert_eq!(engine.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_keys_glob_filtering() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());

        engine.set("user:1", json!("a")).await.unwrap();
        engine.set("user:2", json!("b")).await.unwrap();
        engine.set("admin", json!("c")).await.unwrap();

        let mut users = engine.keys("user:*").await.unwrap();
        users.sort();
        assert_eq!(users, vec!["user:1", "user:2"]);

        let all = engine.keys("*").await.unwrap();
        assert_eq!(all.len(), 3);

        assert!(matches!(
            engine.keys("[").await,
            Err(Error::InvalidPattern { .. })
        ));
    }

    #[tokio::test]
    async fn test_keys_unions_cache_and_disk() {
        let dir = tempdir().unwrap();
        {
            let engine = engine(dir.path());
            engine.set("on-disk", json!(1)).await.unwrap();
            engine.stop().await.unwrap();
        }

        let engine = engine(dir.path());
        engine.set("in-cache", json!(2)).await.unwrap();

        let mut keys = engine.keys("*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["in-cache", "on-disk"]);
        assert_eq!(engine.dbsize().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_exists_checks_cache_then_disk() {
        let dir = tempdir().unwrap();
        {
            let engine = engine(dir.path());
            engine.set("unflushed", json!(1)).await.unwrap();
            assert!(engine.exists("unflushed").await.unwrap());
            assert!(!engine.exists("absent").await.unwrap());
            engine.flush().await.unwrap();
        }
        let reopened = engine(dir.path());
        assert!(reopened.exists("unflushed").await.unwrap());
    }

    #[tokio::test]
    async fn test_periodic_flush_persists_without_stop() {
        let dir = tempdir().unwrap();
        {
            let engine = Arc::new(
                Engine::new(EngineConfig {
                    flush_interval_secs: 0.05,
                    ..config(dir.path())
                })
                .unwrap(),
            );
            engine.start();
            engine.start(); // idempotent

            engine.set("k", json!("v")).await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            assert_eq!(engine.dirty_len(), 0);
            // engine dropped without stop: the scheduler exits on its own
        }
        let reopened = engine(dir.path());
        assert_eq!(reopened.get("k").await.unwrap(), Some(json!("v")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_eviction_write_keeps_entry() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let engine = Engine::new(EngineConfig {
            cache_size: 1,
            ..config(dir.path())
        })
        .unwrap();

        engine.set("a", json!(1)).await.unwrap();

        // Make the data directory unwritable so the eviction write fails
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o555)).unwrap();
        engine.set("b", json!(2)).await.unwrap();
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(engine.cache_len(), 2, "unpersisted victim must stay cached");
        assert_eq!(engine.get("a").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sets_and_gets() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(
            Engine::new(EngineConfig {
                cache_size: 200,
                ..config(dir.path())
            })
            .unwrap(),
        );

        let tasks: Vec<_> = (0..10)
            .map(|worker| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    for i in 0..100 {
                        let key = format!("w{worker}:k{i}");
                        engine.set(&key, json!(i)).await.unwrap();
                        let got = engine.get(&key).await.unwrap();
                        assert_eq!(got, Some(json!(i)));
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        engine.flush().await.unwrap();
        for worker in 0..10 {
            for i in 0..100 {
                let key = format!("w{worker}:k{i}");
                assert_eq!(engine.get(&key).await.unwrap(), Some(json!(i)));
            }
        }
    }
}
