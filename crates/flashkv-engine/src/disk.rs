//! Hash-sharded on-disk file store
//!
//! One file per key, fanned out into 256 subdirectories by the first byte of
//! a 128-bit key hash. All methods here are synchronous and blocking; the
//! engine routes them through the I/O worker pool.

use flashkv_common::{Result, Value};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_128;

/// A single persisted record. The key is stored inside the record so that
/// full scans can recover it and so that a hash collision is detectable on
/// load.
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    value: Value,
    timestamp: f64,
}

/// File store rooted at a data directory
pub struct DiskStore {
    root: PathBuf,
    extension: String,
    /// Sequence for unique temp-file names within this process
    tmp_seq: AtomicU64,
}

impl DiskStore {
    /// Open a store at `root`, creating the directory if absent
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            extension: extension.into(),
            tmp_seq: AtomicU64::new(0),
        })
    }

    /// The data directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Recreate the data directory if it went missing (e.g. after `clear_all`
    /// raced with an external cleanup)
    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Shard path for a key: `<root>/<hh>/<full-hex><extension>`
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        let hash = format!("{:032x}", xxh3_128(key.as_bytes()));
        let mut path = self.root.join(&hash[..2]);
        path.push(format!("{hash}{}", self.extension));
        path
    }

    /// Persist a record, replacing any prior one at the key's shard path.
    ///
    /// The record is written to a uniquely named sibling temp file and
    /// renamed into place, so concurrent readers never observe a truncated
    /// record and concurrent writes to the same key serialize at the rename.
    pub fn save(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.path_for(key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let record = DiskRecord {
            key: key.to_string(),
            value: value.clone(),
            timestamp: unix_now(),
        };
        let bytes = serde_json::to_vec(&record)?;

        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = path
            .file_name()
            .map_or_else(|| "record".into(), |n| n.to_os_string());
        tmp_name.push(format!(".{}.{}.tmp", std::process::id(), seq));
        let tmp_path = path.with_file_name(tmp_name);

        fs::write(&tmp_path, &bytes)?;
        if let Err(err) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        Ok(())
    }

    /// Load the value for a key, or `None` if no record exists.
    ///
    /// A record whose stored key differs from the requested key (hash
    /// collision) reads as `None`.
    pub fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record: DiskRecord = serde_json::from_slice(&bytes)?;
        if record.key != key {
            debug!(
                requested = key,
                stored = record.key,
                "hash collision on load, treating as absent"
            );
            return Ok(None);
        }
        Ok(Some(record.value))
    }

    /// Unlink a key's record. A missing file is not an error.
    pub fn remove(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(true),
            Err(err) => Err(err.into()),
        }
    }

    /// Whether a record file exists at the key's shard path
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).exists()
    }

    /// Recover every stored key by walking the shard directories.
    ///
    /// Files that fail to deserialize are skipped.
    pub fn scan_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let shards = match fs::read_dir(&self.root) {
            Ok(shards) => shards,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(err) => return Err(err.into()),
        };
        for shard in shards.flatten() {
            let shard_path = shard.path();
            if !shard_path.is_dir() {
                continue;
            }
            let Ok(entries) = fs::read_dir(&shard_path) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let is_record = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(&self.extension));
                if !is_record {
                    continue;
                }
                match Self::read_record(&path) {
                    Ok(record) => keys.push(record.key),
                    Err(err) => {
                        debug!(path = %path.display(), error = %err, "skipping unreadable record");
                    }
                }
            }
        }
        Ok(keys)
    }

    /// Remove the data directory recursively and recreate an empty root
    pub fn clear_all(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    fn read_record(path: &Path) -> Result<DiskRecord> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
