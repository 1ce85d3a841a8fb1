//! Durable per-key state storage.
//!
//! Every process kind persists its per-key state through a [`StateStore`].
//! [`JsonFileStore`] keeps one versioned JSON file per kind and rewrites it
//! atomically (temp file + rename) after changes; [`MemoryStore`] is used
//! by tests and short-lived harness runs.

use crate::error::{Result, SyncError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

const STORE_VERSION: u8 = 1;

/// Storage for the state of one process kind, keyed by `K`.
pub trait StateStore<K, S>: Send + Sync {
    /// Every persisted key with its state.
    fn load_all(&self) -> Result<Vec<(K, S)>>;

    /// State for a single key, if persisted.
    fn load(&self, key: &K) -> Result<Option<S>>;

    /// Insert or replace the state for `key`.
    fn save(&self, key: &K, state: &S) -> Result<()>;

    /// Delete the state for `key`. Missing keys are not an error.
    fn remove(&self, key: &K) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Volatile store.
pub struct MemoryStore<K, S> {
    entries: Mutex<BTreeMap<K, S>>,
}

impl<K: Ord, S> MemoryStore<K, S> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<K: Ord, S> Default for MemoryStore<K, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, S> StateStore<K, S> for MemoryStore<K, S>
where
    K: Ord + Clone + Send,
    S: Clone + Send,
{
    fn load_all(&self) -> Result<Vec<(K, S)>> {
        Ok(lock(&self.entries)
            .iter()
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect())
    }

    fn load(&self, key: &K) -> Result<Option<S>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn save(&self, key: &K, state: &S) -> Result<()> {
        lock(&self.entries).insert(key.clone(), state.clone());
        Ok(())
    }

    fn remove(&self, key: &K) -> Result<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

#[derive(Serialize)]
struct StoreFileRef<'a, K: Ord, S> {
    version: u8,
    entries: &'a BTreeMap<K, S>,
}

#[derive(Deserialize)]
struct StoreFile<K: Ord, S> {
    #[serde(default = "default_store_version")]
    version: u8,
    entries: BTreeMap<K, S>,
}

fn default_store_version() -> u8 {
    STORE_VERSION
}

/// File-backed store holding one JSON document per process kind.
///
/// Each write serializes the whole document and replaces the file with
/// blocking `std::fs` calls on the caller's thread, so it suits the modest
/// key counts of a single deployment. Concurrent changes are coalesced: a
/// writer that finds its revision already on disk returns without writing.
pub struct JsonFileStore<K, S> {
    path: PathBuf,
    entries: Mutex<Entries<K, S>>,
    /// Highest revision known to be on disk.
    written: Mutex<u64>,
}

struct Entries<K, S> {
    map: BTreeMap<K, S>,
    revision: u64,
}

impl<K, S> JsonFileStore<K, S>
where
    K: Ord + Clone + Serialize + DeserializeOwned,
    S: Clone + Serialize + DeserializeOwned,
{
    /// Open (or lazily create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if an existing file cannot be read or
    /// parsed, or was written by a newer store version.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map = read_entries(&path)?;
        debug!("opened state store {} ({} entries)", path.display(), map.len());
        Ok(Self {
            path,
            entries: Mutex::new(Entries { map, revision: 0 }),
            written: Mutex::new(0),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make sure `revision` (or a later one) is on disk.
    ///
    /// A failed write leaves the change in memory; the next change retries it.
    fn persist(&self, revision: u64) -> Result<()> {
        let mut written = lock(&self.written);
        if *written >= revision {
            return Ok(());
        }
        let (json, latest) = {
            let entries = lock(&self.entries);
            let doc = StoreFileRef {
                version: STORE_VERSION,
                entries: &entries.map,
            };
            let json = serde_json::to_vec_pretty(&doc)
                .map_err(|e| SyncError::Store(format!("cannot serialize state: {e}")))?;
            (json, entries.revision)
        };
        self.write_file(&json)?;
        *written = latest;
        Ok(())
    }

    fn write_file(&self, json: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::Store(format!("cannot create state dir {}: {e}", parent.display()))
            })?;
        }
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, json).map_err(|e| {
            SyncError::Store(format!("cannot write {}: {e}", tmp_path.display()))
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            SyncError::Store(format!("cannot finalize {}: {e}", self.path.display()))
        })?;
        Ok(())
    }
}

fn read_entries<K, S>(path: &Path) -> Result<BTreeMap<K, S>>
where
    K: Ord + DeserializeOwned,
    S: DeserializeOwned,
{
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            return Err(SyncError::Store(format!(
                "cannot read {}: {e}",
                path.display()
            )));
        }
    };

    let file: StoreFile<K, S> = serde_json::from_slice(&bytes)
        .map_err(|e| SyncError::Store(format!("cannot parse {}: {e}", path.display())))?;
    if file.version > STORE_VERSION {
        return Err(SyncError::Store(format!(
            "{} has version {}, newest supported is {STORE_VERSION}",
            path.display(),
            file.version
        )));
    }
    Ok(file.entries)
}

impl<K, S> StateStore<K, S> for JsonFileStore<K, S>
where
    K: Ord + Clone + Send + Serialize + DeserializeOwned,
    S: Clone + Send + Serialize + DeserializeOwned,
{
    fn load_all(&self) -> Result<Vec<(K, S)>> {
        Ok(lock(&self.entries)
            .map
            .iter()
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect())
    }

    fn load(&self, key: &K) -> Result<Option<S>> {
        Ok(lock(&self.entries).map.get(key).cloned())
    }

    fn save(&self, key: &K, state: &S) -> Result<()> {
        let revision = {
            let mut entries = lock(&self.entries);
            entries.map.insert(key.clone(), state.clone());
            entries.revision += 1;
            entries.revision
        };
        self.persist(revision)
    }

    fn remove(&self, key: &K) -> Result<()> {
        let revision = {
            let mut entries = lock(&self.entries);
            if entries.map.remove(key).is_none() {
                return Ok(());
            }
            entries.revision += 1;
            entries.revision
        };
        self.persist(revision).inspect_err(|e| {
            warn!("state removal not persisted: {e}");
        })
    }
}
