//! Redb property backend implementation.
//!
//! Persists property records in a single-table redb database, fronted by a
//! small LRU cache of encoded records for read-heavy paths.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock as StdRwLock};

use lru::LruCache;
use redb::{Database, ReadableTable, TableDefinition};

use crate::backend::{make_key, split_key, PropertyBackend, PropertyRecord, StoredProp};
use crate::error::{Result, StoreError};

// One table holds everything; keys are "<interface><path>" as produced by
// make_key
const PROPERTIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("properties");

// Default cache capacity - number of entries
const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Configuration for RedbBackend.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RedbBackendConfig {
    /// Path to the database file.
    pub path: String,

    /// Create parent directories if they don't exist.
    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,

    /// LRU cache capacity (number of entries). 0 to disable caching.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_create_dirs() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl RedbBackendConfig {
    /// Create a new config with the given path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            create_dirs: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    /// Set whether to create parent directories.
    pub fn with_create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }

    /// Set the cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Create a config backed by a throwaway temporary file.
    pub fn memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            create_dirs: false,
            cache_capacity: 512,
        }
    }
}

/// redb-based persistent property backend with an LRU cache of encoded
/// records.
pub struct RedbBackend {
    db: Arc<Database>,
    /// Storage path (":memory:" for the temp-file variant).
    path: String,
    /// Actual file path for temporary databases (for cleanup).
    temp_path: Option<PathBuf>,
    /// Uses std::sync::RwLock for compatibility with sync trait methods.
    cache: Arc<StdRwLock<LruCache<String, Vec<u8>>>>,
}

impl RedbBackend {
    /// Create a new RedbBackend with the given configuration.
    pub fn new(config: RedbBackendConfig) -> Result<Self> {
        let path = &config.path;

        let (db, temp_path) = if path == ":memory:" {
            // redb has no true in-memory mode; use a temp file and unlink
            // it on drop
            let temp_path =
                std::env::temp_dir().join(format!("strato_props_{}.redb", uuid::Uuid::new_v4()));
            let db =
                Database::create(&temp_path).map_err(|e| StoreError::Backend(e.to_string()))?;
            (db, Some(temp_path))
        } else {
            let path_ref = Path::new(path);
            if config.create_dirs {
                if let Some(parent) = path_ref.parent() {
                    std::fs::create_dir_all(parent).map_err(StoreError::Io)?;
                }
            }

            let db = if path_ref.exists() {
                Database::open(path_ref).map_err(|e| StoreError::Backend(e.to_string()))?
            } else {
                Database::create(path_ref).map_err(|e| StoreError::Backend(e.to_string()))?
            };
            (db, None)
        };

        // Make sure the table exists so read transactions never race its
        // creation.
        let txn = db
            .begin_write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        txn.open_table(PROPERTIES_TABLE)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        txn.commit()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        let cache = Arc::new(StdRwLock::new(LruCache::new(capacity)));

        Ok(Self {
            db: Arc::new(db),
            path: config.path,
            temp_path,
            cache,
        })
    }

    /// Open or create a redb backend at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(RedbBackendConfig::new(
            path.as_ref().to_string_lossy().to_string(),
        ))
    }

    /// Get the storage path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn encode(record: &PropertyRecord) -> Result<Vec<u8>> {
        bincode::serialize(record).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<PropertyRecord> {
        bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

impl PropertyBackend for RedbBackend {
    fn store(&self, interface: &str, path: &str, record: &PropertyRecord) -> Result<()> {
        let key = make_key(interface, path);
        let encoded = Self::encode(record)?;

        // Update cache (write-through)
        if let Ok(mut cache) = self.cache.write() {
            cache.put(key.clone(), encoded.clone());
        }

        let txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            let mut t = txn
                .open_table(PROPERTIES_TABLE)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            t.insert(&*key, &*encoded)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        txn.commit()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn load(&self, interface: &str, path: &str) -> Result<Option<PropertyRecord>> {
        let key = make_key(interface, path);

        // Try cache first - write lock since get() updates LRU position
        if let Ok(mut cache) = self.cache.write() {
            if let Some(cached) = cache.get(&key) {
                return Self::decode(cached).map(Some);
            }
        }

        let txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let t = txn
            .open_table(PROPERTIES_TABLE)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match t
            .get(&*key)
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(value) => {
                let bytes = value.value().to_vec();
                let record = Self::decode(&bytes)?;
                // Populate cache for future reads
                if let Ok(mut cache) = self.cache.write() {
                    cache.put(key, bytes);
                }
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn delete(&self, interface: &str, path: &str) -> Result<bool> {
        let key = make_key(interface, path);

        if let Ok(mut cache) = self.cache.write() {
            cache.pop(&key);
        }

        let txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let removed = {
            let mut t = txn
                .open_table(PROPERTIES_TABLE)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let removed = t
                .remove(&*key)
                .map_err(|e| StoreError::Backend(e.to_string()))?
                .is_some();
            removed
        };
        txn.commit()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(removed)
    }

    fn delete_interface(&self, interface: &str) -> Result<usize> {
        let prefix = format!("{interface}/");

        let txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let removed = {
            let mut t = txn
                .open_table(PROPERTIES_TABLE)
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            let doomed: Vec<String> = {
                let mut keys = Vec::new();
                for item in t.iter().map_err(|e| StoreError::Backend(e.to_string()))? {
                    let (key, _) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
                    if key.value().starts_with(&prefix) {
                        keys.push(key.value().to_string());
                    }
                }
                keys
            };

            for key in &doomed {
                t.remove(key.as_str())
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }
            doomed
        };
        txn.commit()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if let Ok(mut cache) = self.cache.write() {
            for key in &removed {
                cache.pop(key);
            }
        }
        Ok(removed.len())
    }

    fn load_all(&self, interface: Option<&str>) -> Result<Vec<StoredProp>> {
        let prefix = interface.map(|name| format!("{name}/"));

        let txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let t = txn
            .open_table(PROPERTIES_TABLE)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut props = Vec::new();
        for item in t.iter().map_err(|e| StoreError::Backend(e.to_string()))? {
            let (key, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            let key_str = key.value();
            if let Some(prefix) = &prefix {
                if !key_str.starts_with(prefix.as_str()) {
                    continue;
                }
            }
            if let Some((interface, path)) = split_key(key_str) {
                let record = Self::decode(value.value())?;
                props.push(StoredProp {
                    interface: interface.to_string(),
                    path: path.to_string(),
                    value: record.value,
                    version_major: record.version_major,
                });
            }
        }
        Ok(props)
    }

    fn clear(&self) -> Result<()> {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }

        let txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        txn.delete_table(PROPERTIES_TABLE)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        // recreate immediately so later reads find it
        txn.open_table(PROPERTIES_TABLE)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        txn.commit()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        self.path != ":memory:"
    }
}

/// Cleanup temporary database file when RedbBackend is dropped.
impl Drop for RedbBackend {
    fn drop(&mut self) {
        if let Some(temp_path) = &self.temp_path {
            if let Err(e) = std::fs::remove_file(temp_path) {
                tracing::debug!(
                    "failed to remove temporary database file {}: {}",
                    temp_path.display(),
                    e
                );
            }
        }
    }
}
