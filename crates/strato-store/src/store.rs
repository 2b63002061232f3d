//! Property store facade.
//!
//! [`PropertyStore`] wraps a [`PropertyBackend`] and applies the policies
//! the raw byte shelf does not know about: entries written under a
//! different interface major version are stale and get evicted on read
//! instead of being served.

use std::sync::Arc;

use strato_interfaces::Value;

use crate::backend::{PropertyBackend, PropertyRecord, StoredProp};
use crate::backends::{MemoryBackend, RedbBackend, RedbBackendConfig};
use crate::error::Result;

/// Shared handle to the property cache.
#[derive(Clone)]
pub struct PropertyStore {
    backend: Arc<dyn PropertyBackend>,
}

impl PropertyStore {
    /// Wrap a caller-supplied backend.
    pub fn new(backend: Arc<dyn PropertyBackend>) -> Self {
        Self { backend }
    }

    /// Volatile store, nothing survives a restart.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Persistent store on a redb database at the given path.
    pub fn open(path: impl Into<String>) -> Result<Self> {
        let backend = RedbBackend::new(RedbBackendConfig::new(path))?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Write or overwrite a property value.
    pub fn store(
        &self,
        interface: &str,
        path: &str,
        value: &Value,
        version_major: i32,
    ) -> Result<()> {
        let record = PropertyRecord {
            value: value.clone(),
            version_major,
        };
        self.backend.store(interface, path, &record)
    }

    /// Read a property value. An entry written under a different major
    /// version than `expected_major` is deleted and reported absent: the
    /// old shape must not leak into the new contract.
    pub fn load(&self, interface: &str, path: &str, expected_major: i32) -> Result<Option<Value>> {
        match self.backend.load(interface, path)? {
            Some(record) if record.version_major == expected_major => Ok(Some(record.value)),
            Some(record) => {
                tracing::debug!(
                    interface,
                    path,
                    stored = record.version_major,
                    expected = expected_major,
                    "evicting property stored under stale major version"
                );
                self.backend.delete(interface, path)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Remove a property entry. Returns whether one existed.
    pub fn delete(&self, interface: &str, path: &str) -> Result<bool> {
        self.backend.delete(interface, path)
    }

    /// Remove every entry of an interface. Returns the number removed.
    pub fn delete_interface(&self, interface: &str) -> Result<usize> {
        let removed = self.backend.delete_interface(interface)?;
        if removed > 0 {
            tracing::debug!(interface, removed, "evicted interface properties");
        }
        Ok(removed)
    }

    /// All stored entries, optionally restricted to one interface.
    pub fn load_all(&self, interface: Option<&str>) -> Result<Vec<StoredProp>> {
        self.backend.load_all(interface)
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<()> {
        self.backend.clear()
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.is_persistent()
    }
}

impl std::fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyStore")
            .field("persistent", &self.backend.is_persistent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let store = PropertyStore::in_memory();
        store
            .store("org.example.A", "/on", &Value::Boolean(true), 1)
            .unwrap();
        assert_eq!(
            store.load("org.example.A", "/on", 1).unwrap(),
            Some(Value::Boolean(true))
        );
    }

    #[test]
    fn unset_leaves_absent() {
        let store = PropertyStore::in_memory();
        store
            .store("org.example.A", "/on", &Value::Boolean(true), 1)
            .unwrap();
        assert!(store.delete("org.example.A", "/on").unwrap());
        assert_eq!(store.load("org.example.A", "/on", 1).unwrap(), None);
    }

    #[test]
    fn storing_twice_keeps_last_value() {
        let store = PropertyStore::in_memory();
        store
            .store("org.example.A", "/n", &Value::Integer(1), 1)
            .unwrap();
        store
            .store("org.example.A", "/n", &Value::Integer(1), 1)
            .unwrap();
        assert_eq!(
            store.load("org.example.A", "/n", 1).unwrap(),
            Some(Value::Integer(1))
        );
        assert_eq!(store.load_all(Some("org.example.A")).unwrap().len(), 1);
    }

    #[test]
    fn stale_major_version_is_evicted_on_read() {
        let store = PropertyStore::in_memory();
        store
            .store("org.example.A", "/n", &Value::Integer(9), 1)
            .unwrap();

        // interface upgraded to major 2: the old entry must vanish
        assert_eq!(store.load("org.example.A", "/n", 2).unwrap(), None);
        // and it is really gone, not just hidden
        assert_eq!(store.load("org.example.A", "/n", 1).unwrap(), None);
    }

    #[test]
    fn false_is_a_stored_value() {
        let store = PropertyStore::in_memory();
        store
            .store("org.example.A", "/on", &Value::Boolean(false), 1)
            .unwrap();
        assert_eq!(
            store.load("org.example.A", "/on", 1).unwrap(),
            Some(Value::Boolean(false))
        );
    }
}
