//! Volatile in-memory property backend.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::backend::{make_key, split_key, PropertyBackend, PropertyRecord, StoredProp};
use crate::error::{Result, StoreError};

/// In-memory backend. Nothing survives a restart; useful for tests and for
/// devices that run without writable storage.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    // BTreeMap keeps load_all output in stable key order
    entries: RwLock<BTreeMap<String, PropertyRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries_read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, PropertyRecord>>> {
        self.entries
            .read()
            .map_err(|_| StoreError::Backend("entry lock poisoned".to_string()))
    }

    fn entries_write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, PropertyRecord>>> {
        self.entries
            .write()
            .map_err(|_| StoreError::Backend("entry lock poisoned".to_string()))
    }
}

impl PropertyBackend for MemoryBackend {
    fn store(&self, interface: &str, path: &str, record: &PropertyRecord) -> Result<()> {
        self.entries_write()?
            .insert(make_key(interface, path), record.clone());
        Ok(())
    }

    fn load(&self, interface: &str, path: &str) -> Result<Option<PropertyRecord>> {
        Ok(self.entries_read()?.get(&make_key(interface, path)).cloned())
    }

    fn delete(&self, interface: &str, path: &str) -> Result<bool> {
        Ok(self
            .entries_write()?
            .remove(&make_key(interface, path))
            .is_some())
    }

    fn delete_interface(&self, interface: &str) -> Result<usize> {
        let prefix = format!("{interface}/");
        let mut entries = self.entries_write()?;
        let doomed: Vec<String> = entries
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        Ok(doomed.len())
    }

    fn load_all(&self, interface: Option<&str>) -> Result<Vec<StoredProp>> {
        let prefix = interface.map(|name| format!("{name}/"));
        let entries = self.entries_read()?;
        let mut props = Vec::new();
        for (key, record) in entries.iter() {
            if let Some(prefix) = &prefix {
                if !key.starts_with(prefix.as_str()) {
                    continue;
                }
            }
            if let Some((interface, path)) = split_key(key) {
                props.push(StoredProp {
                    interface: interface.to_string(),
                    path: path.to_string(),
                    value: record.value.clone(),
                    version_major: record.version_major,
                });
            }
        }
        Ok(props)
    }

    fn clear(&self) -> Result<()> {
        self.entries_write()?.clear();
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}
