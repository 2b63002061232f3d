//! Interface registry.
//!
//! Holds the set of currently advertised interfaces, keyed by name. The
//! registry is a plain data structure: the owning session serializes all
//! mutation, so there is no interior locking here. Interfaces are stored
//! behind `Arc` so lookups hand out cheap clones that stay valid across
//! later registry changes.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::InterfaceError;
use crate::interface::Interface;

/// The set of loaded interfaces.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    interfaces: BTreeMap<String, Arc<Interface>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an interface. Re-adding a name with the same major version
    /// replaces the previous definition (minor bumps, mapping changes); a
    /// different major version is rejected, callers must use
    /// [`Registry::replace`] to signal the upgrade intentionally.
    pub fn add(&mut self, interface: Interface) -> Result<Arc<Interface>, InterfaceError> {
        if let Some(existing) = self.interfaces.get(interface.name()) {
            if existing.version_major() != interface.version_major() {
                return Err(InterfaceError::VersionConflict {
                    interface: interface.name().to_string(),
                    registered: existing.version_major(),
                    offered: interface.version_major(),
                });
            }
        }
        Ok(self.insert(interface))
    }

    /// Registers an interface unconditionally, replacing any previous
    /// definition under the same name regardless of version.
    pub fn replace(&mut self, interface: Interface) -> Arc<Interface> {
        self.insert(interface)
    }

    fn insert(&mut self, interface: Interface) -> Arc<Interface> {
        let interface = Arc::new(interface);
        tracing::debug!(interface = %interface, "interface registered");
        self.interfaces
            .insert(interface.name().to_string(), Arc::clone(&interface));
        interface
    }

    /// Removes an interface, returning it so callers can cascade cleanup
    /// (property eviction, unsubscription).
    pub fn remove(&mut self, name: &str) -> Result<Arc<Interface>, InterfaceError> {
        let removed = self
            .interfaces
            .remove(name)
            .ok_or_else(|| InterfaceError::InterfaceNotFound(name.to_string()))?;
        tracing::debug!(interface = %removed, "interface removed");
        Ok(removed)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Interface>> {
        self.interfaces.get(name)
    }

    /// Like [`Registry::get`] but with the not-found error attached.
    pub fn resolve(&self, name: &str) -> Result<&Arc<Interface>, InterfaceError> {
        self.interfaces
            .get(name)
            .ok_or_else(|| InterfaceError::InterfaceNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.interfaces.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// All interfaces, in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Interface>> {
        self.interfaces.values()
    }

    /// Interfaces the platform publishes on, in name order. These are the
    /// ones a session subscribes to.
    pub fn server_owned(&self) -> impl Iterator<Item = &Arc<Interface>> {
        self.interfaces.values().filter(|i| i.is_server_owned())
    }

    /// Device-owned property interfaces, in name order. Their stored values
    /// are flushed to the platform when a session starts clean.
    pub fn device_owned_properties(&self) -> impl Iterator<Item = &Arc<Interface>> {
        self.interfaces
            .values()
            .filter(|i| i.is_properties() && !i.is_server_owned())
    }

    /// Deterministic (name, major, minor) triples for all loaded
    /// interfaces, name-sorted.
    pub fn introspection_entries(&self) -> impl Iterator<Item = (&str, i32, i32)> {
        self.interfaces
            .values()
            .map(|i| (i.name(), i.version_major(), i.version_minor()))
    }

    /// The advertised introspection string: comma-separated
    /// `name:major:minor` triples in name order. Byte-for-byte reproducible
    /// for a given interface set.
    pub fn introspection_string(&self) -> String {
        let entries: Vec<String> = self
            .introspection_entries()
            .map(|(name, major, minor)| format!("{name}:{major}:{minor}"))
            .collect();
        entries.join(",")
    }
}
