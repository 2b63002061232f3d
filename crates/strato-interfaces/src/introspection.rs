//! Introspection change tracking.
//!
//! The tracker remembers the interface set last announced to the platform
//! and diffs it against the live [`Registry`] whenever the set may have
//! changed, so a connected session knows whether a re-announcement is due
//! without tearing the connection down.

use std::collections::BTreeMap;

use crate::registry::Registry;

/// Outcome of comparing the live registry against the announced snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntrospectionChange {
    Unchanged,
    /// Names that must be (re-)announced and names that disappeared. A
    /// version bump shows up under `added`: the platform needs to hear the
    /// new triple.
    Changed {
        added: Vec<String>,
        removed: Vec<String>,
    },
}

impl IntrospectionChange {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Tracks the last-announced introspection snapshot.
#[derive(Debug, Clone, Default)]
pub struct IntrospectionTracker {
    announced: BTreeMap<String, (i32, i32)>,
}

impl IntrospectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diffs the registry against the announced snapshot. Pure; call
    /// [`IntrospectionTracker::mark_announced`] once the new introspection
    /// actually went out.
    pub fn diff(&self, registry: &Registry) -> IntrospectionChange {
        let mut added = Vec::new();
        let mut removed = Vec::new();

        for (name, major, minor) in registry.introspection_entries() {
            match self.announced.get(name) {
                Some(&(m, n)) if m == major && n == minor => {}
                _ => added.push(name.to_string()),
            }
        }
        for name in self.announced.keys() {
            if !registry.contains(name) {
                removed.push(name.clone());
            }
        }

        if added.is_empty() && removed.is_empty() {
            IntrospectionChange::Unchanged
        } else {
            IntrospectionChange::Changed { added, removed }
        }
    }

    /// Records the registry contents as the announced snapshot.
    pub fn mark_announced(&mut self, registry: &Registry) {
        self.announced = registry
            .introspection_entries()
            .map(|(name, major, minor)| (name.to_string(), (major, minor)))
            .collect();
    }

    /// Forgets the snapshot, e.g. after a disconnect. The next diff will
    /// report everything as added.
    pub fn clear(&mut self) {
        self.announced.clear();
    }
}
