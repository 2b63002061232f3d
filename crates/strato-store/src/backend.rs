//! Backing-storage abstraction for property entries.
//!
//! This module defines the capability trait every property backing store
//! implements. Backends are dumb byte shelves keyed by (interface, path);
//! version-mismatch policy and unset semantics live in
//! [`PropertyStore`](crate::store::PropertyStore).

use serde::{Deserialize, Serialize};
use strato_interfaces::Value;

use crate::error::Result;

/// The persisted part of a property entry. Interface name and path are the
/// key and are not duplicated inside the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub value: Value,
    /// Major version of the interface that wrote the value. Entries written
    /// under a different major are stale and must not be served.
    pub version_major: i32,
}

/// A full property entry as returned by scans.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredProp {
    pub interface: String,
    pub path: String,
    pub value: Value,
    pub version_major: i32,
}

/// Core property backend trait.
///
/// Implementations must make each operation atomic: a concurrent reader
/// sees either the state before or after a `store`/`delete`, never a torn
/// record. Callers serialize mutations per (interface, path).
pub trait PropertyBackend: Send + Sync {
    /// Write or overwrite the record for one property path.
    fn store(&self, interface: &str, path: &str, record: &PropertyRecord) -> Result<()>;

    /// Read the record for one property path, if present.
    fn load(&self, interface: &str, path: &str) -> Result<Option<PropertyRecord>>;

    /// Remove one property path. Returns whether an entry existed.
    fn delete(&self, interface: &str, path: &str) -> Result<bool>;

    /// Remove every entry belonging to an interface. Returns the number of
    /// entries removed.
    fn delete_interface(&self, interface: &str) -> Result<usize>;

    /// All stored entries, optionally restricted to one interface, in
    /// stable (interface, path) order.
    fn load_all(&self, interface: Option<&str>) -> Result<Vec<StoredProp>>;

    /// Remove every entry.
    fn clear(&self) -> Result<()>;

    /// Check if this backend survives a process restart.
    fn is_persistent(&self) -> bool;
}

/// Storage key for one property path. Interface names never contain `/`
/// and paths always start with one, so the concatenation stays unambiguous
/// and `"<interface>/"` is a valid scan prefix.
pub(crate) fn make_key(interface: &str, path: &str) -> String {
    let mut key = String::with_capacity(interface.len() + path.len());
    key.push_str(interface);
    key.push_str(path);
    key
}

/// Inverse of [`make_key`].
pub(crate) fn split_key(key: &str) -> Option<(&str, &str)> {
    key.find('/')
        .map(|slash| (&key[..slash], &key[slash..]))
}
