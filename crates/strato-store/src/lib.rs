//! Durable Property Cache
//!
//! Properties set on a device must survive restarts and stay in lockstep
//! with what the platform believes. This crate stores them locally, keyed
//! by (interface name, path), behind a pluggable backend trait.
//!
//! ## Architecture
//!
//! - **PropertyBackend**: the capability trait a backing store implements
//! - **RedbBackend**: persistent default, one redb table plus an LRU cache
//! - **MemoryBackend**: volatile implementation for tests and diskless use
//! - **PropertyStore**: facade applying version-eviction policy on top of
//!   whichever backend is configured

pub mod backend;
pub mod backends;
pub mod error;
pub mod store;

// Re-exports for convenience
pub use backend::{PropertyBackend, PropertyRecord, StoredProp};
pub use backends::{MemoryBackend, RedbBackend, RedbBackendConfig};
pub use error::{Result, StoreError};
pub use store::PropertyStore;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
