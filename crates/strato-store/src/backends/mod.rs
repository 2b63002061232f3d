//! Property backend implementations.
//!
//! This module contains implementations of the `PropertyBackend` trait:
//! a redb-based persistent backend and a volatile in-memory backend for
//! tests and diskless deployments.

pub mod memory;
pub mod redb;

// Re-exports
pub use memory::MemoryBackend;
pub use redb::{RedbBackend, RedbBackendConfig};
