//! Interface Contract Model
//!
//! This crate holds the device-side model of platform interfaces: parsing
//! and validation of interface JSON definitions, endpoint-pattern matching,
//! payload type checking and introspection tracking.
//!
//! ## Architecture
//!
//! - **Interface / Mapping**: validated schema objects built from platform
//!   JSON definitions
//! - **Registry**: the set of interfaces a device currently advertises
//! - **IntrospectionTracker**: detects when the advertised set changed and
//!   a re-announcement is due
//! - **Value**: the abstract typed value tree exchanged through `send` and
//!   receive callbacks, independent of any wire encoding
//!
//! Everything here is pure and synchronous. Transport, persistence and the
//! session live in the companion crates.

pub mod endpoint;
pub mod error;
pub mod interface;
pub mod introspection;
pub mod mapping;
pub mod registry;
pub mod value;

// Re-exports for convenience
pub use endpoint::{Endpoint, Segment};
pub use error::InterfaceError;
pub use interface::{Aggregation, Interface, InterfaceKind, Ownership};
pub use introspection::{IntrospectionChange, IntrospectionTracker};
pub use mapping::{Mapping, Reliability, Retention};
pub use registry::Registry;
pub use value::{MappingType, Value};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
