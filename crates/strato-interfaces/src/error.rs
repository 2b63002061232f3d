//! Error types for interface parsing, lookup and validation.

use thiserror::Error;

/// Errors produced while parsing interface definitions or checking payloads
/// against them.
#[derive(Debug, Error)]
pub enum InterfaceError {
    /// The definition is malformed or violates a structural invariant.
    #[error("invalid interface definition: {0}")]
    Schema(String),

    /// Two endpoint patterns in one interface can match the same concrete path.
    #[error("ambiguous mappings in {interface}: {first} overlaps {second}")]
    AmbiguousMapping {
        interface: String,
        first: String,
        second: String,
    },

    /// The definition could not be decoded as JSON.
    #[error("interface JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// No mapping matches the given concrete path.
    #[error("path {path} not found in interface {interface}")]
    PathNotFound { interface: String, path: String },

    /// The named interface is not loaded.
    #[error("interface {0} not found")]
    InterfaceNotFound(String),

    /// An interface with the same name but a different major version is
    /// already registered.
    #[error("interface {interface} v{offered} conflicts with registered v{registered}")]
    VersionConflict {
        interface: String,
        registered: i32,
        offered: i32,
    },

    /// A payload does not satisfy its mapping contract.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An object aggregate payload does not line up with the mapping set.
    #[error("aggregation mismatch on {interface}{path}: {reason}")]
    AggregationMismatch {
        interface: String,
        path: String,
        reason: String,
    },

    /// The operation is not legal for this interface or mapping.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl InterfaceError {
    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
