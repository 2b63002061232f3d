//! Device client error types.

use thiserror::Error;

use crate::pairing::PairingError;

/// Result type for device operations.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Errors surfaced by the device client.
///
/// Validation-family errors reject a single operation and never disturb the
/// session. Pairing and timeout errors feed the reconnection machinery.
/// Configuration errors are fatal preconditions reported synchronously.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Interface schema, lookup or payload validation failure.
    #[error(transparent)]
    Interface(#[from] strato_interfaces::InterfaceError),

    /// Property cache failure.
    #[error(transparent)]
    Store(#[from] strato_store::StoreError),

    /// Credential registration or renewal failed.
    #[error(transparent)]
    Pairing(#[from] PairingError),

    /// A fatal precondition at `connect()` or during setup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A bounded wait expired.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The transport rejected or lost an operation.
    #[error("transport error: {0}")]
    Transport(String),

    /// The operation needs a running session.
    #[error("device is not connected")]
    Disconnected,

    /// A client certificate could not be stored, parsed or renewed.
    #[error("credential error: {0}")]
    Credentials(String),
}
