//! Error types shared between the engine and the host

use crate::host::{ComponentId, EntityId};

/// Result type for native calls
pub type NativeResult<T> = Result<T, NativeError>;

/// Errors raised by host natives or value conversion
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NativeError {
    /// Type mismatch during conversion
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        got: String,
    },

    /// Invalid argument
    #[error("Argument error: {0}")]
    ArgumentError(String),

    /// The native ran but reported a failure
    #[error("{0}")]
    Failed(String),
}

impl From<String> for NativeError {
    fn from(s: String) -> Self {
        NativeError::Failed(s)
    }
}

impl From<&str> for NativeError {
    fn from(s: &str) -> Self {
        NativeError::Failed(s.to_string())
    }
}

/// Errors reported by a [`Host`](crate::Host) implementation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The entity does not exist or has been destroyed
    #[error("Entity {0} not found")]
    EntityNotFound(EntityId),

    /// The component has been destroyed
    #[error("Component {0} has been destroyed")]
    ComponentDestroyed(ComponentId),

    /// The host refused the request
    #[error("Host rejected request: {0}")]
    Rejected(String),
}
