//! Error types for memory sources.

use thiserror::Error;

/// Errors that can occur while reading from a memory source.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// An address is not backed by any data in the source.
    #[error("Invalid address {invalid_address:#x} in layer '{layer_name}': {message}")]
    InvalidAddress {
        layer_name: String,
        invalid_address: u64,
        message: String,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The layer has been destroyed and cannot be used.
    #[error("Layer '{0}' has been destroyed")]
    LayerDestroyed(String),
}

impl MemoryError {
    /// Create an InvalidAddress error.
    pub fn invalid_address(layer_name: impl Into<String>, addr: u64, msg: impl Into<String>) -> Self {
        MemoryError::InvalidAddress {
            layer_name: layer_name.into(),
            invalid_address: addr,
            message: msg.into(),
        }
    }

    /// Create a LayerDestroyed error.
    pub fn layer_destroyed(name: impl Into<String>) -> Self {
        MemoryError::LayerDestroyed(name.into())
    }
}

/// Result type for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
