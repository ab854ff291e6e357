//! Error types for structure traversal.

use structinfo::StructInfoError;
use thiserror::Error;

/// Errors raised while reading runtime structures out of a target.
#[derive(Error, Debug)]
pub enum WalkError {
    /// An address in the target could not be dereferenced.
    #[error("Unreadable {what} at {address:#x}: {message}")]
    Unreadable {
        what: String,
        address: u64,
        message: String,
    },

    /// No reader implementation matches the layout the target declares.
    #[error("Unsupported algorithm {id}: target declares vm minor {vm_minor}, version {algorithm_version}")]
    Unsupported {
        id: String,
        vm_minor: u32,
        algorithm_version: u32,
    },

    /// A structure header is readable but self-contradictory.
    #[error("Malformed {structure} header at {address:#x}: {reason}")]
    MalformedHeader {
        structure: String,
        address: u64,
        reason: String,
    },

    /// The structure-description blob lacks something a reader needs.
    #[error("Structure metadata error: {0}")]
    Metadata(StructInfoError),
}

impl WalkError {
    /// Create an Unreadable error.
    pub fn unreadable(what: impl Into<String>, address: u64, message: impl Into<String>) -> Self {
        WalkError::Unreadable {
            what: what.into(),
            address,
            message: message.into(),
        }
    }

    /// Create a MalformedHeader error.
    pub fn malformed(structure: impl Into<String>, address: u64, reason: impl Into<String>) -> Self {
        WalkError::MalformedHeader {
            structure: structure.into(),
            address,
            reason: reason.into(),
        }
    }

    /// Whether this is a failed read against the target.
    pub fn is_unreadable(&self) -> bool {
        matches!(self, WalkError::Unreadable { .. })
    }

    /// Re-label an Unreadable error with the structure being read.
    pub fn context(self, what: &str) -> Self {
        match self {
            WalkError::Unreadable {
                address, message, ..
            } => WalkError::Unreadable {
                what: what.to_string(),
                address,
                message,
            },
            other => other,
        }
    }
}

impl WalkError {
    /// Copy of a target-data error, for handing to a reporter while the
    /// original is returned. Metadata errors are not copied.
    pub(crate) fn duplicate(&self) -> Option<WalkError> {
        match self {
            WalkError::Unreadable {
                what,
                address,
                message,
            } => Some(WalkError::unreadable(what.clone(), *address, message.clone())),
            WalkError::MalformedHeader {
                structure,
                address,
                reason,
            } => Some(WalkError::malformed(structure.clone(), *address, reason.clone())),
            WalkError::Unsupported { .. } | WalkError::Metadata(_) => None,
        }
    }
}

impl From<StructInfoError> for WalkError {
    fn from(err: StructInfoError) -> Self {
        match err {
            StructInfoError::MemoryRead { offset, msg } => WalkError::Unreadable {
                what: "memory".to_string(),
                address: offset,
                message: msg,
            },
            other => WalkError::Metadata(other),
        }
    }
}

/// Result type for traversal operations.
pub type WalkResult<T> = Result<T, WalkError>;
