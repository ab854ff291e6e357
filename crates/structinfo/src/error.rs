//! Error types for the structinfo crate.

use thiserror::Error;

/// Blob parsing and structure reading errors.
#[derive(Debug, Error)]
pub enum StructInfoError {
    #[error("blob file not found: {0}")]
    FileNotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("XZ/LZMA decompression error: {0}")]
    Decompression(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("Type not found: {0}")]
    TypeNotFound(String),

    #[error("Field not found: {field} in type {type_name}")]
    FieldNotFound { type_name: String, field: String },

    #[error("Memory read error at offset {offset:#x}: {msg}")]
    MemoryRead { offset: u64, msg: String },

    #[error("Invalid pointer: {0:#x}")]
    InvalidPointer(u64),
}

impl StructInfoError {
    /// Whether this error came from the target's address space rather than
    /// from the blob itself.
    pub fn is_memory_read(&self) -> bool {
        matches!(self, StructInfoError::MemoryRead { .. })
    }
}

pub type StructInfoResult<T> = Result<T, StructInfoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_read_display() {
        let err = StructInfoError::MemoryRead {
            offset: 0x1000,
            msg: "unmapped".to_string(),
        };
        assert!(err.is_memory_read());
        assert!(err.to_string().contains("0x1000"));
        assert!(err.to_string().contains("unmapped"));
    }

    #[test]
    fn test_field_not_found_is_not_memory_read() {
        let err = StructInfoError::FieldNotFound {
            type_name: "J9Pool".to_string(),
            field: "puddleList".to_string(),
        };
        assert!(!err.is_memory_read());
        assert_eq!(err.to_string(), "Field not found: puddleList in type J9Pool");
    }
}
