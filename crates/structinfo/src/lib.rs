//! Structure-description blob parser for out-of-process runtime inspection.
//!
//! A managed runtime build ships a JSON description of its own internal
//! structures: sizes, field offsets, the target pointer width and byte order,
//! and a set of named integer constants. This crate provides:
//!
//! - Parsing of `.json` and `.json.xz` (LZMA-compressed) blob files
//! - Type definitions for the blob (structs, base types, constants, symbols)
//! - The [`AddressSpace`] trait, the read-only view of a target process
//! - [`StructReader`] for reading a target structure's fields by name
//!
//! # Example
//!
//! ```rust,ignore
//! use structinfo::{parse_blob_file, StructReader};
//!
//! let blob = parse_blob_file("j9ddr.json.xz")?;
//! let table = StructReader::new(&blob, &memory, table_addr, "J9HashTable")?;
//! let size = table.read_u32("tableSize")?;
//! ```

pub mod error;
pub mod parser;
pub mod reader;
pub mod types;

// Re-export key types at crate root.
pub use error::{StructInfoError, StructInfoResult};
pub use parser::{parse_blob_bytes, parse_blob_file, parse_blob_str};
pub use reader::{
    apply_offset_relative_to_self, decode_unsigned, sign_extend, AccessError, AddressSpace, StructReader,
};
pub use types::{BaseType, BlobSymbols, FieldDef, Symbol, TypeInfo, UserType};
