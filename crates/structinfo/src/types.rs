//! Type definitions for parsed structure-description blobs.

use serde::Deserialize;
use std::collections::HashMap;

/// Top-level blob file structure.
#[derive(Debug, Deserialize)]
pub struct BlobFile {
    pub metadata: Metadata,
    #[serde(default)]
    pub base_types: HashMap<String, BaseType>,
    #[serde(default)]
    pub user_types: HashMap<String, UserType>,
    #[serde(default)]
    pub symbols: HashMap<String, Symbol>,
}

/// Blob metadata block.
#[derive(Debug, Deserialize)]
pub struct Metadata {
    pub format: String,
    #[serde(default)]
    pub producer: Option<Producer>,
    #[serde(default)]
    pub target: Option<TargetMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct Producer {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub datetime: Option<String>,
}

/// Description of the process the blob was produced for.
#[derive(Debug, Deserialize)]
pub struct TargetMetadata {
    #[serde(default = "default_endian")]
    pub endian: String,
    #[serde(default)]
    pub platform: Option<String>,
}

/// A base (primitive) type definition.
#[derive(Debug, Clone, Deserialize)]
pub struct BaseType {
    pub size: usize,
    pub signed: bool,
    pub kind: String,
    #[serde(default = "default_endian")]
    pub endian: String,
}

fn default_endian() -> String {
    "little".to_string()
}

/// A user-defined (struct) type.
#[derive(Debug, Clone, Deserialize)]
pub struct UserType {
    pub size: usize,
    #[serde(default)]
    pub fields: HashMap<String, FieldDef>,
    /// Named integer constants the runtime build attached to this type.
    #[serde(default)]
    pub constants: HashMap<String, i64>,
}

/// A field within a user type.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldDef {
    pub offset: usize,
    #[serde(rename = "type")]
    pub type_info: TypeInfo,
}

/// Type information for a field.
#[derive(Debug, Clone, Deserialize)]
pub struct TypeInfo {
    pub kind: String,

    /// For kind="struct" or kind="base": the type name.
    #[serde(default)]
    pub name: Option<String>,

    /// For kind="pointer", "srp" and "wsrp": the type being pointed to.
    #[serde(default)]
    pub subtype: Option<Box<TypeInfo>>,

    /// For kind="array": element count.
    #[serde(default)]
    pub count: Option<usize>,

    /// Size override.
    #[serde(default)]
    pub size: Option<usize>,
}

/// A symbol (named address).
#[derive(Debug, Clone, Deserialize)]
pub struct Symbol {
    pub address: u64,
}

// ============================================================================
// Resolved/processed types for runtime use
// ============================================================================

/// Fully resolved structure description ready for use.
#[derive(Debug)]
pub struct BlobSymbols {
    /// Base (primitive) types.
    pub base_types: HashMap<String, BaseType>,
    /// User-defined struct types.
    pub user_types: HashMap<String, UserType>,
    /// Named symbols (addresses).
    pub symbols: HashMap<String, Symbol>,
    /// Metadata.
    pub metadata: Metadata,
    /// Pointer size in bytes (4 or 8).
    pub pointer_size: usize,
    /// Whether multi-byte values in the target are big-endian.
    pub big_endian: bool,
}

impl BlobSymbols {
    /// Look up a struct definition by name.
    pub fn get_type(&self, name: &str) -> Option<&UserType> {
        self.user_types.get(name)
    }

    /// Look up a symbol address by name.
    pub fn get_symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).map(|s| s.address)
    }

    /// Look up a field offset within a struct.
    pub fn field_offset(&self, type_name: &str, field_name: &str) -> Option<usize> {
        self.user_types
            .get(type_name)
            .and_then(|t| t.fields.get(field_name))
            .map(|f| f.offset)
    }

    /// Get the size of a type (user type or base type).
    pub fn type_size(&self, type_name: &str) -> Option<usize> {
        if let Some(ut) = self.user_types.get(type_name) {
            Some(ut.size)
        } else {
            self.base_types.get(type_name).map(|bt| bt.size)
        }
    }

    /// Resolve the size of a TypeInfo in bytes.
    pub fn resolve_type_size(&self, type_info: &TypeInfo) -> Option<usize> {
        if let Some(size) = type_info.size {
            return Some(size);
        }
        match type_info.kind.as_str() {
            "pointer" | "wsrp" => Some(self.pointer_size),
            "srp" => Some(4),
            "struct" | "base" => type_info.name.as_ref().and_then(|n| self.type_size(n)),
            "array" => {
                let count = type_info.count.unwrap_or(0);
                let elem_size = type_info
                    .subtype
                    .as_ref()
                    .and_then(|st| self.resolve_type_size(st))?;
                Some(count * elem_size)
            }
            _ => None,
        }
    }

    /// The constants attached to one type, if the type exists.
    pub fn constants_of(&self, type_name: &str) -> Option<&HashMap<String, i64>> {
        self.user_types.get(type_name).map(|t| &t.constants)
    }

    /// Every constant in the blob, paired with the type that carries it.
    pub fn all_constants(&self) -> impl Iterator<Item = (&str, &str, i64)> + '_ {
        self.user_types.iter().flat_map(|(type_name, ut)| {
            ut.constants
                .iter()
                .map(move |(name, &value)| (type_name.as_str(), name.as_str(), value))
        })
    }
}
