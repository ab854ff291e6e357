//! Blob file parser for plain JSON and .json.xz compressed files.

use crate::error::{StructInfoError, StructInfoResult};
use crate::types::{BlobFile, BlobSymbols};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;
use xz2::read::XzDecoder;

/// Parse a blob file from a filesystem path.
///
/// Automatically detects compression:
/// - `.json.xz` or `.xz` → LZMA decompression then JSON parse
/// - `.json` or anything else → direct JSON parse
pub fn parse_blob_file(path: impl AsRef<Path>) -> StructInfoResult<BlobSymbols> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(StructInfoError::FileNotFound(path.display().to_string()));
    }

    let file = File::open(path)
        .map_err(|e| StructInfoError::Io(format!("opening {}: {}", path.display(), e)))?;
    let reader = BufReader::new(file);
    let mut buf = Vec::new();

    let path_str = path.to_string_lossy().to_lowercase();
    if path_str.ends_with(".xz") {
        XzDecoder::new(reader)
            .read_to_end(&mut buf)
            .map_err(|e| StructInfoError::Decompression(format!("{}: {}", path.display(), e)))?;
    } else {
        let mut reader = reader;
        reader
            .read_to_end(&mut buf)
            .map_err(|e| StructInfoError::Io(format!("reading {}: {}", path.display(), e)))?;
    }

    debug!("Read {} blob bytes from {}", buf.len(), path.display());
    parse_blob_bytes(&buf)
}

/// Parse a blob from raw JSON bytes (already decompressed).
pub fn parse_blob_bytes(json_bytes: &[u8]) -> StructInfoResult<BlobSymbols> {
    let blob: BlobFile = serde_json::from_slice(json_bytes)
        .map_err(|e| StructInfoError::JsonParse(format!("{}", e)))?;

    convert_to_symbols(blob)
}

/// Parse a blob from a JSON string.
pub fn parse_blob_str(json_str: &str) -> StructInfoResult<BlobSymbols> {
    let blob: BlobFile = serde_json::from_str(json_str)
        .map_err(|e| StructInfoError::JsonParse(format!("{}", e)))?;

    convert_to_symbols(blob)
}

/// Convert a parsed BlobFile into resolved BlobSymbols.
fn convert_to_symbols(blob: BlobFile) -> StructInfoResult<BlobSymbols> {
    let pointer_size = blob
        .base_types
        .get("pointer")
        .map(|bt| bt.size)
        .unwrap_or(8); // default to 64-bit

    if pointer_size != 4 && pointer_size != 8 {
        return Err(StructInfoError::JsonParse(format!(
            "unsupported pointer size: {}",
            pointer_size
        )));
    }

    let big_endian = blob
        .metadata
        .target
        .as_ref()
        .map(|t| t.endian.eq_ignore_ascii_case("big"))
        .unwrap_or(false);

    Ok(BlobSymbols {
        base_types: blob.base_types,
        user_types: blob.user_types,
        symbols: blob.symbols,
        metadata: blob.metadata,
        pointer_size,
        big_endian,
    })
}
