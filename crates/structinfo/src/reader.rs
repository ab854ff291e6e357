//! StructReader: reads runtime structures from a target using blob offsets.
//!
//! This is the bridge between the structure-description blob and raw target
//! memory. Given a base address and a struct type name, it reads individual
//! fields using the offsets from the blob, in the target's byte order.

use crate::error::{StructInfoError, StructInfoResult};
use crate::types::BlobSymbols;

/// Error returned by an [`AddressSpace`] when a range cannot be read.
pub type AccessError = Box<dyn std::error::Error + Send + Sync>;

/// Read-only view of a target process's address space (live or snapshot).
///
/// Implementations never expose a way to write; every reader in the
/// workspace goes through this trait.
pub trait AddressSpace: Send + Sync {
    /// Read `length` bytes starting at `address`.
    fn read(&self, address: u64, length: usize) -> Result<Vec<u8>, AccessError>;

    /// Check if the range `[address, address+length)` is readable.
    fn is_valid(&self, address: u64, length: u64) -> bool;
}

/// Decode an unsigned integer of `bytes.len()` (1, 2, 4 or 8) bytes.
pub fn decode_unsigned(bytes: &[u8], big_endian: bool) -> u64 {
    let mut value = 0u64;
    if big_endian {
        for &b in bytes {
            value = (value << 8) | b as u64;
        }
    } else {
        for &b in bytes.iter().rev() {
            value = (value << 8) | b as u64;
        }
    }
    value
}

/// Reads fields from a runtime structure at a given base address.
///
/// # Example
///
/// ```rust,ignore
/// let puddle = StructReader::new(&blob, &memory, addr, "J9PoolPuddle")?;
/// let used = puddle.read_udata("usedElements")?;
/// let next = puddle.read_wsrp("nextPuddle")?;
/// ```
pub struct StructReader<'a> {
    symbols: &'a BlobSymbols,
    memory: &'a dyn AddressSpace,
    base_addr: u64,
    type_name: String,
}

impl<'a> StructReader<'a> {
    /// Create a new StructReader for a struct at the given address.
    pub fn new(
        symbols: &'a BlobSymbols,
        memory: &'a dyn AddressSpace,
        base_addr: u64,
        type_name: &str,
    ) -> StructInfoResult<Self> {
        if !symbols.user_types.contains_key(type_name) {
            return Err(StructInfoError::TypeNotFound(type_name.to_string()));
        }
        Ok(StructReader {
            symbols,
            memory,
            base_addr,
            type_name: type_name.to_string(),
        })
    }

    /// The base address of this struct in memory.
    pub fn base_addr(&self) -> u64 {
        self.base_addr
    }

    /// The type name of this struct.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Size of this struct as described by the blob.
    pub fn size(&self) -> usize {
        self.symbols.type_size(&self.type_name).unwrap_or(0)
    }

    /// Get the offset of a field within this struct.
    fn field_offset(&self, field: &str) -> StructInfoResult<usize> {
        self.symbols
            .field_offset(&self.type_name, field)
            .ok_or_else(|| StructInfoError::FieldNotFound {
                type_name: self.type_name.clone(),
                field: field.to_string(),
            })
    }

    /// Absolute address of a field.
    pub fn field_address(&self, field: &str) -> StructInfoResult<u64> {
        let offset = self.field_offset(field)?;
        Ok(self.base_addr.wrapping_add(offset as u64))
    }

    fn read_raw(&self, addr: u64, length: usize) -> StructInfoResult<Vec<u8>> {
        let bytes = self
            .memory
            .read(addr, length)
            .map_err(|e| StructInfoError::MemoryRead {
                offset: addr,
                msg: e.to_string(),
            })?;
        if bytes.len() < length {
            return Err(StructInfoError::MemoryRead {
                offset: addr,
                msg: format!("short read: wanted {} bytes, got {}", length, bytes.len()),
            });
        }
        Ok(bytes)
    }

    fn read_unsigned(&self, field: &str, length: usize) -> StructInfoResult<u64> {
        let addr = self.field_address(field)?;
        let bytes = self.read_raw(addr, length)?;
        Ok(decode_unsigned(&bytes, self.symbols.big_endian))
    }

    /// Read raw bytes at a field's offset.
    pub fn read_field_bytes(&self, field: &str, length: usize) -> StructInfoResult<Vec<u8>> {
        let addr = self.field_address(field)?;
        self.read_raw(addr, length)
    }

    /// Read a u8 field.
    pub fn read_u8(&self, field: &str) -> StructInfoResult<u8> {
        self.read_unsigned(field, 1).map(|v| v as u8)
    }

    /// Read a u16 field.
    pub fn read_u16(&self, field: &str) -> StructInfoResult<u16> {
        self.read_unsigned(field, 2).map(|v| v as u16)
    }

    /// Read a u32 field.
    pub fn read_u32(&self, field: &str) -> StructInfoResult<u32> {
        self.read_unsigned(field, 4).map(|v| v as u32)
    }

    /// Read a u64 field.
    pub fn read_u64(&self, field: &str) -> StructInfoResult<u64> {
        self.read_unsigned(field, 8)
    }

    /// Read an i32 field.
    pub fn read_i32(&self, field: &str) -> StructInfoResult<i32> {
        self.read_unsigned(field, 4).map(|v| v as u32 as i32)
    }

    /// Read an i64 field.
    pub fn read_i64(&self, field: &str) -> StructInfoResult<i64> {
        self.read_unsigned(field, 8).map(|v| v as i64)
    }

    /// Read a pointer-sized value (4 or 8 bytes depending on the blob).
    pub fn read_pointer(&self, field: &str) -> StructInfoResult<u64> {
        self.read_unsigned(field, self.symbols.pointer_size)
    }

    /// Read a pointer-sized unsigned integer (`UDATA`).
    pub fn read_udata(&self, field: &str) -> StructInfoResult<u64> {
        self.read_pointer(field)
    }

    /// Read a 32-bit self-relative pointer field. Zero means null.
    pub fn read_srp(&self, field: &str) -> StructInfoResult<u64> {
        let addr = self.field_address(field)?;
        let raw = decode_unsigned(&self.read_raw(addr, 4)?, self.symbols.big_endian);
        Ok(apply_offset_relative_to_self(sign_extend(raw, 4) as u64, addr))
    }

    /// Read a pointer-width self-relative pointer field. Zero means null.
    pub fn read_wsrp(&self, field: &str) -> StructInfoResult<u64> {
        let addr = self.field_address(field)?;
        let raw = self.read_pointer_at(addr)?;
        let offset = sign_extend(raw, self.symbols.pointer_size);
        Ok(apply_offset_relative_to_self(offset as u64, addr))
    }

    /// Read a pointer at a raw address (not field-based).
    pub fn read_pointer_at(&self, addr: u64) -> StructInfoResult<u64> {
        let bytes = self.read_raw(addr, self.symbols.pointer_size)?;
        Ok(decode_unsigned(&bytes, self.symbols.big_endian))
    }

    /// Create a reader for a struct at a pointer field's target address.
    pub fn deref(&self, field: &str, target_type: &str) -> StructInfoResult<StructReader<'a>> {
        let ptr = self.read_pointer(field)?;
        if ptr == 0 {
            return Err(StructInfoError::InvalidPointer(0));
        }
        StructReader::new(self.symbols, self.memory, ptr, target_type)
    }
}

/// Sign-extend a `width`-byte two's complement value to i64.
pub fn sign_extend(raw: u64, width: usize) -> i64 {
    match width {
        4 => raw as u32 as i32 as i64,
        _ => raw as i64,
    }
}

/// Resolve a self-relative offset stored at `storage_address`.
///
/// `offset` is the two's complement offset already sign-extended to 64
/// bits. A zero offset is the null pointer.
#[inline]
pub fn apply_offset_relative_to_self(offset: u64, storage_address: u64) -> u64 {
    if offset == 0 {
        0
    } else {
        storage_address.wrapping_add(offset)
    }
}
