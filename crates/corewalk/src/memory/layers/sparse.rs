//! Sparse in-memory address space.
//!
//! Holds a set of non-overlapping mapped blocks. Anything between blocks is
//! unreadable, which makes it the natural source for partial images and for
//! synthetic targets in tests.

use crate::memory::error::MemoryError;
use std::collections::BTreeMap;
use structinfo::{AccessError, AddressSpace};

/// An address space assembled from separately mapped blocks.
#[derive(Default)]
pub struct SparseMemory {
    name: String,
    /// Block start address -> block contents.
    blocks: BTreeMap<u64, Vec<u8>>,
}

impl SparseMemory {
    pub fn new(name: impl Into<String>) -> Self {
        SparseMemory {
            name: name.into(),
            blocks: BTreeMap::new(),
        }
    }

    /// Map `bytes` at `address`, replacing whatever overlapped that range.
    pub fn map(&mut self, address: u64, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.unmap(address, bytes.len() as u64);
        self.blocks.insert(address, bytes.to_vec());
    }

    /// Map `length` zero bytes at `address`.
    pub fn map_zeroed(&mut self, address: u64, length: usize) {
        self.map(address, &vec![0u8; length]);
    }

    /// Overwrite bytes inside an already-mapped range.
    ///
    /// Bytes that fall outside any block are mapped as a new block.
    pub fn write(&mut self, address: u64, bytes: &[u8]) {
        let fits = self
            .block_containing(address)
            .map(|(start, block)| address - start + bytes.len() as u64 <= block.len() as u64)
            .unwrap_or(false);
        if !fits {
            self.map(address, bytes);
            return;
        }
        if let Some((&start, block)) = self.blocks.range_mut(..=address).next_back() {
            let offset = (address - start) as usize;
            block[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
    }

    /// Make `[address, address+length)` unreadable, splitting blocks as needed.
    pub fn unmap(&mut self, address: u64, length: u64) {
        // `None` runs to the top of the address space.
        let end = address.checked_add(length);
        let overlapping: Vec<u64> = self
            .blocks
            .iter()
            .take_while(|&(&start, _)| end.map_or(true, |end| start < end))
            .filter(|&(&start, block)| start >= address || address - start < block.len() as u64)
            .map(|(&start, _)| start)
            .collect();

        for start in overlapping {
            let Some(block) = self.blocks.remove(&start) else {
                continue;
            };
            if start < address {
                self.blocks
                    .insert(start, block[..(address - start) as usize].to_vec());
            }
            if let Some(end) = end.filter(|&end| block.len() as u64 > end - start) {
                self.blocks
                    .insert(end, block[(end - start) as usize..].to_vec());
            }
        }
    }

    /// Number of mapped blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn block_containing(&self, address: u64) -> Option<(u64, &Vec<u8>)> {
        self.blocks
            .range(..=address)
            .next_back()
            .filter(|&(&start, block)| address - start < block.len() as u64)
            .map(|(&start, block)| (start, block))
    }

    fn read_bytes(&self, address: u64, length: usize) -> Result<Vec<u8>, MemoryError> {
        let mut out = Vec::with_capacity(length);
        let mut cursor = address;
        while out.len() < length {
            let (start, block) = self.block_containing(cursor).ok_or_else(|| {
                MemoryError::invalid_address(&self.name, cursor, "address is not mapped")
            })?;
            let offset = (cursor - start) as usize;
            let take = (block.len() - offset).min(length - out.len());
            out.extend_from_slice(&block[offset..offset + take]);
            cursor = cursor.wrapping_add(take as u64);
        }
        Ok(out)
    }
}

impl AddressSpace for SparseMemory {
    fn read(&self, address: u64, length: usize) -> Result<Vec<u8>, AccessError> {
        self.read_bytes(address, length)
            .map_err(|e| Box::new(e) as AccessError)
    }

    fn is_valid(&self, address: u64, length: u64) -> bool {
        length > 0 && self.read_bytes(address, length as usize).is_ok()
    }
}
