//! Memory-mapped snapshot layer.
//!
//! Maps a flat dump of a contiguous region of the target (for example a
//! heap segment extracted from a core file) read-only, and serves it at the
//! address the region occupied in the target.

use crate::memory::error::{MemoryError, MemoryResult};
use memmap2::{Mmap, MmapOptions};
use parking_lot::RwLock;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use structinfo::{AccessError, AddressSpace};

/// Internal state for the memory-mapped layer.
struct MmapState {
    /// Read-only memory map; `None` for an empty file.
    mmap: Option<Mmap>,
    /// File size.
    size: u64,
}

impl MmapState {
    fn as_slice(&self) -> &[u8] {
        match self.mmap {
            Some(ref mmap) => mmap.as_ref(),
            None => &[],
        }
    }
}

/// A read-only memory-mapped snapshot of one target region.
///
/// # Thread Safety
///
/// The mapping is guarded by a `parking_lot::RwLock` so that `destroy` can
/// release it while other holders of the layer still exist.
///
/// # Example
///
/// ```rust,ignore
/// use corewalk::memory::SnapshotLayer;
///
/// let layer = SnapshotLayer::open("heap", "/tmp/segment.bin", 0x7f00_0000_0000)?;
/// let header = layer.read_bytes(0x7f00_0000_0040, 64, false)?;
/// ```
pub struct SnapshotLayer {
    /// Layer name.
    name: String,
    /// File location (file:// URL or path).
    location: String,
    /// Target address of the first byte of the file.
    base_address: u64,
    /// The memory-mapped state; `None` once destroyed.
    state: Option<Arc<RwLock<MmapState>>>,
}

// ---------------------------------------------------------------------------
// Always-available helpers
// ---------------------------------------------------------------------------
impl SnapshotLayer {
    /// Parse a file:// URL to a path.
    fn parse_location(location: &str) -> PathBuf {
        let path_str = match location.strip_prefix("file://") {
            Some(url_path) => {
                // file:///C:/path -> C:/path
                if url_path.starts_with('/')
                    && url_path.len() > 2
                    && url_path.chars().nth(2) == Some(':')
                {
                    &url_path[1..]
                } else {
                    url_path
                }
            }
            None => location,
        };

        PathBuf::from(urlencoding_decode(path_str))
    }

    /// Create the memory map for the file.
    fn create_mmap(path: &PathBuf) -> MemoryResult<MmapState> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        if size == 0 {
            return Ok(MmapState { mmap: None, size: 0 });
        }

        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(MmapState {
            mmap: Some(mmap),
            size,
        })
    }

    /// Get the state, returning an error if destroyed.
    fn get_state(&self) -> MemoryResult<&Arc<RwLock<MmapState>>> {
        self.state
            .as_ref()
            .ok_or_else(|| MemoryError::layer_destroyed(&self.name))
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------
impl SnapshotLayer {
    /// Map a snapshot file so that its first byte appears at `base_address`.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the layer
    /// * `path` - File location (file:// URL or plain filesystem path)
    /// * `base_address` - Target address of the file's first byte
    pub fn open(
        name: impl Into<String>,
        path: impl Into<String>,
        base_address: u64,
    ) -> MemoryResult<Self> {
        let name = name.into();
        let location = path.into();
        let resolved = Self::parse_location(&location);
        let state = Self::create_mmap(&resolved)?;

        tracing::debug!(
            "Mapped snapshot '{}' ({} bytes) at {:#x}",
            location,
            state.size,
            base_address
        );

        Ok(SnapshotLayer {
            name,
            location,
            base_address,
            state: Some(Arc::new(RwLock::new(state))),
        })
    }

    /// Read bytes from the layer.
    ///
    /// # Arguments
    ///
    /// * `address` - Target address to read from
    /// * `length` - Number of bytes to read
    /// * `pad` - If true, pad with zeros for out-of-range reads; otherwise return an error
    pub fn read_bytes(&self, address: u64, length: usize, pad: bool) -> MemoryResult<Vec<u8>> {
        let state = self.get_state()?;
        let state_guard = state.read();

        let data = state_guard.as_slice();
        let size = state_guard.size;

        let offset = match address.checked_sub(self.base_address) {
            Some(offset) if offset < size || (offset == size && length == 0) => offset,
            _ => {
                if pad {
                    return Ok(vec![0u8; length]);
                }
                return Err(MemoryError::invalid_address(
                    &self.name,
                    address,
                    "Address outside of the snapshot boundaries",
                ));
            }
        };

        let start = offset as usize;
        let available = (size - offset) as usize;

        if length <= available {
            Ok(data[start..start + length].to_vec())
        } else if pad {
            let mut result = Vec::with_capacity(length);
            result.extend_from_slice(&data[start..]);
            result.resize(length, 0);
            Ok(result)
        } else {
            Err(MemoryError::invalid_address(
                &self.name,
                address + available as u64,
                "Could not read sufficient bytes from the snapshot",
            ))
        }
    }

    /// Check if an address range is covered by the snapshot.
    pub fn is_valid(&self, address: u64, length: u64) -> bool {
        if length == 0 {
            return false;
        }

        let state = match self.get_state() {
            Ok(s) => s,
            Err(_) => return false,
        };
        let size = state.read().size;

        match address.checked_sub(self.base_address) {
            Some(offset) => offset
                .checked_add(length)
                .map(|end| end <= size)
                .unwrap_or(false),
            None => false,
        }
    }

    /// Destroy the layer, releasing the mapping.
    pub fn destroy(&mut self) {
        self.state = None;
    }

    /// Maximum valid address.
    pub fn maximum_address(&self) -> MemoryResult<u64> {
        let state = self.get_state()?;
        let size = state.read().size;
        Ok(self.base_address + size.saturating_sub(1))
    }

    /// Minimum valid address.
    pub fn minimum_address(&self) -> u64 {
        self.base_address
    }

    /// The file location.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The layer name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AddressSpace for SnapshotLayer {
    fn read(&self, address: u64, length: usize) -> Result<Vec<u8>, AccessError> {
        self.read_bytes(address, length, false)
            .map_err(|e| Box::new(e) as AccessError)
    }

    fn is_valid(&self, address: u64, length: u64) -> bool {
        SnapshotLayer::is_valid(self, address, length)
    }
}

/// Simple URL decoding for file paths.
fn urlencoding_decode(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            if hex.len() == 2 {
                if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                    result.push(byte as char);
                    continue;
                }
            }
            result.push('%');
            result.push_str(&hex);
        } else {
            result.push(c);
        }
    }

    result
}
