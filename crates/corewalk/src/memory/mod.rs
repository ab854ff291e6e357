//! Concrete memory sources implementing [`structinfo::AddressSpace`].

pub mod error;
pub mod layers;

pub use error::{MemoryError, MemoryResult};
pub use layers::{CachedAddressSpace, SnapshotLayer, SparseMemory};
