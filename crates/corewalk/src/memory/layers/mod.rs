//! Layer implementations.
//!
//! Every layer is read-only. `SnapshotLayer` maps a flat image file,
//! `SparseMemory` assembles an image from separate blocks, and
//! `CachedAddressSpace` puts a page cache in front of either.

pub mod cached;
pub mod mmap_file;
pub mod sparse;

pub use cached::CachedAddressSpace;
pub use mmap_file::SnapshotLayer;
pub use sparse::SparseMemory;
