//! corewalk: versioned readers for a managed runtime's internal containers.
//!
//! Given a read-only [`structinfo::AddressSpace`] over a live process or a
//! crash snapshot, and the runtime's structure-description blob, this crate
//! reconstructs hash tables, AVL trees and puddle pools well enough to look
//! entries up and enumerate them, skipping and reporting whatever part of
//! the image is damaged.
//!
//! Every reader is built from a [`Session`], which owns the target, the
//! blob, the [`CorruptDataReporter`] and the algorithm-version registry
//! used to pick the layout each reader decodes.
//!
//! ```rust,ignore
//! use corewalk::{ElementStorage, HashTableReader, Session};
//!
//! let session = Session::new(memory, blob);
//! let table = HashTableReader::with_equal(
//!     &session,
//!     table_addr,
//!     ElementStorage::Boxed,
//!     |s, addr| s.read_pointer(addr),
//!     |key| Ok(*key >> 3),
//!     |a, b| Ok(a == b),
//! )?;
//! for class in table.iter() {
//!     println!("{:#x}", class);
//! }
//! ```

pub mod algorithm;
pub mod avl;
pub mod corrupt;
pub mod error;
pub mod hashtable;
pub mod memory;
pub mod pool;
pub mod session;
pub mod tagged;

#[cfg(test)]
mod testutil;

pub use algorithm::{pick_algorithm, Algorithm, AlgorithmId, AlgorithmVersion, AlgorithmVersions};
pub use avl::{AvlTree, AvlTreeAlgorithm, AvlTreeReader};
pub use corrupt::{Anomaly, CollectingReporter, CorruptDataReporter, Severity, TracingReporter};
pub use error::{WalkError, WalkResult};
pub use hashtable::{BackingStore, ElementStorage, HashTableAlgorithm, HashTableHeader, HashTableReader};
pub use pool::{Pool, PoolAlgorithm, PoolConfig, PoolReader, Puddle};
pub use session::Session;
