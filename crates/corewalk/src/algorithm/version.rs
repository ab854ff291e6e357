//! Algorithm versions declared by the target build.
//!
//! The runtime records, in its structure-description blob, an integer
//! version for every internal layout that has changed incompatibly over
//! time. Readers consult these through an [`AlgorithmVersions`] registry
//! owned by the session.

use crate::error::{WalkError, WalkResult};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use structinfo::{BlobSymbols, StructInfoError};
use tracing::{debug, info};

/// Blob type whose constants carry the version entries.
pub const ALGORITHM_VERSIONS_TYPE: &str = "AlgorithmVersions";

/// Constant naming the VM major version.
pub const VM_MAJOR_VERSION: &str = "VM_MAJOR_VERSION";

/// Constant naming the VM minor version.
pub const VM_MINOR_VERSION: &str = "VM_MINOR_VERSION";

/// Defaults used until (or unless) the target says otherwise.
pub const DEFAULT_VM_MAJOR: u32 = 2;
pub const DEFAULT_VM_MINOR: u32 = 90;

/// Logical structures whose layout is versioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmId {
    HashTable,
    Pool,
    AvlTree,
}

impl AlgorithmId {
    pub const ALL: [AlgorithmId; 3] = [AlgorithmId::HashTable, AlgorithmId::Pool, AlgorithmId::AvlTree];

    /// The constant name the target uses for this identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            AlgorithmId::HashTable => "HASH_TABLE_VERSION",
            AlgorithmId::Pool => "POOL_VERSION",
            AlgorithmId::AvlTree => "AVL_TREE_VERSION",
        }
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlgorithmId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("unknown algorithm identifier: {}", s))
    }
}

/// The layout version of one logical structure in one target build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmVersion {
    pub vm_major: u32,
    pub vm_minor: u32,
    pub algorithm_version: u32,
}

impl Default for AlgorithmVersion {
    fn default() -> Self {
        AlgorithmVersion {
            vm_major: DEFAULT_VM_MAJOR,
            vm_minor: DEFAULT_VM_MINOR,
            algorithm_version: 0,
        }
    }
}

/// Registry of algorithm versions for one target.
#[derive(Debug, Clone)]
pub struct AlgorithmVersions {
    vm_major: u32,
    vm_minor: u32,
    versions: HashMap<String, u32>,
}

impl Default for AlgorithmVersions {
    fn default() -> Self {
        AlgorithmVersions {
            vm_major: DEFAULT_VM_MAJOR,
            vm_minor: DEFAULT_VM_MINOR,
            versions: HashMap::new(),
        }
    }
}

impl AlgorithmVersions {
    /// Build a registry from named constants.
    ///
    /// `VM_MAJOR_VERSION` / `VM_MINOR_VERSION` set the VM pair; every other
    /// name ending in `_VERSION` is an algorithm entry; the rest is ignored.
    pub fn from_constants<'c>(constants: impl IntoIterator<Item = (&'c str, i64)>) -> Self {
        let mut registry = AlgorithmVersions::default();
        for (name, value) in constants {
            let Ok(value) = u32::try_from(value) else {
                debug!("Ignoring out-of-range version constant {}={}", name, value);
                continue;
            };
            match name {
                VM_MAJOR_VERSION => registry.vm_major = value,
                VM_MINOR_VERSION => registry.vm_minor = value,
                n if n.ends_with("_VERSION") => {
                    registry.versions.insert(n.to_string(), value);
                }
                _ => {}
            }
        }
        registry
    }

    /// Read the registry from the target's blob.
    pub fn try_load(blob: &BlobSymbols) -> WalkResult<Self> {
        let constants = blob.constants_of(ALGORITHM_VERSIONS_TYPE).ok_or_else(|| {
            WalkError::Metadata(StructInfoError::TypeNotFound(
                ALGORITHM_VERSIONS_TYPE.to_string(),
            ))
        })?;
        Ok(Self::from_constants(
            constants.iter().map(|(name, &value)| (name.as_str(), value)),
        ))
    }

    /// Read the registry from the target's blob, falling back to defaults.
    ///
    /// A missing or unusable version table only means every reader uses its
    /// version-0 layout; it never fails the session.
    pub fn load(blob: &BlobSymbols) -> Self {
        match Self::try_load(blob) {
            Ok(registry) => {
                info!(
                    "Loaded {} algorithm versions (vm {}.{})",
                    registry.versions.len(),
                    registry.vm_major,
                    registry.vm_minor
                );
                registry
            }
            Err(e) => {
                debug!("Using default algorithm versions: {}", e);
                AlgorithmVersions::default()
            }
        }
    }

    /// Version of `id`; version 0 when the target never declared it.
    pub fn get_version_of(&self, id: &str) -> AlgorithmVersion {
        AlgorithmVersion {
            vm_major: self.vm_major,
            vm_minor: self.vm_minor,
            algorithm_version: self.versions.get(id).copied().unwrap_or(0),
        }
    }

    /// Number of algorithm entries (VM pair excluded).
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
