//! One-time selection of a layout implementation.

use crate::algorithm::version::AlgorithmVersions;
use crate::error::{WalkError, WalkResult};
use tracing::debug;

/// A concrete reader implementation for one version of one layout.
pub trait Algorithm: Copy + std::fmt::Debug {
    /// VM minor version this implementation was written against.
    fn vm_minor(&self) -> u32;

    /// Algorithm version this implementation decodes.
    fn algorithm_version(&self) -> u32;
}

/// Return the first candidate whose `(vm_minor, algorithm_version)` equals
/// the version the target declares for `id`.
///
/// No match fails with [`WalkError::Unsupported`]: a guessed layout would
/// produce confidently wrong answers.
pub fn pick_algorithm<A: Algorithm>(
    versions: &AlgorithmVersions,
    id: &str,
    candidates: impl IntoIterator<Item = A>,
) -> WalkResult<A> {
    let wanted = versions.get_version_of(id);
    let picked = candidates.into_iter().find(|candidate| {
        candidate.vm_minor() == wanted.vm_minor
            && candidate.algorithm_version() == wanted.algorithm_version
    });

    match picked {
        Some(algorithm) => {
            debug!("Picked {:?} for {}", algorithm, id);
            Ok(algorithm)
        }
        None => Err(WalkError::Unsupported {
            id: id.to_string(),
            vm_minor: wanted.vm_minor,
            algorithm_version: wanted.algorithm_version,
        }),
    }
}
