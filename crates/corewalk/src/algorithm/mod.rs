//! Algorithm-version registry and implementation picking.

pub mod picker;
pub mod version;

pub use picker::{pick_algorithm, Algorithm};
pub use version::{AlgorithmId, AlgorithmVersion, AlgorithmVersions};
