//! Dependency model: version comparison and constraint evaluation.
//!
//! The planner consumes this module to decide whether installed or
//! candidate versions satisfy dependency edges and to order upgrades.

pub mod constraint;
pub mod version;

pub use constraint::{ConstraintOp, VersionConstraint};
pub use version::compare_versions;
