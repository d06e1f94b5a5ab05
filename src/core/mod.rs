//! Core domain models.
//!
//! Work packages, their owning feature record, and the dependency graph
//! that orders them.

pub mod dag;
pub mod feature;
pub mod work_package;

pub use dag::DependencyGraph;
pub use feature::{Acceptance, Feature, Workspace};
pub use work_package::{Lane, ReviewStatus, Transition, WorkPackage, WorkPackageId};
