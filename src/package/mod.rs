//! Package model: versions, constraints, manifests and the local layout.

mod constraint;
mod manifest;
mod repository;
pub mod version;

pub use constraint::{DependencyConstraint, parse_dependency_list};
pub use manifest::{ManifestError, ManifestFormat, PackageManifest, Target, UpdateManifest};
pub use repository::{DEFAULT_ROOT, DEPENDENCIES_FILE, PackageRepository};
pub use version::Operator;
