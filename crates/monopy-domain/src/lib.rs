#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod graph;
pub mod imports;
pub mod lockfile;
pub mod manifest;
pub mod requirements;
pub mod sources;
pub mod store;
pub mod workspace;

pub use graph::{
    dependency_order, DependencyEdge, EdgeKind, GraphOptions, LocalDependency, WorkspaceGraph,
};
pub use imports::ImportScanner;
pub use lockfile::{
    lock_file_name, LockedDependency, LockedPackage, LockedRequirement, LockedSource, Lockfile,
    POETRY_LOCK, UV_LOCK,
};
pub use manifest::{
    canonicalize_package_name, module_name, normalize_relative, relative_path, DependencyLayout,
    DependencySpec, GitSpec, LocalPathSpec, Manifest, ManifestDialect, ManifestError,
    PackageInclude, ProjectSettings, RegistrySpec, WorkspaceSettings, WorkspaceSpec,
    MAIN_GROUP, MANIFEST_FILE,
};
pub use requirements::{parse_export, parse_export_line, ExportLocation, ExportedRequirement};
pub use sources::{hashed_name, SourceRegistry, SourceRegistryMerger};
pub use store::{DiskTree, ManifestStore, MemoryTree, WorkspaceTree, SKIPPED_DIRS};
pub use workspace::{
    discover_projects, discover_workspace_root, Project, ProjectRegistry, WORKSPACE_ROOT_NAME,
};
