//! Self-contained build bundles.
//!
//! A build copies the project into a [`BuildBundle`], resolves its local
//! dependencies (either from the backend's lock export or from the live
//! manifests), rewrites the bundle manifest so it no longer points outside
//! the bundle, and runs the backend's own `build` inside it.

mod bundle;
mod locked;
mod project;
mod rewrite;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use monopy_domain::{Lockfile, Manifest, ManifestDialect, PackageInclude, Project, SourceRegistry};
use serde::Serialize;

pub use bundle::BuildBundle;
pub use locked::{LockedExport, LockedResolver};
pub use project::ProjectResolver;
pub use rewrite::apply as rewrite_manifest;

use crate::config::BundleDepth;
use crate::context::WorkspaceContext;
use crate::errors::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Sdist,
    Wheel,
}

impl ArtifactFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sdist => "sdist",
            Self::Wheel => "wheel",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Pin every dependency to the version in the lockfile.
    pub locked_versions: bool,
    pub bundle_local_dependencies: bool,
    /// Overrides the workspace `bundle-depth`.
    pub bundle_depth: Option<BundleDepth>,
    pub dev_dependencies: bool,
    /// Overrides the workspace `ignore-paths`.
    pub ignore_paths: Option<Vec<String>>,
    /// Where artifacts land; `dist/<project root>` under the workspace by default.
    pub output_path: Option<PathBuf>,
    pub keep_build_folder: bool,
    pub build_folder: Option<PathBuf>,
    /// Prepare the bundle without running the backend build.
    pub skip_build: bool,
    pub format: Option<ArtifactFormat>,
}

impl Default for BuildRequest {
    fn default() -> Self {
        Self {
            locked_versions: true,
            bundle_local_dependencies: true,
            bundle_depth: None,
            dev_dependencies: false,
            ignore_paths: None,
            output_path: None,
            keep_build_folder: false,
            build_folder: None,
            skip_build: false,
            format: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutput {
    pub build_folder_path: PathBuf,
    pub output_path: PathBuf,
    pub artifacts: Vec<PathBuf>,
    /// The bundle directory still exists.
    pub retained: bool,
}

/// A dependency of the bundled manifest after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    pub name: String,
    pub spec: monopy_domain::DependencySpec,
    /// Index the dependency is served from; merged into the bundle manifest.
    pub source: Option<SourceRegistry>,
}

pub trait DependencyResolver {
    /// Dependencies the bundle manifest must declare. Bundled local
    /// dependencies are copied into `bundle` and registered on `manifest`.
    fn resolve(
        &mut self,
        project: &Project,
        bundle: &BuildBundle,
        manifest: &mut Manifest,
    ) -> Result<Vec<ResolvedDependency>>;
}

/// Backend hooks the build pipeline needs.
pub trait BuildBackend {
    fn context(&self) -> &WorkspaceContext;

    /// Requirements exported from the lock of `project`.
    fn export_locked(
        &self,
        project: &Project,
        manifest: &Manifest,
        dev: bool,
        bundle: &BuildBundle,
    ) -> Result<LockedExport>;

    /// Run the backend build inside `bundle_dir`, leaving artifacts in `dist/`.
    fn build_artifacts(&self, bundle_dir: &Path, format: Option<ArtifactFormat>) -> Result<()>;
}

/// Bundle and build `project`.
///
/// # Errors
/// Fails for invalid requests, broken manifests, unresolvable local
/// dependencies and backend failures. The bundle is removed before the
/// error propagates.
pub fn run_build(backend: &dyn BuildBackend, project: &Project, request: &BuildRequest) -> Result<BuildOutput> {
    let ctx = backend.context();
    if request.locked_versions && !request.bundle_local_dependencies {
        return Err(BackendError::Build(
            "locked versions require bundling local dependencies".to_string(),
        )
        .into());
    }

    let mut bundle = BuildBundle::create(request.build_folder.as_deref())?;
    tracing::info!(project = %project.name, folder = %bundle.path().display(), "Preparing build folder");
    let ignore = request
        .ignore_paths
        .clone()
        .unwrap_or_else(|| ctx.config().ignore_paths().to_vec());
    bundle.copy_project(&ctx.abs(&project.root), &ignore)?;

    let mut manifest = bundle.read_manifest(ctx.dialect())?;
    let resolved = if request.locked_versions {
        LockedResolver::new(backend, request.dev_dependencies).resolve(project, &bundle, &mut manifest)?
    } else {
        let depth = request.bundle_depth.unwrap_or_else(|| ctx.config().bundle_depth());
        ProjectResolver::new(ctx, request.bundle_local_dependencies, depth).resolve(project, &bundle, &mut manifest)?
    };
    rewrite::apply(&mut manifest, resolved);
    bundle.write_manifest(&manifest)?;
    bundle.clear_dist()?;

    let output_path = match &request.output_path {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => ctx.abs(path),
        None => ctx.root().join("dist").join(&project.root),
    };
    let mut artifacts = Vec::new();
    if request.skip_build {
        tracing::info!(project = %project.name, "Skipping backend build");
    } else {
        backend.build_artifacts(bundle.path(), request.format)?;
        artifacts = bundle.collect_dist(&output_path)?;
        tracing::info!(project = %project.name, output = %output_path.display(), artifacts = artifacts.len(), "Build finished");
    }
    if request.keep_build_folder || request.skip_build {
        bundle.retain();
    }
    Ok(BuildOutput {
        build_folder_path: bundle.path().to_path_buf(),
        output_path,
        artifacts,
        retained: bundle.is_retained(),
    })
}

/// Copy the packages of a local dependency into the bundle once.
pub(crate) fn include_project(
    ctx: &WorkspaceContext,
    bundle: &BuildBundle,
    manifest: &mut Manifest,
    dependency: &Project,
    visited: &mut HashSet<PathBuf>,
) -> Result<()> {
    if !visited.insert(dependency.root.clone()) {
        return Ok(());
    }
    if manifest.packages.is_empty() {
        for include in manifest.package_includes(bundle.exists(Path::new("src"))) {
            manifest.add_package(include);
        }
    }
    let dependency_manifest = ctx.manifest(dependency)?;
    let has_src_layout = ctx.tree().exists(&dependency.root.join("src"));
    for include in dependency_manifest.package_includes(has_src_layout) {
        let source = ctx.abs(&dependency.root.join(include.source_dir()));
        if !source.exists() {
            tracing::warn!(project = %dependency.name, package = %include.include, "package folder not found");
            continue;
        }
        let module = include.module().to_string();
        tracing::debug!(project = %dependency.name, module, "bundling package");
        bundle.include(&source, Path::new(&module))?;
        manifest.add_package(PackageInclude::new(module));
    }
    if manifest.dialect == ManifestDialect::Poetry {
        manifest.merge_plugins(&dependency_manifest.plugins);
    }
    Ok(())
}

/// The project rooted at `path`: absolute, or relative to the
/// workspace-relative `base`.
pub(crate) fn project_at<'a>(
    ctx: &'a WorkspaceContext,
    base: &Path,
    path: &str,
) -> Result<&'a Project> {
    let location = Path::new(path);
    let relative = if location.is_absolute() {
        location.strip_prefix(ctx.root()).ok().map(Path::to_path_buf)
    } else {
        Some(base.join(location))
    };
    relative
        .and_then(|relative| ctx.registry().find_by_root(&relative))
        .ok_or_else(|| {
            BackendError::UnresolvableLocalDependency {
                location: path.to_string(),
            }
            .into()
        })
}

/// Lockfile used to classify exported requirements of `project`.
pub(crate) fn lock_for(ctx: &WorkspaceContext, project: &Project) -> Result<Option<Lockfile>> {
    let own = project.root.join(monopy_domain::lock_file_name(ctx.dialect()));
    match Lockfile::read(ctx.tree(), &own, ctx.dialect())? {
        Some(lock) => Ok(Some(lock)),
        None => ctx.root_lockfile(),
    }
}
