use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use indexmap::IndexMap;
use monopy_domain::manifest::parse_requirement;
use monopy_domain::{
    canonicalize_package_name, parse_export, DependencySpec, ExportLocation, ExportedRequirement,
    GitSpec, LockedDependency, LockedSource, Lockfile, Manifest, ManifestDialect, Project,
    RegistrySpec,
};

use super::{include_project, project_at, BuildBackend, BuildBundle, DependencyResolver, ResolvedDependency};
use crate::errors::BackendError;

/// Output of a backend lock export.
#[derive(Debug, Clone)]
pub struct LockedExport {
    /// `requirements.txt` text.
    pub text: String,
    /// Lockfile that classifies each exported package, when available.
    pub lock: Option<Lockfile>,
    /// Workspace-relative directory that relative paths resolve against.
    pub base_dir: PathBuf,
}

/// Pins every dependency to the version recorded in the lockfile and
/// bundles every local directory dependency.
pub struct LockedResolver<'a> {
    backend: &'a dyn BuildBackend,
    dev: bool,
    visited: HashSet<PathBuf>,
}

impl<'a> LockedResolver<'a> {
    #[must_use]
    pub fn new(backend: &'a dyn BuildBackend, dev: bool) -> Self {
        Self {
            backend,
            dev,
            visited: HashSet::new(),
        }
    }

    fn bundle_location(
        &mut self,
        export: &LockedExport,
        path: &str,
        bundle: &BuildBundle,
        manifest: &mut Manifest,
    ) -> Result<()> {
        let ctx = self.backend.context();
        let dependency = project_at(ctx, &export.base_dir, path)?.clone();
        tracing::debug!(project = %dependency.name, "bundling locked local dependency");
        include_project(ctx, bundle, manifest, &dependency, &mut self.visited)
    }

    fn classify(
        &mut self,
        project: &Project,
        export: &LockedExport,
        requirement: ExportedRequirement,
        bundle: &BuildBundle,
        manifest: &mut Manifest,
    ) -> Result<Option<ResolvedDependency>> {
        let locked = requirement
            .name
            .as_deref()
            .and_then(|name| export.lock.as_ref()?.package(name));
        if let Some(package) = locked {
            match &package.source {
                LockedSource::Registry => {}
                LockedSource::Git { url, reference } => {
                    return Ok(Some(git_dependency(&requirement, url, reference.as_deref(), package.optional)));
                }
                source @ (LockedSource::Directory { .. }
                | LockedSource::Editable { .. }
                | LockedSource::Virtual { .. }) => {
                    let path = match &requirement.location {
                        Some(ExportLocation::Path(path)) => path.clone(),
                        _ => source.local_path().unwrap_or_default().to_string(),
                    };
                    self.bundle_location(export, &path, bundle, manifest)?;
                    return Ok(None);
                }
                LockedSource::Other { kind } => {
                    return Err(BackendError::Build(format!(
                        "{} uses unsupported source type `{kind}` (required by {})",
                        package.name, project.name
                    ))
                    .into());
                }
            }
        }

        match &requirement.location {
            Some(ExportLocation::Path(path)) => {
                self.bundle_location(export, path, bundle, manifest)?;
                Ok(None)
            }
            Some(ExportLocation::Url(url)) => {
                let Some(git) = url.strip_prefix("git+") else {
                    return Err(BackendError::Build(format!("unsupported direct reference `{url}`")).into());
                };
                let (url, reference) = match git.rsplit_once('@') {
                    Some((url, reference)) if !reference.contains('/') => (url, Some(reference)),
                    _ => (git, None),
                };
                Ok(Some(git_dependency(&requirement, url, reference, false)))
            }
            None => {
                let Some(name) = requirement.name.clone() else {
                    return Ok(None);
                };
                let Some(version) = requirement.version.clone() else {
                    return Err(BackendError::Build(format!("{name} has no locked version")).into());
                };
                let constraint = match manifest.dialect {
                    ManifestDialect::Poetry => version,
                    ManifestDialect::Uv => format!("=={version}"),
                };
                Ok(Some(ResolvedDependency {
                    name,
                    spec: DependencySpec::Registry(RegistrySpec {
                        constraint: Some(constraint),
                        extras: requirement.extras,
                        markers: requirement.markers,
                        optional: locked.is_some_and(|package| package.optional),
                        source: None,
                    }),
                    source: None,
                }))
            }
        }
    }

    /// Extras rebuilt from the lock tree, local packages left out.
    fn locked_extras(
        &mut self,
        project: &Project,
        export: &LockedExport,
        bundle: &BuildBundle,
        manifest: &mut Manifest,
    ) -> Result<IndexMap<String, Vec<String>>> {
        if manifest.extras.is_empty() {
            return Ok(IndexMap::new());
        }
        let Some(lock) = export.lock.as_ref() else {
            return Err(BackendError::Build(format!(
                "{} declares extras but has no lockfile",
                project.name
            ))
            .into());
        };
        let exclude: HashSet<String> = manifest
            .package_name
            .iter()
            .map(|name| canonicalize_package_name(name))
            .collect();
        let mut rebuilt = IndexMap::new();
        for (extra, requirements) in manifest.extras.clone() {
            let roots: Vec<LockedDependency> = requirements
                .iter()
                .filter_map(|raw| parse_requirement(raw))
                .map(|parsed| LockedDependency {
                    name: parsed.name,
                    extras: parsed.extras,
                })
                .collect();
            let mut entries = Vec::new();
            for package in lock.closure(&roots, &exclude) {
                if let Some(path) = package.source.local_path() {
                    self.bundle_location(export, path, bundle, manifest)?;
                    continue;
                }
                match manifest.dialect {
                    ManifestDialect::Poetry if package.optional => entries.push(package.name.clone()),
                    ManifestDialect::Poetry => {}
                    ManifestDialect::Uv => match &package.version {
                        Some(version) => entries.push(format!("{}=={version}", package.name)),
                        None => entries.push(package.name.clone()),
                    },
                }
            }
            rebuilt.insert(extra, entries);
        }
        Ok(rebuilt)
    }
}

impl DependencyResolver for LockedResolver<'_> {
    fn resolve(
        &mut self,
        project: &Project,
        bundle: &BuildBundle,
        manifest: &mut Manifest,
    ) -> Result<Vec<ResolvedDependency>> {
        let export = self.backend.export_locked(project, manifest, self.dev, bundle)?;
        let mut resolved: Vec<ResolvedDependency> = Vec::new();
        for requirement in parse_export(&export.text) {
            if let Some(dependency) = self.classify(project, &export, requirement, bundle, manifest)? {
                let key = canonicalize_package_name(&dependency.name);
                if !resolved
                    .iter()
                    .any(|existing| canonicalize_package_name(&existing.name) == key)
                {
                    resolved.push(dependency);
                }
            }
        }
        let extras = self.locked_extras(project, &export, bundle, manifest)?;
        manifest.extras = extras;
        tracing::debug!(project = %project.name, dependencies = resolved.len(), "resolved locked dependencies");
        Ok(resolved)
    }
}

fn git_dependency(
    requirement: &ExportedRequirement,
    url: &str,
    reference: Option<&str>,
    optional: bool,
) -> ResolvedDependency {
    let name = requirement.name.clone().unwrap_or_default();
    ResolvedDependency {
        name,
        spec: DependencySpec::Git(GitSpec {
            url: url.to_string(),
            rev: reference
                .filter(|reference| *reference != "HEAD")
                .map(ToString::to_string),
            extras: requirement.extras.clone(),
            markers: requirement.markers.clone(),
            optional,
        }),
        source: None,
    }
}
