use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use monopy_domain::{
    canonicalize_package_name, DependencySpec, Manifest, ManifestDialect, Project, RegistrySpec,
};

use super::{include_project, BuildBundle, DependencyResolver, ResolvedDependency};
use crate::config::BundleDepth;
use crate::context::WorkspaceContext;
use crate::errors::BackendError;

/// Resolves from the live manifests: local dependencies are either copied
/// into the bundle or pinned to the version their manifest declares.
pub struct ProjectResolver<'a> {
    ctx: &'a WorkspaceContext,
    bundle_local: bool,
    depth: BundleDepth,
    visited: HashSet<PathBuf>,
    resolved: Vec<ResolvedDependency>,
}

impl<'a> ProjectResolver<'a> {
    #[must_use]
    pub fn new(ctx: &'a WorkspaceContext, bundle_local: bool, depth: BundleDepth) -> Self {
        Self {
            ctx,
            bundle_local,
            depth,
            visited: HashSet::new(),
            resolved: Vec::new(),
        }
    }

    fn push(&mut self, dependency: ResolvedDependency) {
        let key = canonicalize_package_name(&dependency.name);
        if self
            .resolved
            .iter()
            .any(|existing| canonicalize_package_name(&existing.name) == key)
        {
            return;
        }
        self.resolved.push(dependency);
    }

    /// A project reached again within the bundle depth replaces its pin.
    fn unpin(&mut self, package: &str) {
        let key = canonicalize_package_name(package);
        self.resolved
            .retain(|existing| canonicalize_package_name(&existing.name) != key);
    }

    fn walk(
        &mut self,
        owner: &Project,
        owner_manifest: &Manifest,
        level: usize,
        bundle: &BuildBundle,
        manifest: &mut Manifest,
    ) -> Result<()> {
        let graph = self.ctx.graph(None);
        for (name, spec) in &owner_manifest.dependencies {
            if !spec.is_local() {
                let source = match spec {
                    DependencySpec::Registry(RegistrySpec {
                        source: Some(source),
                        ..
                    }) => owner_manifest
                        .sources
                        .iter()
                        .find(|declared| &declared.name == source)
                        .cloned(),
                    _ => None,
                };
                self.push(ResolvedDependency {
                    name: name.clone(),
                    spec: spec.clone(),
                    source,
                });
                continue;
            }
            let Some(target) = graph.resolve_local(owner, owner_manifest, name, spec) else {
                return Err(BackendError::UnresolvableLocalDependency {
                    location: spec.local_path().unwrap_or(name).to_string(),
                }
                .into());
            };
            let target = target.clone();
            let target_manifest = self.ctx.manifest(&target)?;
            let bundled = (self.bundle_local && self.depth.allows(level))
                || !target_manifest.settings.publishable();
            if bundled {
                if self.visited.contains(&target.root) {
                    continue;
                }
                let package = target_manifest.package_name.as_deref().unwrap_or(name);
                self.unpin(package);
                tracing::debug!(project = %target.name, level, "bundling local dependency");
                include_project(self.ctx, bundle, manifest, &target, &mut self.visited)?;
                self.walk(&target, &target_manifest, level + 1, bundle, manifest)?;
                continue;
            }
            if self.visited.contains(&target.root) {
                continue;
            }
            self.push(pinned(name, spec, &target, &target_manifest)?);
        }
        Ok(())
    }
}

impl DependencyResolver for ProjectResolver<'_> {
    fn resolve(
        &mut self,
        project: &Project,
        bundle: &BuildBundle,
        manifest: &mut Manifest,
    ) -> Result<Vec<ResolvedDependency>> {
        self.visited.insert(project.root.clone());
        let live = self.ctx.manifest(project)?;
        self.walk(project, &live, 1, bundle, manifest)?;
        Ok(std::mem::take(&mut self.resolved))
    }
}

/// A local dependency that stays external, pinned to its published version.
fn pinned(
    name: &str,
    spec: &DependencySpec,
    target: &Project,
    target_manifest: &Manifest,
) -> Result<ResolvedDependency> {
    let Some(version) = target_manifest.version.clone() else {
        return Err(BackendError::Build(format!(
            "{} has no version to pin; bundle it or declare a version",
            target.name
        ))
        .into());
    };
    let constraint = match target_manifest.dialect {
        ManifestDialect::Poetry => version,
        ManifestDialect::Uv => format!("=={version}"),
    };
    let source = target_manifest.settings.custom_source.clone();
    let package = target_manifest.package_name.clone().unwrap_or_else(|| name.to_string());
    tracing::debug!(project = %target.name, constraint, "pinning local dependency");
    Ok(ResolvedDependency {
        name: package,
        spec: DependencySpec::Registry(RegistrySpec {
            constraint: Some(constraint),
            extras: spec.extras().to_vec(),
            markers: None,
            optional: match spec {
                DependencySpec::LocalPath(local) => local.optional,
                DependencySpec::Workspace(workspace) => workspace.optional,
                DependencySpec::Registry(_) | DependencySpec::Git(_) => false,
            },
            source: source.as_ref().map(|source| source.name.clone()),
        }),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    use monopy_domain::{DiskTree, PackageInclude};
    use tempfile::tempdir;

    use super::*;
    use crate::config::Config;
    use crate::testing::FakeRunner;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent");
        }
        fs::write(path, contents).expect("write");
    }

    fn poetry_project(root: &Path, folder: &str, name: &str, dependencies: &[&str]) {
        let mut manifest = format!(
            "[tool.poetry]\nname = \"{name}\"\nversion = \"1.0.0\"\n\n[tool.poetry.dependencies]\n"
        );
        for dependency in dependencies {
            manifest.push_str(&format!(
                "{dependency} = {{ path = \"../{dependency}\", develop = true }}\n"
            ));
        }
        write(root, &format!("{folder}/pyproject.toml"), &manifest);
        write(root, &format!("{folder}/{name}/__init__.py"), "");
    }

    fn resolve(root: &Path, depth: BundleDepth) -> (Vec<ResolvedDependency>, Manifest) {
        let ctx = WorkspaceContext::new(
            root,
            Arc::new(DiskTree::new(root)),
            Arc::new(FakeRunner::default()),
            Config::default(),
        )
        .expect("context");
        let project = ctx.project("a").expect("a").clone();
        let bundle = BuildBundle::create(Some(&root.join("bundle"))).expect("bundle");
        bundle.copy_project(&ctx.abs(&project.root), &[]).expect("copy");
        let mut manifest = bundle.read_manifest(ctx.dialect()).expect("manifest");
        let resolved = ProjectResolver::new(&ctx, true, depth)
            .resolve(&project, &bundle, &mut manifest)
            .expect("resolve");
        (resolved, manifest)
    }

    fn names(resolved: &[ResolvedDependency]) -> Vec<&str> {
        resolved.iter().map(|dependency| dependency.name.as_str()).collect()
    }

    #[test]
    fn shared_dependency_is_bundled_once_within_depth() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        poetry_project(root, "libs/a", "a", &["b", "c"]);
        poetry_project(root, "libs/b", "b", &["c"]);
        poetry_project(root, "libs/c", "c", &[]);

        let (resolved, manifest) = resolve(root, BundleDepth::Levels(1));
        assert!(names(&resolved).is_empty(), "{:?}", names(&resolved));
        assert_eq!(
            manifest.packages,
            vec![PackageInclude::new("a"), PackageInclude::new("b"), PackageInclude::new("c")]
        );
    }

    #[test]
    fn dependency_beyond_depth_is_pinned_not_copied() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        poetry_project(root, "libs/a", "a", &["b"]);
        poetry_project(root, "libs/b", "b", &["c"]);
        poetry_project(root, "libs/c", "c", &[]);

        let (resolved, manifest) = resolve(root, BundleDepth::Levels(1));
        assert_eq!(names(&resolved), vec!["c"]);
        assert!(matches!(
            &resolved[0].spec,
            DependencySpec::Registry(spec) if spec.constraint.as_deref() == Some("1.0.0")
        ));
        assert!(!root.join("bundle/c").exists());
        assert_eq!(
            manifest.packages,
            vec![PackageInclude::new("a"), PackageInclude::new("b")]
        );
    }

    #[test]
    fn bundled_dependency_is_not_pinned_when_reached_again() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        poetry_project(root, "libs/a", "a", &["c", "b"]);
        poetry_project(root, "libs/b", "b", &["c"]);
        poetry_project(root, "libs/c", "c", &[]);

        let (resolved, manifest) = resolve(root, BundleDepth::Levels(1));
        assert!(names(&resolved).is_empty(), "{:?}", names(&resolved));
        assert!(root.join("bundle/c/__init__.py").is_file());
        assert_eq!(
            manifest.packages,
            vec![PackageInclude::new("a"), PackageInclude::new("c"), PackageInclude::new("b")]
        );
    }
}
