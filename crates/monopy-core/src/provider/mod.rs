//! Backend strategies.
//!
//! A [`Provider`] wraps one package manager CLI (Poetry or uv) behind the
//! operations the workspace commands need. Providers hold no mutable state;
//! every call reads the current manifests through the shared
//! [`WorkspaceContext`].

mod backend;
mod cascade;
mod poetry;
mod uv;
pub mod versioning;

use std::path::PathBuf;

use anyhow::Result;
use pep440_rs::Version;
use serde::Serialize;

use monopy_domain::{DependencySpec, LocalDependency, Project, MAIN_GROUP};

pub use backend::{split_args, Backend, Operation};
pub use cascade::Cascade;
pub use poetry::PoetryProvider;
pub use uv::UvProvider;

use crate::build::{BuildOutput, BuildRequest};
use crate::context::{BackendKind, WorkspaceContext};

#[derive(Debug, Clone, Default)]
pub struct AddRequest {
    pub name: String,
    /// `name` is a workspace project rather than a registry package.
    pub local: bool,
    pub group: Option<String>,
    pub extras: Vec<String>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub name: Option<String>,
    pub local: bool,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RemoveRequest {
    pub name: String,
    pub local: bool,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LockRequest {
    pub update: bool,
    pub args: Vec<String>,
    pub verbose: bool,
    pub cache_dir: Option<PathBuf>,
}

/// Options shared by `sync` and `install`.
#[derive(Debug, Clone, Default)]
pub struct EnvRequest {
    pub args: Vec<String>,
    pub verbose: bool,
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    pub repository: Option<String>,
    pub dry_run: bool,
    pub args: Vec<String>,
    pub build: BuildRequest,
}

#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    pub extras: Vec<String>,
    /// Output file relative to the project root; `requirements.txt` by default.
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectMetadata {
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyMetadata {
    pub name: Option<String>,
    pub version: Option<String>,
    pub group: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutput {
    pub build_folder_path: PathBuf,
    /// The registry already had this version; treated as success.
    pub already_published: bool,
}

pub trait Provider {
    fn context(&self) -> &WorkspaceContext;
    fn kind(&self) -> BackendKind;

    /// # Errors
    /// Returns [`crate::BackendError::ToolMissing`] when the backend is not installed.
    fn check_prerequisites(&self) -> Result<()>;

    fn backend_version(&self) -> Result<Version>;

    fn metadata(&self, project: &Project) -> Result<ProjectMetadata> {
        let manifest = self.context().manifest(project)?;
        Ok(ProjectMetadata {
            name: manifest.package_name,
            version: manifest.version,
        })
    }

    /// Name, version and declaring group of a local dependency of `project`.
    fn dependency_metadata(&self, project: &Project, dependency: &str) -> Result<Option<DependencyMetadata>> {
        let ctx = self.context();
        let manifest = ctx.manifest(project)?;
        let lock = ctx.root_lockfile()?;
        let graph = ctx.graph(lock.as_ref());
        let found = manifest
            .all_dependencies()
            .filter(|(_, name, spec)| spec.is_local() && names_match(name, dependency))
            .find_map(|(group, name, spec)| {
                graph
                    .resolve_local(project, &manifest, name, spec)
                    .map(|target| (group.to_string(), target.clone()))
            });
        let Some((group, target)) = found else {
            return Ok(None);
        };
        let target_manifest = ctx.store().read(ctx.dialect(), &target.manifest_path);
        Ok(Some(DependencyMetadata {
            name: target_manifest.package_name,
            version: target_manifest.version,
            group,
        }))
    }

    fn update_version(&self, project: &Project, version: &str) -> Result<()> {
        let ctx = self.context();
        let mut manifest = ctx.manifest(project)?;
        tracing::info!(project = %project.name, version, "Updating project version");
        manifest.version = Some(version.to_string());
        ctx.write_manifest(project, &manifest)
    }

    fn dependencies(&self, project: &Project) -> Result<Vec<LocalDependency>> {
        let ctx = self.context();
        let lock = ctx.root_lockfile()?;
        Ok(ctx.graph(lock.as_ref()).dependencies_of(project))
    }

    fn dependents(&self, project: &Project) -> Result<Vec<Project>> {
        let ctx = self.context();
        let lock = ctx.root_lockfile()?;
        Ok(ctx
            .graph(lock.as_ref())
            .dependents_of(project)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Package directories of `project`, relative to the workspace root.
    fn module_folders(&self, project: &Project) -> Vec<PathBuf> {
        let ctx = self.context();
        let graph = ctx.graph(None);
        let manifest = graph.manifest(project);
        graph.module_folders(project, &manifest)
    }

    fn add(&self, project: &Project, request: &AddRequest) -> Result<()>;
    fn update(&self, project: &Project, request: &UpdateRequest) -> Result<()>;
    fn remove(&self, project: &Project, request: &RemoveRequest) -> Result<()>;
    /// Lock `project`, or the workspace root when `None`.
    fn lock(&self, project: Option<&Project>, request: &LockRequest) -> Result<()>;
    fn sync(&self, project: &Project, request: &EnvRequest) -> Result<()>;
    /// Install `project`, or the workspace root environment when `None`.
    fn install(&self, project: Option<&Project>, request: &EnvRequest) -> Result<()>;
    fn build(&self, project: &Project, request: &BuildRequest) -> Result<BuildOutput>;
    fn publish(&self, project: &Project, request: &PublishRequest) -> Result<PublishOutput>;
    /// Run a command in the project environment; returns its exit code.
    fn run(&self, project: &Project, args: &[String]) -> Result<i32>;
    /// Write a `requirements.txt` for `project`; returns the written path.
    fn export_requirements(&self, project: &Project, request: &ExportRequest) -> Result<PathBuf>;

    /// Bring one dependent project's lock and environment up to date.
    fn refresh_project(&self, project: &Project) -> Result<()>;
    /// Bring the shared root environment up to date.
    fn refresh_root(&self) -> Result<()>;
    /// Whether a change must be propagated to dependent projects.
    fn propagates(&self) -> bool;
    /// Whether changing `project` invalidates the root environment.
    fn needs_root_refresh(&self, project: &Project) -> bool;
}

/// Strategy for the backend the workspace selected.
#[must_use]
pub fn provider_for(ctx: &WorkspaceContext) -> Box<dyn Provider + '_> {
    match ctx.backend() {
        BackendKind::Poetry => Box::new(PoetryProvider::new(ctx)),
        BackendKind::Uv => Box::new(UvProvider::new(ctx)),
    }
}

fn names_match(left: &str, right: &str) -> bool {
    monopy_domain::canonicalize_package_name(left) == monopy_domain::canonicalize_package_name(right)
}

/// Local dependency spec written when `add --local` edits a manifest.
pub(crate) fn local_spec(path: String, extras: &[String]) -> DependencySpec {
    let mut spec = DependencySpec::local(path);
    if let DependencySpec::LocalPath(local) = &mut spec {
        local.extras = extras.to_vec();
    }
    spec
}

pub(crate) fn group_or_main(group: Option<&str>) -> &str {
    group.unwrap_or(MAIN_GROUP)
}

pub(crate) fn verbosity_args(verbose: bool) -> Vec<String> {
    if verbose {
        vec!["-v".to_string()]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendPreference, Config};
    use crate::testing::FakeRunner;
    use monopy_domain::MemoryTree;
    use std::sync::Arc;

    #[test]
    fn provider_follows_context_backend() {
        let tree = MemoryTree::new()
            .with_file("apps/app1/pyproject.toml", "[project]\nname = \"app1\"\nversion = \"1.0.0\"\n");
        let ctx = WorkspaceContext::new(
            "/ws",
            Arc::new(tree),
            Arc::new(FakeRunner::default()),
            Config::default().with_backend(BackendPreference::Uv),
        )
        .expect("context");
        let provider = provider_for(&ctx);
        assert_eq!(provider.kind(), BackendKind::Uv);
        let project = ctx.project("app1").expect("project").clone();
        let metadata = provider.metadata(&project).expect("metadata");
        assert_eq!(metadata.name.as_deref(), Some("app1"));
        assert_eq!(metadata.version.as_deref(), Some("1.0.0"));

        provider.update_version(&project, "1.1.0").expect("update");
        assert_eq!(provider.metadata(&project).expect("metadata").version.as_deref(), Some("1.1.0"));
    }

    #[test]
    fn dependency_metadata_reads_the_target_manifest() {
        let tree = MemoryTree::new()
            .with_file(
                "apps/app1/pyproject.toml",
                "[tool.poetry]\nname = \"app1\"\n\n[tool.poetry.group.dev.dependencies]\ndep1 = { path = \"../../libs/dep1\", develop = true }\n",
            )
            .with_file("libs/dep1/pyproject.toml", "[tool.poetry]\nname = \"dep1\"\nversion = \"0.3.0\"\n");
        let ctx = WorkspaceContext::new("/ws", Arc::new(tree), Arc::new(FakeRunner::default()), Config::default())
            .expect("context");
        let provider = provider_for(&ctx);
        let app = ctx.project("app1").expect("project").clone();
        let metadata = provider
            .dependency_metadata(&app, "dep1")
            .expect("metadata")
            .expect("found");
        assert_eq!(
            metadata,
            DependencyMetadata {
                name: Some("dep1".into()),
                version: Some("0.3.0".into()),
                group: "dev".into(),
            }
        );
        assert!(provider.dependency_metadata(&app, "numpy").expect("metadata").is_none());
        assert_eq!(
            provider.module_folders(&app),
            vec![PathBuf::from("apps/app1/app1")]
        );
    }
}
