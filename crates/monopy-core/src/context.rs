use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use monopy_domain::{
    discover_projects, discover_workspace_root, lock_file_name, DiskTree, Lockfile, Manifest,
    ManifestDialect, ManifestStore, Project, ProjectRegistry, WorkspaceGraph, WorkspaceTree,
    MANIFEST_FILE, UV_LOCK, WORKSPACE_ROOT_NAME,
};
use serde::Serialize;
use toml_edit::Item;

use crate::config::{BackendPreference, Config};
use crate::effects::{CommandRunner, SharedRunner, SystemRunner};
use crate::errors::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Poetry,
    Uv,
}

impl BackendKind {
    #[must_use]
    pub fn dialect(self) -> ManifestDialect {
        match self {
            Self::Poetry => ManifestDialect::Poetry,
            Self::Uv => ManifestDialect::Uv,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.dialect().as_str()
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a command needs to know about the monorepo it runs in.
pub struct WorkspaceContext {
    root: PathBuf,
    tree: Arc<dyn WorkspaceTree>,
    registry: ProjectRegistry,
    runner: SharedRunner,
    config: Config,
    backend: BackendKind,
}

impl WorkspaceContext {
    /// Builds a context over `tree`, selecting the backend and discovering
    /// projects.
    ///
    /// # Errors
    /// Returns an error when the tree cannot be listed.
    pub fn new(
        root: impl Into<PathBuf>,
        tree: Arc<dyn WorkspaceTree>,
        runner: SharedRunner,
        config: Config,
    ) -> Result<Self> {
        let backend = match config.backend() {
            BackendPreference::Poetry => BackendKind::Poetry,
            BackendPreference::Uv => BackendKind::Uv,
            BackendPreference::Auto if tree.exists(Path::new(UV_LOCK)) => BackendKind::Uv,
            BackendPreference::Auto => BackendKind::Poetry,
        };
        let registry = discover_projects(tree.as_ref(), backend.dialect())?;
        tracing::debug!(backend = %backend, projects = registry.len(), "workspace loaded");
        Ok(Self {
            root: root.into(),
            tree,
            registry,
            runner,
            config,
            backend,
        })
    }

    /// Opens the workspace enclosing `start` on disk with real subprocesses.
    ///
    /// # Errors
    /// Returns an error when the workspace cannot be read or configured.
    pub fn open(start: &Path, backend: BackendPreference) -> Result<Self> {
        let root = discover_workspace_root(start)?;
        let root = root
            .canonicalize()
            .with_context(|| format!("failed to resolve {}", root.display()))?;
        let tree: Arc<dyn WorkspaceTree> = Arc::new(DiskTree::new(root.clone()));
        let config = Config::load(tree.as_ref())?.with_backend(backend);
        Self::new(root, tree, Arc::new(SystemRunner), config)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a workspace-relative path.
    #[must_use]
    pub fn abs(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    #[must_use]
    pub fn tree(&self) -> &dyn WorkspaceTree {
        self.tree.as_ref()
    }

    #[must_use]
    pub fn store(&self) -> ManifestStore<'_> {
        ManifestStore::new(self.tree.as_ref())
    }

    #[must_use]
    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    #[must_use]
    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    #[must_use]
    pub fn dialect(&self) -> ManifestDialect {
        self.backend.dialect()
    }

    /// # Errors
    /// Returns [`BackendError::ProjectNotFound`] for unknown names.
    pub fn project(&self, name: &str) -> Result<&Project> {
        self.registry.get(name).ok_or_else(|| {
            BackendError::ProjectNotFound {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Manifest of a project, failing when it is missing or invalid.
    ///
    /// # Errors
    /// Returns [`BackendError::Parse`] for broken manifests.
    pub fn manifest(&self, project: &Project) -> Result<Manifest> {
        self.store()
            .read_strict(self.dialect(), &project.manifest_path)
            .map_err(|err| BackendError::from(err).into())
    }

    /// # Errors
    /// Returns an error when the manifest cannot be rendered or written.
    pub fn write_manifest(&self, project: &Project, manifest: &Manifest) -> Result<()> {
        self.store().write(&project.manifest_path, manifest)
    }

    /// The workspace lockfile, when one exists.
    ///
    /// # Errors
    /// Returns an error when the lockfile exists but cannot be parsed.
    pub fn root_lockfile(&self) -> Result<Option<Lockfile>> {
        Lockfile::read(
            self.tree(),
            Path::new(lock_file_name(self.dialect())),
            self.dialect(),
        )
    }

    /// A graph over the current manifests.
    #[must_use]
    pub fn graph<'a>(&'a self, lock: Option<&'a Lockfile>) -> WorkspaceGraph<'a> {
        WorkspaceGraph::new(self.tree(), &self.registry, self.dialect()).with_lockfile(lock)
    }

    #[must_use]
    pub fn root_manifest(&self) -> Manifest {
        self.store().read(self.dialect(), Path::new(MANIFEST_FILE))
    }

    #[must_use]
    pub fn has_root_manifest(&self) -> bool {
        !self.root_manifest().is_absent()
    }

    /// The workspace root aggregator as a pseudo-project.
    #[must_use]
    pub fn root_project(&self) -> Project {
        let name = self
            .root_manifest()
            .package_name
            .unwrap_or_else(|| WORKSPACE_ROOT_NAME.to_string());
        Project::workspace_root(name)
    }

    /// Poetry workspace whose root manifest owns a shared environment.
    #[must_use]
    pub fn poetry_shared_env(&self) -> bool {
        self.backend == BackendKind::Poetry
            && self
                .root_manifest()
                .document()
                .and_then(|doc| doc.get("tool"))
                .and_then(Item::as_table_like)
                .is_some_and(|tool| tool.contains_key("poetry"))
    }

    /// uv workspace locked as a whole at the root.
    #[must_use]
    pub fn uv_workspace_mode(&self) -> bool {
        self.backend == BackendKind::Uv && self.tree.exists(Path::new(UV_LOCK))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;
    use monopy_domain::MemoryTree;

    fn context(tree: MemoryTree, config: Config) -> WorkspaceContext {
        WorkspaceContext::new("/ws", Arc::new(tree), Arc::new(FakeRunner::default()), config)
            .expect("context")
    }

    #[test]
    fn backend_follows_root_lockfile() {
        let tree = MemoryTree::new()
            .with_file("uv.lock", "version = 1\n")
            .with_file("libs/dep1/pyproject.toml", "[project]\nname = \"dep1\"\n");
        let ctx = context(tree, Config::default());
        assert_eq!(ctx.backend(), BackendKind::Uv);
        assert!(ctx.uv_workspace_mode());
        assert_eq!(ctx.registry().len(), 1);
        assert_eq!(ctx.root_project().name, WORKSPACE_ROOT_NAME);
    }

    #[test]
    fn explicit_preference_wins() {
        let tree = MemoryTree::new()
            .with_file("uv.lock", "version = 1\n")
            .with_file("pyproject.toml", "[tool.poetry]\nname = \"monorepo\"\n");
        let ctx = context(tree, Config::default().with_backend(BackendPreference::Poetry));
        assert_eq!(ctx.backend(), BackendKind::Poetry);
        assert!(ctx.poetry_shared_env());
        assert!(!ctx.uv_workspace_mode());
        assert_eq!(ctx.root_project().name, "monorepo");
        assert!(ctx.root_project().is_workspace_root());
    }

    #[test]
    fn unknown_project_is_a_user_error() {
        let ctx = context(MemoryTree::new(), Config::default());
        let err = ctx.project("ghost").expect_err("missing");
        let backend = err.downcast_ref::<BackendError>().expect("backend error");
        assert!(backend.is_user_error());
        assert!(!ctx.has_root_manifest());
    }
}
