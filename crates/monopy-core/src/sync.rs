//! Drift between the workspace graph and the manifests.
//!
//! [`detect`] is read-only; [`SyncReport::repair`] writes the missing
//! declarations and then runs one cascade covering every touched project.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use glob::Pattern;
use monopy_domain::{
    dependency_order, relative_path, DependencyEdge, EdgeKind, GraphOptions, Manifest, Project,
    SourceRegistry,
};
use serde::Serialize;

use crate::context::{BackendKind, WorkspaceContext};
use crate::provider::{local_spec, Cascade, Provider};

const ROOT_MANIFEST: &str = "Root pyproject.toml";

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Count import-inferred edges as expected dependencies.
    pub infer_dependencies: bool,
}

/// One manifest edit that brings the workspace back in sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RepairAction {
    AddDependency { project: String, dependency: String },
    RootDependency { project: String },
    RootSource { source: SourceRegistry },
    RootMember { project: String, path: String },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub messages: Vec<String>,
    pub actions: Vec<RepairAction>,
}

impl SyncReport {
    #[must_use]
    pub fn is_in_sync(&self) -> bool {
        self.messages.is_empty()
    }

    /// Every message, one per line; `None` when nothing drifted.
    #[must_use]
    pub fn out_of_sync_message(&self) -> Option<String> {
        (!self.messages.is_empty()).then(|| self.messages.join("\n"))
    }

    /// Apply every action, then refresh each touched project once and the
    /// root last. Returns the refreshed project names.
    ///
    /// # Errors
    /// Returns the first manifest or backend failure.
    pub fn repair(self, provider: &dyn Provider) -> Result<Vec<String>> {
        if self.actions.is_empty() {
            return Ok(Vec::new());
        }
        let ctx = provider.context();
        let mut touched: Vec<Project> = Vec::new();
        let root = ctx.root_project();
        let mut root_manifest = ctx.root_manifest();
        let mut root_changed = false;

        for action in self.actions {
            match action {
                RepairAction::AddDependency { project, dependency } => {
                    let owner = ctx.project(&project)?.clone();
                    let target = ctx.project(&dependency)?;
                    let mut manifest = ctx.manifest(&owner)?;
                    tracing::info!("Adding {dependency} local dependency to {project}");
                    declare_local(ctx, &owner, &mut manifest, target)?;
                    ctx.write_manifest(&owner, &manifest)?;
                    if !touched.contains(&owner) {
                        touched.push(owner);
                    }
                }
                RepairAction::RootDependency { project } => {
                    let target = ctx.project(&project)?;
                    declare_local(ctx, &root, &mut root_manifest, target)?;
                    root_changed = true;
                }
                RepairAction::RootSource { source } => {
                    if !root_manifest.sources.contains(&source) {
                        root_manifest.sources.push(source);
                        root_changed = true;
                    }
                }
                RepairAction::RootMember { path, .. } => {
                    if !root_manifest.workspace_members.contains(&path) {
                        root_manifest.workspace_members.push(path);
                        root_changed = true;
                    }
                }
            }
        }
        if root_changed {
            tracing::info!("Updating root pyproject.toml");
            ctx.write_manifest(&root, &root_manifest)?;
        }

        let mut cascade = Cascade::new(provider);
        for project in &touched {
            cascade.refresh(project)?;
            cascade.propagate(project)?;
        }
        if root_changed {
            cascade.force_root();
        }
        cascade.finish()
    }
}

fn declare_local(
    ctx: &WorkspaceContext,
    owner: &Project,
    manifest: &mut Manifest,
    target: &Project,
) -> Result<()> {
    let key = ctx
        .manifest(target)?
        .package_name
        .unwrap_or_else(|| target.name.clone());
    let path = relative_path(&owner.root, &target.root);
    manifest.set_dependency(None, &key, local_spec(path, &[]));
    Ok(())
}

/// Edges the workspace is expected to declare: the graph plus every
/// `[tool.monopy] implicit-dependencies` entry naming a known project.
///
/// # Errors
/// Returns an error when the lockfile or project sources cannot be read.
pub fn expected_edges(ctx: &WorkspaceContext, options: SyncOptions) -> Result<Vec<DependencyEdge>> {
    let lock = ctx.root_lockfile().unwrap_or_else(|err| {
        tracing::warn!(%err, "ignoring unreadable lockfile");
        None
    });
    let graph = ctx.graph(lock.as_ref());
    let mut edges = graph.build_edges(&GraphOptions {
        infer_imports: options.infer_dependencies,
    })?;
    for project in ctx.registry().iter() {
        let manifest = graph.manifest(project);
        for target in &manifest.settings.implicit_dependencies {
            if target == &project.name || ctx.registry().get(target).is_none() {
                continue;
            }
            let exists = edges
                .iter()
                .any(|edge| edge.source == project.name && &edge.target == target);
            if !exists {
                edges.push(DependencyEdge {
                    source: project.name.clone(),
                    target: target.clone(),
                    kind: EdgeKind::Implicit,
                    source_file: None,
                    group: None,
                });
            }
        }
    }
    Ok(edges)
}

/// Compare the expected graph with what manifests declare.
///
/// # Errors
/// Returns an error when project sources cannot be listed or read.
pub fn detect(ctx: &WorkspaceContext, options: SyncOptions) -> Result<SyncReport> {
    let edges = expected_edges(ctx, options)?;
    let lock = ctx.root_lockfile().unwrap_or(None);
    let graph = ctx.graph(lock.as_ref());
    let mut report = SyncReport::default();

    for name in dependency_order(ctx.registry(), &edges) {
        let Some(project) = ctx.registry().get(&name) else {
            continue;
        };
        let declared: HashSet<String> = graph
            .dependencies_of(project)
            .into_iter()
            .map(|dependency| dependency.project)
            .collect();
        let mut missing: Vec<String> = Vec::new();
        for edge in edges.iter().filter(|edge| edge.source == name) {
            if !declared.contains(&edge.target) && !missing.contains(&edge.target) {
                missing.push(edge.target.clone());
            }
        }
        if missing.is_empty() {
            continue;
        }
        report.messages.push(format!(
            "Project {name} is out of sync. Missing dependencies: {}",
            missing.join(", ")
        ));
        report
            .actions
            .extend(missing.into_iter().map(|dependency| RepairAction::AddDependency {
                project: name.clone(),
                dependency,
            }));
    }

    if ctx.has_root_manifest() {
        check_root(ctx, &mut report)?;
    }
    tracing::debug!(messages = report.messages.len(), "sync check finished");
    Ok(report)
}

fn check_root(ctx: &WorkspaceContext, report: &mut SyncReport) -> Result<()> {
    let root = ctx.root_project();
    let root_manifest = ctx.root_manifest();
    let graph = ctx.graph(None);

    if ctx.poetry_shared_env() {
        let declared: HashSet<&str> = root_manifest
            .all_dependencies()
            .filter(|(_, _, spec)| spec.is_local())
            .filter_map(|(_, name, spec)| graph.resolve_local(&root, &root_manifest, name, spec))
            .map(|project| project.name.as_str())
            .collect();
        for project in ctx.registry().iter() {
            if declared.contains(project.name.as_str()) {
                continue;
            }
            report.messages.push(format!(
                "{ROOT_MANIFEST} is out of sync. Missing dependency: {}",
                project.name
            ));
            report.actions.push(RepairAction::RootDependency {
                project: project.name.clone(),
            });
        }
    }

    let mut missing_sources: Vec<SourceRegistry> = Vec::new();
    for project in ctx.registry().iter() {
        for source in graph.manifest(project).sources {
            if !root_manifest.sources.contains(&source) && !missing_sources.contains(&source) {
                missing_sources.push(source);
            }
        }
    }
    for source in missing_sources {
        report.messages.push(format!(
            "{ROOT_MANIFEST} is out of sync. Missing source: {} ({})",
            source.name, source.url
        ));
        report.actions.push(RepairAction::RootSource { source });
    }

    if ctx.backend() == BackendKind::Uv {
        let patterns = root_manifest
            .workspace_members
            .iter()
            .filter_map(|member| match Pattern::new(member.trim_end_matches('/')) {
                Ok(pattern) => Some(pattern),
                Err(err) => {
                    tracing::warn!(member, %err, "invalid workspace member pattern");
                    None
                }
            })
            .collect::<Vec<_>>();
        for project in ctx.registry().iter() {
            if patterns.iter().any(|pattern| pattern.matches_path(&project.root)) {
                continue;
            }
            let path = member_path(&project.root);
            report.messages.push(format!(
                "{ROOT_MANIFEST} is out of sync. Missing workspace member: {path}"
            ));
            report.actions.push(RepairAction::RootMember {
                project: project.name.clone(),
                path,
            });
        }
    }
    Ok(())
}

fn member_path(root: &Path) -> String {
    root.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendPreference, Config};
    use crate::provider::provider_for;
    use crate::testing::FakeRunner;
    use monopy_domain::MemoryTree;
    use std::sync::Arc;

    fn context(tree: MemoryTree, runner: Arc<FakeRunner>, config: Config) -> WorkspaceContext {
        WorkspaceContext::new("/ws", Arc::new(tree), runner, config).expect("context")
    }

    fn poetry_tree() -> MemoryTree {
        MemoryTree::new()
            .with_file(
                "apps/app1/pyproject.toml",
                "[tool.poetry]\nname = \"app1\"\n\n[tool.poetry.dependencies]\npython = \"^3.11\"\n\n[tool.monopy]\nimplicit-dependencies = [\"lib2\", \"ghost\"]\n",
            )
            .with_file("apps/app1/app1/__init__.py", "import dep1\n")
            .with_file("libs/lib2/pyproject.toml", "[tool.poetry]\nname = \"lib2\"\n")
            .with_file("libs/dep1/pyproject.toml", "[tool.poetry]\nname = \"dep1\"\n")
            .with_file("libs/dep1/dep1/__init__.py", "")
    }

    #[test]
    fn missing_declarations_are_reported_per_project() {
        let ctx = context(poetry_tree(), Arc::new(FakeRunner::default()), Config::default());
        let report = detect(&ctx, SyncOptions::default()).expect("detect");
        assert_eq!(
            report.messages,
            vec!["Project app1 is out of sync. Missing dependencies: lib2"]
        );

        let inferred = detect(
            &ctx,
            SyncOptions {
                infer_dependencies: true,
            },
        )
        .expect("detect");
        assert_eq!(
            inferred.messages,
            vec!["Project app1 is out of sync. Missing dependencies: dep1, lib2"]
        );
        assert_eq!(
            inferred.out_of_sync_message().as_deref(),
            Some("Project app1 is out of sync. Missing dependencies: dep1, lib2")
        );
    }

    #[test]
    fn repair_declares_dependencies_and_is_idempotent() {
        let runner = Arc::new(FakeRunner::default());
        let ctx = context(poetry_tree(), runner.clone(), Config::default());
        let options = SyncOptions {
            infer_dependencies: true,
        };
        let report = detect(&ctx, options).expect("detect");
        let provider = provider_for(&ctx);
        let refreshed = report.repair(provider.as_ref()).expect("repair");
        assert_eq!(refreshed, vec!["app1"]);
        assert_eq!(runner.commands(), vec!["poetry lock", "poetry install"]);

        let again = detect(&ctx, options).expect("detect");
        assert!(again.is_in_sync(), "{:?}", again.messages);
        assert!(again.out_of_sync_message().is_none());
    }

    #[test]
    fn root_checks_run_in_order() {
        let tree = MemoryTree::new()
            .with_file(
                "pyproject.toml",
                "[tool.poetry]\nname = \"monorepo\"\n\n[tool.poetry.dependencies]\npython = \"^3.11\"\napp1 = { path = \"apps/app1\", develop = true }\n",
            )
            .with_file(
                "apps/app1/pyproject.toml",
                "[tool.poetry]\nname = \"app1\"\n\n[[tool.poetry.source]]\nname = \"internal\"\nurl = \"https://pypi.internal/simple\"\n",
            )
            .with_file("libs/lib2/pyproject.toml", "[tool.poetry]\nname = \"lib2\"\n");
        let runner = Arc::new(FakeRunner::default());
        let ctx = context(tree, runner.clone(), Config::default());
        let report = detect(&ctx, SyncOptions::default()).expect("detect");
        assert_eq!(
            report.messages,
            vec![
                "Root pyproject.toml is out of sync. Missing dependency: lib2",
                "Root pyproject.toml is out of sync. Missing source: internal (https://pypi.internal/simple)",
            ]
        );

        let provider = provider_for(&ctx);
        let refreshed = report.repair(provider.as_ref()).expect("repair");
        assert_eq!(refreshed, vec!["monorepo"]);
        assert_eq!(runner.commands(), vec!["poetry lock", "poetry install --no-root"]);
        assert!(detect(&ctx, SyncOptions::default()).expect("detect").is_in_sync());
    }

    #[test]
    fn uv_members_must_cover_every_project() {
        let tree = MemoryTree::new()
            .with_file(
                "pyproject.toml",
                "[project]\nname = \"monorepo\"\nversion = \"0.0.0\"\n\n[tool.uv.workspace]\nmembers = [\"apps/*\"]\n",
            )
            .with_file("apps/app1/pyproject.toml", "[project]\nname = \"app1\"\n")
            .with_file("libs/dep1/pyproject.toml", "[project]\nname = \"dep1\"\n");
        let ctx = context(
            tree,
            Arc::new(FakeRunner::default()),
            Config::default().with_backend(BackendPreference::Uv),
        );
        let report = detect(&ctx, SyncOptions::default()).expect("detect");
        assert_eq!(
            report.messages,
            vec!["Root pyproject.toml is out of sync. Missing workspace member: libs/dep1"]
        );
        assert_eq!(
            report.actions,
            vec![RepairAction::RootMember {
                project: "dep1".into(),
                path: "libs/dep1".into(),
            }]
        );
    }
}
