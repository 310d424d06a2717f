//! Dependency edges between workspace projects.
//!
//! Implicit edges come from local dependencies declared in manifests;
//! dynamic edges are inferred from Python imports of another project's
//! module. A (source, target) pair yields at most one edge.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use anyhow::Result;
use petgraph::{algo::toposort, graph::DiGraph};
use serde::Serialize;

use crate::imports::ImportScanner;
use crate::lockfile::Lockfile;
use crate::manifest::{canonicalize_package_name, DependencySpec, Manifest, ManifestDialect};
use crate::store::{ManifestStore, WorkspaceTree};
use crate::workspace::{Project, ProjectRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Declared in a manifest.
    Implicit,
    /// Inferred from an import statement.
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(skip)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphOptions {
    pub infer_imports: bool,
}

/// A local dependency of a project, with the group that declares it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalDependency {
    pub project: String,
    pub group: String,
}

/// Snapshot of every project manifest, taken when the graph is built.
pub struct WorkspaceGraph<'a> {
    tree: &'a dyn WorkspaceTree,
    registry: &'a ProjectRegistry,
    dialect: ManifestDialect,
    lock: Option<&'a Lockfile>,
    manifests: Vec<(&'a Project, Manifest)>,
}

impl<'a> WorkspaceGraph<'a> {
    pub fn new(tree: &'a dyn WorkspaceTree, registry: &'a ProjectRegistry, dialect: ManifestDialect) -> Self {
        let store = ManifestStore::new(tree);
        let manifests = registry
            .iter()
            .map(|project| (project, store.read(dialect, &project.manifest_path)))
            .collect();
        Self {
            tree,
            registry,
            dialect,
            lock: None,
            manifests,
        }
    }

    /// Root lockfile used to resolve `{ workspace = true }` sources.
    #[must_use]
    pub fn with_lockfile(mut self, lock: Option<&'a Lockfile>) -> Self {
        self.lock = lock;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &'a ProjectRegistry {
        self.registry
    }

    /// Manifest of `project`, from the snapshot when it is a registered
    /// project and from the tree otherwise.
    #[must_use]
    pub fn manifest(&self, project: &Project) -> Manifest {
        self.snapshot(project).cloned().unwrap_or_else(|| {
            ManifestStore::new(self.tree).read(self.dialect, &project.manifest_path)
        })
    }

    fn snapshot(&self, project: &Project) -> Option<&Manifest> {
        self.manifests
            .iter()
            .find(|(candidate, _)| candidate.root == project.root)
            .map(|(_, manifest)| manifest)
    }

    /// Workspace project a local dependency of `owner` points at.
    #[must_use]
    pub fn resolve_local(
        &self,
        owner: &Project,
        manifest: &Manifest,
        name: &str,
        spec: &DependencySpec,
    ) -> Option<&'a Project> {
        let target = match spec {
            DependencySpec::LocalPath(local) => self.registry.find_by_root(&owner.root.join(&local.path)),
            DependencySpec::Workspace(_) => self
                .lock
                .zip(manifest.package_name.as_deref())
                .and_then(|(lock, package)| lock.editable_path(package, name))
                .and_then(|path| self.registry.find_by_root(Path::new(path)))
                .or_else(|| self.find_by_package(name)),
            DependencySpec::Registry(_) | DependencySpec::Git(_) => None,
        };
        target.filter(|target| target.root != owner.root)
    }

    fn find_by_package(&self, name: &str) -> Option<&'a Project> {
        let wanted = canonicalize_package_name(name);
        self.manifests
            .iter()
            .find(|(_, manifest)| {
                manifest
                    .package_name
                    .as_deref()
                    .is_some_and(|package| canonicalize_package_name(package) == wanted)
            })
            .map(|(project, _)| *project)
    }

    /// Local dependencies `project` declares, across every group.
    #[must_use]
    pub fn dependencies_of(&self, project: &Project) -> Vec<LocalDependency> {
        let manifest = self.manifest(project);
        manifest
            .all_dependencies()
            .filter(|(_, _, spec)| spec.is_local())
            .filter_map(|(group, name, spec)| {
                self.resolve_local(project, &manifest, name, spec)
                    .map(|target| LocalDependency {
                        project: target.name.clone(),
                        group: group.to_string(),
                    })
            })
            .collect()
    }

    /// Projects declaring a local dependency on `target`, in registry order.
    #[must_use]
    pub fn dependents_of(&self, target: &Project) -> Vec<&'a Project> {
        self.manifests
            .iter()
            .filter(|(project, _)| project.root != target.root)
            .filter(|(project, manifest)| {
                manifest
                    .all_dependencies()
                    .filter(|(_, _, spec)| spec.is_local())
                    .any(|(_, name, spec)| {
                        self.resolve_local(project, manifest, name, spec)
                            .is_some_and(|resolved| resolved.root == target.root)
                    })
            })
            .map(|(project, _)| *project)
            .collect()
    }

    /// Package directories of `project`, relative to the workspace root.
    #[must_use]
    pub fn module_folders(&self, project: &Project, manifest: &Manifest) -> Vec<PathBuf> {
        let has_src_layout = self.tree.exists(&project.root.join("src"));
        manifest
            .package_includes(has_src_layout)
            .iter()
            .map(|include| project.root.join(include.source_dir()))
            .collect()
    }

    /// Every edge in the workspace. Declared edges precede inferred ones
    /// for each source project.
    ///
    /// # Errors
    ///
    /// Returns an error when project sources cannot be listed or read.
    pub fn build_edges(&self, options: &GraphOptions) -> Result<Vec<DependencyEdge>> {
        let scanner = if options.infer_imports {
            Some(ImportScanner::new()?)
        } else {
            None
        };
        let modules = if scanner.is_some() {
            self.module_index()
        } else {
            HashMap::new()
        };

        let mut edges = Vec::new();
        for (project, manifest) in &self.manifests {
            if manifest.is_absent() {
                continue;
            }
            let mut targets: HashSet<&str> = HashSet::new();
            for (group, name, spec) in manifest.all_dependencies() {
                if !spec.is_local() {
                    continue;
                }
                let Some(target) = self.resolve_local(project, manifest, name, spec) else {
                    tracing::debug!(project = %project.name, dependency = name, "local dependency outside workspace");
                    continue;
                };
                if targets.insert(target.name.as_str()) {
                    edges.push(DependencyEdge {
                        source: project.name.clone(),
                        target: target.name.clone(),
                        kind: EdgeKind::Implicit,
                        source_file: None,
                        group: Some(group.to_string()),
                    });
                }
            }

            let Some(scanner) = &scanner else {
                continue;
            };
            for folder in self.module_folders(project, manifest) {
                let files = match self.tree.list_files(&folder) {
                    Ok(files) => files,
                    Err(err) => {
                        tracing::warn!(project = %project.name, folder = %folder.display(), %err, "skipping unreadable module folder");
                        continue;
                    }
                };
                for file in files {
                    if file.extension().and_then(|ext| ext.to_str()) != Some("py") {
                        continue;
                    }
                    let source = match self.tree.read_to_string(&file) {
                        Ok(Some(source)) => source,
                        Ok(None) => continue,
                        Err(err) => {
                            tracing::warn!(file = %file.display(), %err, "skipping unreadable source file");
                            continue;
                        }
                    };
                    for module in scanner.scan(&source) {
                        let Some(target) = modules.get(module.as_str()) else {
                            continue;
                        };
                        if target.root == project.root || !targets.insert(target.name.as_str()) {
                            continue;
                        }
                        edges.push(DependencyEdge {
                            source: project.name.clone(),
                            target: target.name.clone(),
                            kind: EdgeKind::Dynamic,
                            source_file: Some(file.to_string_lossy().replace('\\', "/")),
                            group: None,
                        });
                    }
                }
            }
        }
        Ok(edges)
    }

    fn module_index(&self) -> HashMap<String, &'a Project> {
        let mut index: HashMap<String, &'a Project> = HashMap::new();
        for (project, manifest) in &self.manifests {
            let has_src_layout = self.tree.exists(&project.root.join("src"));
            for include in manifest.package_includes(has_src_layout) {
                let module = include.module().to_string();
                if let Some(existing) = index.get(&module) {
                    tracing::debug!(
                        module = %module,
                        kept = %existing.name,
                        ignored = %project.name,
                        "module provided by several projects"
                    );
                    continue;
                }
                index.insert(module, project);
            }
        }
        index
    }
}

/// Project names ordered so dependencies come before their dependents.
///
/// A cycle falls back to registry order.
#[must_use]
pub fn dependency_order(registry: &ProjectRegistry, edges: &[DependencyEdge]) -> Vec<String> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let nodes: HashMap<&str, _> = registry
        .iter()
        .map(|project| (project.name.as_str(), graph.add_node(project.name.as_str())))
        .collect();
    for edge in edges {
        if let (Some(source), Some(target)) =
            (nodes.get(edge.source.as_str()), nodes.get(edge.target.as_str()))
        {
            graph.update_edge(*target, *source, ());
        }
    }
    match toposort(&graph, None) {
        Ok(order) => order.into_iter().map(|node| graph[node].to_string()).collect(),
        Err(cycle) => {
            tracing::warn!(project = graph[cycle.node_id()], "dependency cycle detected");
            registry.iter().map(|project| project.name.clone()).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTree;
    use crate::workspace::discover_projects;

    fn poetry_workspace() -> MemoryTree {
        MemoryTree::new()
            .with_file(
                "apps/app1/pyproject.toml",
                r#"[tool.poetry]
name = "app1"
packages = [{ include = "app1" }]

[tool.poetry.dependencies]
python = "^3.8"
dep1 = { path = "../../libs/dep1", develop = true }
click = "^8.0"

[tool.poetry.group.dev.dependencies]
dep2 = { path = "../../libs/dep2" }
"#,
            )
            .with_file("apps/app1/app1/main.py", "import dep1\nfrom dep3 import x\n")
            .with_file(
                "libs/dep1/pyproject.toml",
                "[tool.poetry]\nname = \"dep1\"\npackages = [{ include = \"dep1\" }]\n",
            )
            .with_file("libs/dep1/dep1/__init__.py", "import os\n")
            .with_file(
                "libs/dep2/pyproject.toml",
                r#"[tool.poetry]
name = "dep2"

[tool.poetry.dependencies]
dep1 = { path = "../dep1" }
"#,
            )
            .with_file(
                "libs/dep3/pyproject.toml",
                "[tool.poetry]\nname = \"dep3\"\npackages = [{ include = \"dep3\" }]\n",
            )
    }

    #[test]
    fn declared_edges_carry_groups() {
        let tree = poetry_workspace();
        let registry = discover_projects(&tree, ManifestDialect::Poetry).expect("discover");
        let graph = WorkspaceGraph::new(&tree, &registry, ManifestDialect::Poetry);
        let edges = graph.build_edges(&GraphOptions::default()).expect("edges");
        let pairs: Vec<_> = edges
            .iter()
            .map(|edge| (edge.source.as_str(), edge.target.as_str(), edge.group.as_deref()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("app1", "dep1", Some("main")),
                ("app1", "dep2", Some("dev")),
                ("dep2", "dep1", Some("main")),
            ]
        );
        assert!(edges.iter().all(|edge| edge.kind == EdgeKind::Implicit));
    }

    #[test]
    fn imports_add_dynamic_edges_once() {
        let tree = poetry_workspace();
        let registry = discover_projects(&tree, ManifestDialect::Poetry).expect("discover");
        let graph = WorkspaceGraph::new(&tree, &registry, ManifestDialect::Poetry);
        let edges = graph
            .build_edges(&GraphOptions { infer_imports: true })
            .expect("edges");
        let dynamic: Vec<_> = edges
            .iter()
            .filter(|edge| edge.kind == EdgeKind::Dynamic)
            .collect();
        assert_eq!(dynamic.len(), 1);
        assert_eq!(dynamic[0].source, "app1");
        assert_eq!(dynamic[0].target, "dep3");
        assert_eq!(dynamic[0].source_file.as_deref(), Some("apps/app1/app1/main.py"));

        let json = serde_json::to_value(dynamic[0]).expect("json");
        assert_eq!(json["type"], "dynamic");
        assert_eq!(json["sourceFile"], "apps/app1/app1/main.py");
        assert!(json.get("group").is_none());
    }

    #[test]
    fn undecodable_sources_do_not_hide_other_imports() {
        let tree = poetry_workspace()
            .with_file("apps/app1/app1/legacy.py", b"# caf\xe9\nimport dep2\n".as_slice());
        let registry = discover_projects(&tree, ManifestDialect::Poetry).expect("discover");
        let graph = WorkspaceGraph::new(&tree, &registry, ManifestDialect::Poetry);
        let edges = graph
            .build_edges(&GraphOptions { infer_imports: true })
            .expect("edges");
        let dynamic: Vec<_> = edges
            .iter()
            .filter(|edge| edge.kind == EdgeKind::Dynamic)
            .map(|edge| (edge.target.as_str(), edge.source_file.as_deref()))
            .collect();
        assert_eq!(dynamic, vec![("dep3", Some("apps/app1/app1/main.py"))]);
    }

    #[test]
    fn dependents_follow_registry_order() {
        let tree = poetry_workspace();
        let registry = discover_projects(&tree, ManifestDialect::Poetry).expect("discover");
        let graph = WorkspaceGraph::new(&tree, &registry, ManifestDialect::Poetry);
        let dep1 = registry.get("dep1").expect("dep1");
        let names: Vec<_> = graph
            .dependents_of(dep1)
            .into_iter()
            .map(|project| project.name.as_str())
            .collect();
        assert_eq!(names, vec!["app1", "dep2"]);

        let app1 = registry.get("app1").expect("app1");
        let deps = graph.dependencies_of(app1);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[1].group, "dev");
    }

    #[test]
    fn workspace_sources_resolve_by_package_name() {
        let tree = MemoryTree::new()
            .with_file(
                "packages/api/pyproject.toml",
                r#"[project]
name = "api"
dependencies = ["core-lib"]

[tool.uv.sources]
core-lib = { workspace = true }
"#,
            )
            .with_file("packages/core/pyproject.toml", "[project]\nname = \"core-lib\"\n");
        let registry = discover_projects(&tree, ManifestDialect::Uv).expect("discover");
        let graph = WorkspaceGraph::new(&tree, &registry, ManifestDialect::Uv);
        let edges = graph.build_edges(&GraphOptions::default()).expect("edges");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target, "core");
    }

    #[test]
    fn order_puts_dependencies_first() {
        let tree = poetry_workspace();
        let registry = discover_projects(&tree, ManifestDialect::Poetry).expect("discover");
        let graph = WorkspaceGraph::new(&tree, &registry, ManifestDialect::Poetry);
        let edges = graph.build_edges(&GraphOptions::default()).expect("edges");
        let order = dependency_order(&registry, &edges);
        let position = |name: &str| order.iter().position(|entry| entry == name).expect("present");
        assert!(position("dep1") < position("dep2"));
        assert!(position("dep2") < position("app1"));
        assert_eq!(order.len(), 4);
    }
}
