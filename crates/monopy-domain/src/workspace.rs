use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Serialize;
use toml_edit::{DocumentMut, Item};

use crate::manifest::{normalize_relative, ManifestDialect, MANIFEST_FILE};
use crate::store::{ManifestStore, WorkspaceTree};

/// Name given to the workspace-root pseudo-project when its manifest has
/// no package name.
pub const WORKSPACE_ROOT_NAME: &str = "workspace-root";

/// A buildable unit of the monorepo.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Project {
    pub name: String,
    /// Workspace-relative root; empty for the workspace root aggregator.
    pub root: PathBuf,
    pub manifest_path: PathBuf,
}

impl Project {
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Self {
        let root = normalize_relative(root.as_ref());
        Self {
            name: name.into(),
            manifest_path: root.join(MANIFEST_FILE),
            root,
        }
    }

    /// The workspace root as a project (root `""`).
    pub fn workspace_root(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }

    #[must_use]
    pub fn is_workspace_root(&self) -> bool {
        self.root.as_os_str().is_empty()
    }
}

/// Known projects in registry (discovery) order.
#[derive(Debug, Clone, Default)]
pub struct ProjectRegistry {
    projects: Vec<Project>,
}

impl ProjectRegistry {
    #[must_use]
    pub fn new(projects: Vec<Project>) -> Self {
        let mut registry = Self::default();
        for project in projects {
            if registry.find_by_root(&project.root).is_none() {
                registry.projects.push(project);
            }
        }
        registry
    }

    pub fn iter(&self) -> impl Iterator<Item = &Project> {
        self.projects.iter()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.name == name)
    }

    /// Project whose root equals `root` after lexical normalization.
    #[must_use]
    pub fn find_by_root(&self, root: &Path) -> Option<&Project> {
        let wanted = normalize_relative(root);
        self.projects.iter().find(|project| project.root == wanted)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

/// Walks upward from `start` to the nearest directory whose `pyproject.toml`
/// carries a `[tool.monopy]` table. Falls back to `start`.
///
/// # Errors
///
/// Returns an error when a candidate manifest cannot be read.
pub fn discover_workspace_root(start: &Path) -> Result<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let manifest = dir.join(MANIFEST_FILE);
        if manifest.is_file() {
            let contents = fs::read_to_string(&manifest)
                .with_context(|| format!("failed to read {}", manifest.display()))?;
            if let Ok(doc) = contents.parse::<DocumentMut>() {
                if has_monopy_table(&doc) {
                    return Ok(dir);
                }
            }
        }
        if !dir.pop() {
            return Ok(start.to_path_buf());
        }
    }
}

fn has_monopy_table(doc: &DocumentMut) -> bool {
    doc.get("tool")
        .and_then(Item::as_table_like)
        .and_then(|tool| tool.get("monopy"))
        .is_some()
}

/// Every directory below the workspace root that holds a `pyproject.toml`.
///
/// Projects are named by `[tool.monopy] name`, else by their directory
/// name; duplicated directory names fall back to the dash-joined path.
///
/// # Errors
///
/// Returns an error when the tree cannot be listed.
pub fn discover_projects(tree: &dyn WorkspaceTree, dialect: ManifestDialect) -> Result<ProjectRegistry> {
    let store = ManifestStore::new(tree);
    let mut found: Vec<(PathBuf, Option<String>)> = Vec::new();
    for file in tree.list_files(Path::new(""))? {
        if file.file_name().and_then(|name| name.to_str()) != Some(MANIFEST_FILE) {
            continue;
        }
        let Some(root) = file.parent().filter(|root| !root.as_os_str().is_empty()) else {
            continue;
        };
        let configured = store.read(dialect, &file).settings.name;
        found.push((root.to_path_buf(), configured));
    }

    let mut basename_counts: HashMap<String, usize> = HashMap::new();
    for (root, _) in &found {
        *basename_counts.entry(basename(root)).or_default() += 1;
    }
    let projects = found
        .into_iter()
        .map(|(root, configured)| {
            let name = configured.unwrap_or_else(|| {
                let base = basename(&root);
                if basename_counts.get(&base).copied().unwrap_or_default() > 1 {
                    root.components()
                        .map(|part| part.as_os_str().to_string_lossy().to_string())
                        .collect::<Vec<_>>()
                        .join("-")
                } else {
                    base
                }
            });
            Project::new(name, root)
        })
        .collect();
    tracing::debug!("discovered workspace projects");
    Ok(ProjectRegistry::new(projects))
}

fn basename(root: &Path) -> String {
    root.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DiskTree, MemoryTree};
    use tempfile::tempdir;

    #[test]
    fn discovers_projects_by_manifest() {
        let tree = MemoryTree::new()
            .with_file("pyproject.toml", "[tool.poetry]\nname = \"root\"\n")
            .with_file("apps/app1/pyproject.toml", "[tool.poetry]\nname = \"app1\"\n")
            .with_file(
                "libs/core/pyproject.toml",
                "[tool.monopy]\nname = \"shared-core\"\n",
            )
            .with_file("libs/dep1/pyproject.toml", "")
            .with_file("libs/dep1/.venv/pkg/pyproject.toml", "")
            .with_file("libs/util/util/__init__.py", "");
        let registry = discover_projects(&tree, ManifestDialect::Poetry).expect("discover");
        let names: Vec<_> = registry.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["app1", "shared-core", "dep1"]);
        assert_eq!(
            registry.find_by_root(Path::new("apps/app1/../../libs/dep1")).map(|p| p.name.as_str()),
            Some("dep1")
        );
        assert_eq!(
            registry.get("app1").map(|p| p.manifest_path.clone()),
            Some(PathBuf::from("apps/app1/pyproject.toml"))
        );
    }

    #[test]
    fn duplicate_directory_names_use_paths() {
        let tree = MemoryTree::new()
            .with_file("apps/api/pyproject.toml", "")
            .with_file("libs/api/pyproject.toml", "");
        let registry = discover_projects(&tree, ManifestDialect::Uv).expect("discover");
        let names: Vec<_> = registry.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["apps-api", "libs-api"]);
    }

    #[test]
    fn workspace_root_is_found_upwards() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("pyproject.toml"), "[tool.monopy]\nbackend = \"uv\"\n").expect("write");
        let nested = root.join("apps/app1");
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(nested.join("pyproject.toml"), "[project]\nname = \"app1\"\n").expect("write");
        assert_eq!(discover_workspace_root(&nested).expect("discover"), root);
        let tree = DiskTree::new(root);
        assert_eq!(discover_projects(&tree, ManifestDialect::Uv).expect("projects").len(), 1);
        assert!(Project::workspace_root("x").is_workspace_root());
    }
}
