//! Dialect-neutral view of a project's `pyproject.toml`.
//!
//! A [`Manifest`] keeps the parsed `toml_edit` document it came from, so
//! [`Manifest::render`] only touches the modeled sections and leaves every
//! other table, comment and formatting choice in place.

use std::path::PathBuf;

use anyhow::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use toml_edit::DocumentMut;

mod normalize;
mod poetry;
mod settings;
mod spec;
pub(crate) mod toml;
mod uv;

pub use normalize::{canonicalize_package_name, module_name, normalize_relative, relative_path};
pub(crate) use normalize::dependency_name;
pub use settings::{ProjectSettings, WorkspaceSettings};
pub use spec::{DependencySpec, GitSpec, LocalPathSpec, RegistrySpec, WorkspaceSpec};
pub use uv::{parse_requirement, ParsedRequirement};

use crate::sources::SourceRegistry;

pub const MANIFEST_FILE: &str = "pyproject.toml";
pub const MAIN_GROUP: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestDialect {
    Poetry,
    Uv,
}

impl ManifestDialect {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Poetry => "poetry",
            Self::Uv => "uv",
        }
    }
}

/// Where a Poetry manifest declares its main dependencies and python
/// constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DependencyLayout {
    /// `[tool.poetry.dependencies]` with a `python` entry.
    #[default]
    Implicit,
    /// `[tool.poetry.group.main.dependencies]`.
    MainGroup,
}

/// A package directory shipped with the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInclude {
    pub include: String,
    pub from: Option<String>,
}

impl PackageInclude {
    pub fn new(include: impl Into<String>) -> Self {
        Self {
            include: include.into(),
            from: None,
        }
    }

    /// Directory of the package relative to the project root.
    #[must_use]
    pub fn source_dir(&self) -> PathBuf {
        match &self.from {
            Some(from) => PathBuf::from(from).join(&self.include),
            None => PathBuf::from(&self.include),
        }
    }

    /// Top-level importable module provided by this include.
    #[must_use]
    pub fn module(&self) -> &str {
        self.include
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.include)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("{path} is empty or missing")]
    Missing { path: PathBuf },
    #[error("failed to parse {path}: {source}")]
    Syntax {
        path: PathBuf,
        #[source]
        source: toml_edit::TomlError,
    },
}

#[derive(Debug, Clone)]
pub struct Manifest {
    pub dialect: ManifestDialect,
    pub package_name: Option<String>,
    pub version: Option<String>,
    /// Poetry `python` dependency, or uv `requires-python`.
    pub python: Option<String>,
    pub layout: DependencyLayout,
    pub dependencies: IndexMap<String, DependencySpec>,
    pub groups: IndexMap<String, IndexMap<String, DependencySpec>>,
    pub packages: Vec<PackageInclude>,
    pub sources: Vec<SourceRegistry>,
    pub extras: IndexMap<String, Vec<String>>,
    pub plugins: IndexMap<String, IndexMap<String, String>>,
    pub workspace_members: Vec<String>,
    pub settings: ProjectSettings,
    pub workspace_settings: WorkspaceSettings,
    /// Drop every per-dependency source entry on render (uv bundles).
    pub reset_dependency_sources: bool,
    document: Option<DocumentMut>,
}

impl Manifest {
    /// The manifest of a project without (usable) `pyproject.toml`.
    #[must_use]
    pub fn absent(dialect: ManifestDialect) -> Self {
        Self {
            dialect,
            package_name: None,
            version: None,
            python: None,
            layout: DependencyLayout::default(),
            dependencies: IndexMap::new(),
            groups: IndexMap::new(),
            packages: Vec::new(),
            sources: Vec::new(),
            extras: IndexMap::new(),
            plugins: IndexMap::new(),
            workspace_members: Vec::new(),
            settings: ProjectSettings::default(),
            workspace_settings: WorkspaceSettings::default(),
            reset_dependency_sources: false,
            document: None,
        }
    }

    /// Parse manifest text in the given dialect.
    ///
    /// # Errors
    ///
    /// Returns the TOML syntax error when `contents` is not valid TOML.
    pub fn parse(dialect: ManifestDialect, contents: &str) -> Result<Self, toml_edit::TomlError> {
        let document: DocumentMut = contents.parse()?;
        Ok(Self::from_document(dialect, document))
    }

    #[must_use]
    pub fn from_document(dialect: ManifestDialect, document: DocumentMut) -> Self {
        let mut manifest = Self::absent(dialect);
        let (settings, workspace_settings) = settings::parse_settings(document.as_table());
        manifest.settings = settings;
        manifest.workspace_settings = workspace_settings;
        match dialect {
            ManifestDialect::Poetry => poetry::parse(document.as_table(), &mut manifest),
            ManifestDialect::Uv => uv::parse(document.as_table(), &mut manifest),
        }
        manifest.document = Some(document);
        manifest
    }

    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.document.is_none()
    }

    #[must_use]
    pub fn document(&self) -> Option<&DocumentMut> {
        self.document.as_ref()
    }

    /// Serialize the model back into its original document.
    ///
    /// # Errors
    ///
    /// Returns an error when a modeled section exists in the document with
    /// an incompatible shape (for example a string where a table is needed).
    pub fn render(&self) -> Result<String> {
        let mut document = self.document.clone().unwrap_or_default();
        match self.dialect {
            ManifestDialect::Poetry => poetry::apply(self, &mut document)?,
            ManifestDialect::Uv => uv::apply(self, &mut document)?,
        }
        Ok(document.to_string())
    }

    /// Every dependency, main group first, as `(group, name, spec)`.
    pub fn all_dependencies(&self) -> impl Iterator<Item = (&str, &str, &DependencySpec)> {
        let main = self
            .dependencies
            .iter()
            .map(|(name, spec)| (MAIN_GROUP, name.as_str(), spec));
        let groups = self.groups.iter().flat_map(|(group, deps)| {
            deps.iter()
                .map(move |(name, spec)| (group.as_str(), name.as_str(), spec))
        });
        main.chain(groups)
    }

    /// Look a dependency up by canonical name in the main group or `group`.
    #[must_use]
    pub fn find_dependency(&self, name: &str, group: Option<&str>) -> Option<(&str, &DependencySpec)> {
        let wanted = canonicalize_package_name(name);
        let table = match group {
            None => Some(&self.dependencies),
            Some(MAIN_GROUP) => Some(&self.dependencies),
            Some(group) => self.groups.get(group),
        }?;
        table
            .iter()
            .find(|(key, _)| canonicalize_package_name(key) == wanted)
            .map(|(key, spec)| (key.as_str(), spec))
    }

    pub fn set_dependency(&mut self, group: Option<&str>, name: &str, spec: DependencySpec) {
        let table = match group {
            None | Some(MAIN_GROUP) => &mut self.dependencies,
            Some(group) => self.groups.entry(group.to_string()).or_default(),
        };
        let wanted = canonicalize_package_name(name);
        let existing = table
            .keys()
            .find(|key| canonicalize_package_name(key) == wanted)
            .cloned();
        table.insert(existing.unwrap_or_else(|| name.to_string()), spec);
    }

    /// Remove `name` from the main group and every group; true when found.
    pub fn remove_dependency(&mut self, name: &str) -> bool {
        let wanted = canonicalize_package_name(name);
        let mut removed = false;
        for table in std::iter::once(&mut self.dependencies).chain(self.groups.values_mut()) {
            let before = table.len();
            table.retain(|key, _| canonicalize_package_name(key) != wanted);
            removed |= table.len() != before;
        }
        removed
    }

    pub fn add_package(&mut self, package: PackageInclude) {
        if !self.packages.iter().any(|existing| existing.include == package.include) {
            self.packages.push(package);
        }
    }

    /// Merge another manifest's entry-point plugins into this one.
    pub fn merge_plugins(&mut self, other: &IndexMap<String, IndexMap<String, String>>) {
        for (group, entries) in other {
            let target = self.plugins.entry(group.clone()).or_default();
            for (name, value) in entries {
                target.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
    }

    /// Package directories to ship, falling back to the conventional module
    /// directory when none are declared.
    #[must_use]
    pub fn package_includes(&self, has_src_layout: bool) -> Vec<PackageInclude> {
        if !self.packages.is_empty() {
            return self.packages.clone();
        }
        let Some(name) = self.package_name.as_deref() else {
            return Vec::new();
        };
        let module = module_name(name);
        let include = match self.dialect {
            ManifestDialect::Poetry => PackageInclude {
                include: module,
                from: has_src_layout.then(|| "src".to_string()),
            },
            ManifestDialect::Uv if has_src_layout => PackageInclude::new(format!("src/{module}")),
            ManifestDialect::Uv => PackageInclude::new(module),
        };
        vec![include]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_parses_to_nameless_manifest() {
        let manifest = Manifest::parse(ManifestDialect::Poetry, "").expect("parse");
        assert!(!manifest.is_absent());
        assert!(manifest.package_name.is_none());
        assert!(manifest.dependencies.is_empty());
    }

    #[test]
    fn dependency_edits_match_canonical_names() {
        let mut manifest = Manifest::parse(
            ManifestDialect::Poetry,
            "[tool.poetry]\nname = \"app\"\n[tool.poetry.dependencies]\nMy_Lib = \"^1.0\"\n",
        )
        .expect("parse");
        manifest.set_dependency(None, "my-lib", DependencySpec::registry("^2.0"));
        assert_eq!(manifest.dependencies.len(), 1);
        assert_eq!(
            manifest.find_dependency("my.lib", None).map(|(key, _)| key),
            Some("My_Lib")
        );
        manifest.set_dependency(Some("dev"), "pytest", DependencySpec::registry("^8"));
        assert!(manifest.remove_dependency("PYTEST"));
        assert!(!manifest.remove_dependency("pytest"));
    }

    #[test]
    fn package_module_is_last_segment() {
        assert_eq!(PackageInclude::new("src/app_core").module(), "app_core");
        let include = PackageInclude {
            include: "lib".into(),
            from: Some("src".into()),
        };
        assert_eq!(include.source_dir(), PathBuf::from("src/lib"));
        assert_eq!(include.module(), "lib");
    }
}
