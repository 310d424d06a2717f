//! Structural reader for `poetry.lock` and `uv.lock`.
//!
//! Only the fields the build resolvers and graph builder consume are kept;
//! lock contents are never re-solved or written back.

use std::{collections::HashSet, path::Path};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Serialize;
use toml_edit::{DocumentMut, Item, TableLike, Value};

use crate::manifest::toml::{bool_field, str_field, string_list, table_list};
use crate::manifest::{canonicalize_package_name, ManifestDialect};
use crate::store::WorkspaceTree;

pub const POETRY_LOCK: &str = "poetry.lock";
pub const UV_LOCK: &str = "uv.lock";

#[must_use]
pub fn lock_file_name(dialect: ManifestDialect) -> &'static str {
    match dialect {
        ManifestDialect::Poetry => POETRY_LOCK,
        ManifestDialect::Uv => UV_LOCK,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LockedSource {
    Registry,
    Directory { path: String },
    Editable { path: String },
    Virtual { path: String },
    Git { url: String, reference: Option<String> },
    Other { kind: String },
}

impl LockedSource {
    /// Path of a source that lives inside the workspace.
    #[must_use]
    pub fn local_path(&self) -> Option<&str> {
        match self {
            Self::Directory { path } | Self::Editable { path } | Self::Virtual { path } => {
                Some(path)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockedDependency {
    pub name: String,
    pub extras: Vec<String>,
}

/// A direct requirement as recorded in uv lock metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockedRequirement {
    pub name: String,
    pub specifier: Option<String>,
    pub editable: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockedPackage {
    pub name: String,
    pub version: Option<String>,
    pub optional: bool,
    pub source: LockedSource,
    pub dependencies: Vec<LockedDependency>,
    pub optional_dependencies: IndexMap<String, Vec<LockedDependency>>,
    pub requires_dist: Vec<LockedRequirement>,
    pub requires_dev: IndexMap<String, Vec<LockedRequirement>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Lockfile {
    packages: Vec<LockedPackage>,
}

impl Lockfile {
    /// # Errors
    ///
    /// Returns an error when `contents` is not valid TOML.
    pub fn parse(dialect: ManifestDialect, contents: &str) -> Result<Self> {
        let doc: DocumentMut = contents.parse().context("invalid lockfile")?;
        let packages = table_list(doc.get("package"))
            .into_iter()
            .filter_map(|entry| match dialect {
                ManifestDialect::Poetry => poetry_package(entry),
                ManifestDialect::Uv => uv_package(entry),
            })
            .collect();
        Ok(Self { packages })
    }

    /// Read the lockfile at `path`; `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn read(tree: &dyn WorkspaceTree, path: &Path, dialect: ManifestDialect) -> Result<Option<Self>> {
        let Some(contents) = tree.read_to_string(path)? else {
            return Ok(None);
        };
        Self::parse(dialect, &contents)
            .with_context(|| format!("failed to parse {}", path.display()))
            .map(Some)
    }

    #[must_use]
    pub fn packages(&self) -> &[LockedPackage] {
        &self.packages
    }

    /// Case- and separator-insensitive package lookup.
    #[must_use]
    pub fn package(&self, name: &str) -> Option<&LockedPackage> {
        let wanted = canonicalize_package_name(name);
        self.packages
            .iter()
            .find(|package| canonicalize_package_name(&package.name) == wanted)
    }

    /// Editable path `owner` declares for `dependency` in its lock metadata.
    #[must_use]
    pub fn editable_path(&self, owner: &str, dependency: &str) -> Option<&str> {
        let owner = self.package(owner)?;
        let wanted = canonicalize_package_name(dependency);
        owner
            .requires_dist
            .iter()
            .chain(owner.requires_dev.values().flatten())
            .find(|requirement| canonicalize_package_name(&requirement.name) == wanted)
            .and_then(|requirement| requirement.editable.as_deref().or(requirement.path.as_deref()))
    }

    /// Packages reachable from `roots` (with requested extras), skipping
    /// anything in `exclude`. Results follow discovery order.
    #[must_use]
    pub fn closure<'a>(
        &'a self,
        roots: &[LockedDependency],
        exclude: &HashSet<String>,
    ) -> Vec<&'a LockedPackage> {
        let mut seen: HashSet<String> = exclude.clone();
        let mut seen_extras: HashSet<(String, String)> = HashSet::new();
        let mut resolved = Vec::new();
        let mut stack: Vec<LockedDependency> = roots.iter().rev().cloned().collect();
        while let Some(next) = stack.pop() {
            let Some(package) = self.package(&next.name) else {
                tracing::debug!(package = %next.name, "extra dependency missing from lockfile");
                continue;
            };
            let key = canonicalize_package_name(&package.name);
            let mut children: Vec<LockedDependency> = Vec::new();
            if seen.insert(key.clone()) {
                resolved.push(package);
                children.extend(package.dependencies.iter().cloned());
            }
            for extra in &next.extras {
                if !seen_extras.insert((key.clone(), extra.clone())) {
                    continue;
                }
                if let Some(extra_deps) = package.optional_dependencies.get(extra) {
                    children.extend(extra_deps.iter().cloned());
                }
            }
            stack.extend(children.into_iter().rev());
        }
        resolved
    }
}

fn dependency_from_item(name: &str, item: &Item) -> LockedDependency {
    let extras = item
        .as_table_like()
        .map(|table| string_list(table.get("extras")))
        .unwrap_or_default();
    LockedDependency {
        name: name.to_string(),
        extras,
    }
}

fn poetry_package(entry: &dyn TableLike) -> Option<LockedPackage> {
    let name = str_field(entry, "name")?;
    let source = match entry.get("source").and_then(Item::as_table_like) {
        None => LockedSource::Registry,
        Some(source) => {
            let kind = str_field(source, "type").unwrap_or_default();
            let url = str_field(source, "url").unwrap_or_default();
            match kind.as_str() {
                "directory" => LockedSource::Directory { path: url },
                "git" => LockedSource::Git {
                    url,
                    reference: str_field(source, "reference"),
                },
                "legacy" | "" => LockedSource::Registry,
                other => LockedSource::Other {
                    kind: other.to_string(),
                },
            }
        }
    };
    let dependencies = entry
        .get("dependencies")
        .and_then(Item::as_table_like)
        .map(|deps| {
            deps.iter()
                .map(|(name, item)| dependency_from_item(name, item))
                .collect()
        })
        .unwrap_or_default();
    let optional_dependencies = entry
        .get("extras")
        .and_then(Item::as_table_like)
        .map(|extras| {
            extras
                .iter()
                .map(|(extra, item)| {
                    let deps = string_list(Some(item))
                        .iter()
                        .map(|raw| LockedDependency {
                            name: crate::manifest::dependency_name(raw),
                            extras: Vec::new(),
                        })
                        .collect();
                    (extra.to_string(), deps)
                })
                .collect()
        })
        .unwrap_or_default();
    Some(LockedPackage {
        name,
        version: str_field(entry, "version"),
        optional: bool_field(entry, "optional").unwrap_or(false),
        source,
        dependencies,
        optional_dependencies,
        requires_dist: Vec::new(),
        requires_dev: IndexMap::new(),
    })
}

fn uv_dependency_list(item: Option<&Item>) -> Vec<LockedDependency> {
    let Some(array) = item.and_then(Item::as_array) else {
        return Vec::new();
    };
    array
        .iter()
        .filter_map(Value::as_inline_table)
        .filter_map(|entry| {
            Some(LockedDependency {
                name: str_field(entry, "name")?,
                extras: string_list(TableLike::get(entry, "extra")),
            })
        })
        .collect()
}

fn uv_requirements(item: Option<&Item>) -> Vec<LockedRequirement> {
    let Some(array) = item.and_then(Item::as_array) else {
        return Vec::new();
    };
    array
        .iter()
        .filter_map(Value::as_inline_table)
        .filter_map(|entry| {
            Some(LockedRequirement {
                name: str_field(entry, "name")?,
                specifier: str_field(entry, "specifier"),
                editable: str_field(entry, "editable"),
                path: str_field(entry, "path").or_else(|| str_field(entry, "directory")),
            })
        })
        .collect()
}

fn uv_package(entry: &dyn TableLike) -> Option<LockedPackage> {
    let name = str_field(entry, "name")?;
    let source = match entry.get("source").and_then(Item::as_table_like) {
        None => LockedSource::Registry,
        Some(source) => {
            if let Some(path) = str_field(source, "editable") {
                LockedSource::Editable { path }
            } else if let Some(path) = str_field(source, "virtual") {
                LockedSource::Virtual { path }
            } else if let Some(path) =
                str_field(source, "directory").or_else(|| str_field(source, "path"))
            {
                LockedSource::Directory { path }
            } else if let Some(url) = str_field(source, "git") {
                let (url, reference) = split_git_reference(&url);
                LockedSource::Git { url, reference }
            } else if source.contains_key("registry") {
                LockedSource::Registry
            } else {
                let kind = source
                    .iter()
                    .next()
                    .map_or_else(|| "unknown".to_string(), |(key, _)| key.to_string());
                LockedSource::Other { kind }
            }
        }
    };
    let optional_dependencies = entry
        .get("optional-dependencies")
        .and_then(Item::as_table_like)
        .map(|extras| {
            extras
                .iter()
                .map(|(extra, item)| (extra.to_string(), uv_dependency_list(Some(item))))
                .collect()
        })
        .unwrap_or_default();
    let metadata = entry.get("metadata").and_then(Item::as_table_like);
    let requires_dist = uv_requirements(metadata.and_then(|metadata| metadata.get("requires-dist")));
    let requires_dev = metadata
        .and_then(|metadata| metadata.get("requires-dev"))
        .and_then(Item::as_table_like)
        .map(|groups| {
            groups
                .iter()
                .map(|(group, item)| (group.to_string(), uv_requirements(Some(item))))
                .collect()
        })
        .unwrap_or_default();
    Some(LockedPackage {
        name,
        version: str_field(entry, "version"),
        optional: false,
        source,
        dependencies: uv_dependency_list(entry.get("dependencies")),
        optional_dependencies,
        requires_dist,
        requires_dev,
    })
}

/// `https://host/repo.git?rev=v1#sha` -> (`https://host/repo.git`, `sha`).
fn split_git_reference(raw: &str) -> (String, Option<String>) {
    let (base, fragment) = match raw.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment.to_string())),
        None => (raw, None),
    };
    let (url, query_rev) = match base.split_once('?') {
        Some((url, query)) => {
            let rev = query
                .split('&')
                .find_map(|pair| pair.split_once('=').map(|(_, value)| value.to_string()));
            (url, rev)
        }
        None => (base, None),
    };
    (url.to_string(), fragment.or(query_rev))
}
