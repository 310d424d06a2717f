use std::str::FromStr;

use anyhow::Result;
use indexmap::IndexMap;
use pep508_rs::{Requirement, VersionOrUrl};
use toml_edit::{value, Array, ArrayOfTables, DocumentMut, InlineTable, Item, Table, TableLike, Value};

use super::spec::{render_extras, DependencySpec, GitSpec, LocalPathSpec, RegistrySpec, WorkspaceSpec};
use super::toml::{
    bool_field, ensure_table, set_string, str_field, string_array, string_list, table_like,
    table_list, table_mut,
};
use super::{canonicalize_package_name, dependency_name, Manifest, ManifestDialect, PackageInclude};
use crate::sources::SourceRegistry;

const HATCH_PACKAGES: [&str; 5] = ["tool", "hatch", "build", "targets", "wheel"];

/// The pieces of a PEP 508 requirement string the manifest model keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequirement {
    pub name: String,
    pub extras: Vec<String>,
    pub constraint: Option<String>,
    pub markers: Option<String>,
}

#[must_use]
pub fn parse_requirement(raw: &str) -> Option<ParsedRequirement> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match Requirement::from_str(trimmed) {
        Ok(req) => {
            let constraint = match &req.version_or_url {
                Some(VersionOrUrl::VersionSpecifier(specifiers)) => {
                    let text = specifiers.to_string();
                    (!text.is_empty()).then_some(text)
                }
                Some(VersionOrUrl::Url(url)) => Some(format!("@ {url}")),
                None => None,
            };
            Some(ParsedRequirement {
                name: req.name.to_string(),
                extras: req.extras.iter().map(ToString::to_string).collect(),
                constraint,
                markers: req.marker.map(|marker| marker.to_string()),
            })
        }
        Err(err) => {
            tracing::debug!(requirement = trimmed, %err, "falling back to lenient requirement parsing");
            let (head, markers) = match trimmed.split_once(';') {
                Some((head, markers)) => (head, Some(markers.trim().to_string())),
                None => (trimmed, None),
            };
            let name = dependency_name(head);
            (!name.is_empty()).then(|| ParsedRequirement {
                name,
                extras: Vec::new(),
                constraint: None,
                markers,
            })
        }
    }
}

pub(super) fn parse(root: &Table, manifest: &mut Manifest) {
    let project = table_like(root, &["project"]);
    let sources = table_like(root, &["tool", "uv", "sources"]);
    manifest.package_name = project.and_then(|project| str_field(project, "name"));
    manifest.version = project.and_then(|project| str_field(project, "version"));
    manifest.python = project.and_then(|project| str_field(project, "requires-python"));

    if let Some(project) = project {
        for raw in string_list(project.get("dependencies")) {
            if let Some((name, spec)) = spec_from_requirement(&raw, sources) {
                manifest.dependencies.entry(name).or_insert(spec);
            }
        }
        if let Some(optional) = project
            .get("optional-dependencies")
            .and_then(Item::as_table_like)
        {
            for (extra, item) in optional.iter() {
                manifest
                    .extras
                    .insert(extra.to_string(), string_list(Some(item)));
            }
        }
    }

    if let Some(groups) = table_like(root, &["dependency-groups"]) {
        for (group, item) in groups.iter() {
            let table = manifest.groups.entry(group.to_string()).or_default();
            // `{ include-group = ... }` entries are not string requirements
            for raw in string_list(Some(item)) {
                if let Some((name, spec)) = spec_from_requirement(&raw, sources) {
                    table.entry(name).or_insert(spec);
                }
            }
        }
    }

    manifest.sources = table_list(table_like(root, &["tool", "uv"]).and_then(|uv| uv.get("index")))
        .into_iter()
        .filter_map(|entry| {
            Some(SourceRegistry::new(
                str_field(entry, "name")?,
                str_field(entry, "url")?,
            ))
        })
        .collect();
    manifest.workspace_members = table_like(root, &["tool", "uv", "workspace"])
        .map(|workspace| string_list(workspace.get("members")))
        .unwrap_or_default();
    manifest.packages = table_like(root, &HATCH_PACKAGES)
        .map(|wheel| string_list(wheel.get("packages")))
        .unwrap_or_default()
        .into_iter()
        .map(PackageInclude::new)
        .collect();
}

fn source_for<'a>(sources: Option<&'a dyn TableLike>, name: &str) -> Option<&'a dyn TableLike> {
    let sources = sources?;
    let wanted = canonicalize_package_name(name);
    let (_, item) = sources
        .iter()
        .find(|(key, _)| canonicalize_package_name(key) == wanted)?;
    if let Some(first) = item.as_array().and_then(|array| array.iter().find_map(Value::as_inline_table)) {
        return Some(first);
    }
    item.as_table_like()
}

fn spec_from_requirement(
    raw: &str,
    sources: Option<&dyn TableLike>,
) -> Option<(String, DependencySpec)> {
    let parsed = parse_requirement(raw)?;
    let ParsedRequirement {
        name,
        extras,
        constraint,
        markers,
    } = parsed;
    let spec = match source_for(sources, &name) {
        Some(source) if str_field(source, "path").is_some() => {
            DependencySpec::LocalPath(LocalPathSpec {
                path: str_field(source, "path").unwrap_or_default(),
                extras,
                optional: false,
                develop: bool_field(source, "editable").unwrap_or(false),
            })
        }
        Some(source) if bool_field(source, "workspace") == Some(true) => {
            DependencySpec::Workspace(WorkspaceSpec {
                extras,
                optional: false,
            })
        }
        Some(source) if str_field(source, "git").is_some() => DependencySpec::Git(GitSpec {
            url: str_field(source, "git").unwrap_or_default(),
            rev: str_field(source, "rev")
                .or_else(|| str_field(source, "tag"))
                .or_else(|| str_field(source, "branch")),
            extras,
            markers,
            optional: false,
        }),
        source => DependencySpec::Registry(RegistrySpec {
            constraint,
            extras,
            markers,
            optional: false,
            source: source.and_then(|source| str_field(source, "index")),
        }),
    };
    Some((name, spec))
}

#[must_use]
pub(crate) fn render_requirement(name: &str, spec: &DependencySpec) -> String {
    let extras = render_extras(spec.extras());
    let markers = spec
        .markers()
        .map(|markers| format!(" ; {markers}"))
        .unwrap_or_default();
    match spec {
        DependencySpec::Registry(RegistrySpec {
            constraint: Some(constraint),
            ..
        }) if constraint.starts_with('@') => format!("{name}{extras} {constraint}{markers}"),
        DependencySpec::Registry(RegistrySpec {
            constraint: Some(constraint),
            ..
        }) if constraint != "*" => format!("{name}{extras}{constraint}{markers}"),
        _ => format!("{name}{extras}{markers}"),
    }
}

fn source_entry(spec: &DependencySpec) -> Option<InlineTable> {
    let mut entry = InlineTable::new();
    match spec {
        DependencySpec::LocalPath(local) => {
            entry.insert("path", Value::from(local.path.as_str()));
            if local.develop {
                entry.insert("editable", Value::from(true));
            }
        }
        DependencySpec::Workspace(_) => {
            entry.insert("workspace", Value::from(true));
        }
        DependencySpec::Git(git) => {
            entry.insert("git", Value::from(git.url.as_str()));
            if let Some(rev) = &git.rev {
                entry.insert("rev", Value::from(rev.as_str()));
            }
        }
        DependencySpec::Registry(RegistrySpec {
            source: Some(index),
            ..
        }) => {
            entry.insert("index", Value::from(index.as_str()));
        }
        DependencySpec::Registry(_) => return None,
    }
    Some(entry)
}

fn parse_snapshot(document: &DocumentMut) -> Manifest {
    let mut snapshot = Manifest::absent(ManifestDialect::Uv);
    parse(document.as_table(), &mut snapshot);
    snapshot
}

/// Raw requirement strings keyed by canonical name, so unchanged entries
/// keep their original spelling.
fn raw_requirements(item: Option<&Item>) -> (IndexMap<String, String>, bool) {
    let multiline = item
        .and_then(Item::as_array)
        .is_some_and(|array| array.to_string().contains('\n'));
    let raw = string_list(item)
        .into_iter()
        .map(|raw| (dependency_name(&raw), raw))
        .collect();
    (raw, multiline)
}

fn requirement_array(
    deps: &IndexMap<String, DependencySpec>,
    previous: &IndexMap<String, DependencySpec>,
    raw: &IndexMap<String, String>,
    multiline: bool,
) -> Array {
    let mut array = Array::new();
    for (name, spec) in deps {
        let canonical = canonicalize_package_name(name);
        let unchanged = previous
            .iter()
            .find(|(key, _)| canonicalize_package_name(key) == canonical)
            .is_some_and(|(_, existing)| existing == spec);
        let text = match raw.get(&canonical) {
            Some(original) if unchanged => original.clone(),
            _ => render_requirement(name, spec),
        };
        array.push(text);
    }
    if multiline && !array.is_empty() {
        for item in array.iter_mut() {
            item.decor_mut().set_prefix("\n    ");
        }
        array.set_trailing("\n");
        array.set_trailing_comma(true);
    }
    array
}

pub(super) fn apply(manifest: &Manifest, document: &mut DocumentMut) -> Result<()> {
    let previous = parse_snapshot(document);
    let root = document.as_table_mut();

    if manifest.package_name.is_some() && manifest.package_name != previous.package_name {
        set_string(ensure_table(root, &["project"])?, "name", manifest.package_name.as_deref());
    }
    if manifest.version.is_some() && manifest.version != previous.version {
        set_string(ensure_table(root, &["project"])?, "version", manifest.version.as_deref());
    }

    if manifest.dependencies != previous.dependencies {
        let project = ensure_table(root, &["project"])?;
        let (raw, multiline) = raw_requirements(project.get("dependencies"));
        let array = requirement_array(&manifest.dependencies, &previous.dependencies, &raw, multiline);
        project.insert("dependencies", value(array));
    }

    if manifest.extras != previous.extras {
        let project = ensure_table(root, &["project"])?;
        if manifest.extras.is_empty() {
            project.remove("optional-dependencies");
        } else {
            let mut optional = Table::new();
            for (extra, requirements) in &manifest.extras {
                optional.insert(
                    extra,
                    value(string_array(requirements.iter().map(String::as_str))),
                );
            }
            project.insert("optional-dependencies", Item::Table(optional));
        }
    }

    if manifest.groups != previous.groups {
        apply_groups(manifest, &previous, root)?;
    }

    apply_sources(manifest, &previous, root)?;

    if manifest.sources != previous.sources {
        apply_indexes(root, &manifest.sources)?;
    }

    if manifest.workspace_members != previous.workspace_members {
        let workspace = ensure_table(root, &["tool", "uv", "workspace"])?;
        workspace.insert(
            "members",
            value(string_array(manifest.workspace_members.iter().map(String::as_str))),
        );
    }

    if manifest.packages != previous.packages {
        let wheel = ensure_table(root, &HATCH_PACKAGES)?;
        wheel.insert(
            "packages",
            value(string_array(
                manifest.packages.iter().map(|package| package.include.as_str()),
            )),
        );
    }
    Ok(())
}

fn apply_groups(manifest: &Manifest, previous: &Manifest, root: &mut Table) -> Result<()> {
    if manifest.groups.is_empty() {
        root.remove("dependency-groups");
        return Ok(());
    }
    let groups = ensure_table(root, &["dependency-groups"])?;
    let stale: Vec<String> = groups
        .iter()
        .map(|(name, _)| name.to_string())
        .filter(|name| !manifest.groups.contains_key(name))
        .collect();
    for name in stale {
        groups.remove(&name);
    }
    let empty = IndexMap::new();
    for (group, deps) in &manifest.groups {
        let before = previous.groups.get(group).unwrap_or(&empty);
        if before == deps {
            continue;
        }
        let (raw, multiline) = raw_requirements(groups.get(group));
        let array = requirement_array(deps, before, &raw, multiline);
        groups.insert(group, value(array));
    }
    Ok(())
}

fn apply_sources(manifest: &Manifest, previous: &Manifest, root: &mut Table) -> Result<()> {
    let desired: IndexMap<String, (&DependencySpec, InlineTable)> = manifest
        .all_dependencies()
        .filter_map(|(_, name, spec)| {
            source_entry(spec).map(|entry| (canonicalize_package_name(name), (spec, entry)))
        })
        .collect();
    let before: IndexMap<String, &DependencySpec> = previous
        .all_dependencies()
        .filter(|(_, _, spec)| source_entry(spec).is_some())
        .map(|(_, name, spec)| (canonicalize_package_name(name), spec))
        .collect();

    if manifest.reset_dependency_sources {
        if let Some(uv) = table_mut(root, &["tool", "uv"]) {
            uv.remove("sources");
        }
    } else {
        let stale: Vec<&String> = before
            .keys()
            .filter(|name| !desired.contains_key(*name))
            .collect();
        if !stale.is_empty() {
            if let Some(sources) = table_mut(root, &["tool", "uv", "sources"]) {
                let keys: Vec<String> = sources
                    .iter()
                    .map(|(key, _)| key.to_string())
                    .filter(|key| stale.contains(&&canonicalize_package_name(key)))
                    .collect();
                for key in keys {
                    sources.remove(&key);
                }
            }
        }
    }

    let changed: Vec<(&String, &InlineTable)> = desired
        .iter()
        .filter(|(name, (spec, _))| {
            manifest.reset_dependency_sources || before.get(*name) != Some(spec)
        })
        .map(|(name, (_, entry))| (name, entry))
        .collect();
    if changed.is_empty() {
        return Ok(());
    }
    let sources = ensure_table(root, &["tool", "uv", "sources"])?;
    for (name, entry) in changed {
        let key = sources
            .iter()
            .map(|(key, _)| key.to_string())
            .find(|key| &canonicalize_package_name(key) == name)
            .unwrap_or_else(|| name.clone());
        sources.insert(&key, value(entry.clone()));
    }
    Ok(())
}

fn apply_indexes(root: &mut Table, indexes: &[SourceRegistry]) -> Result<()> {
    let uv = ensure_table(root, &["tool", "uv"])?;
    if indexes.is_empty() {
        uv.remove("index");
        return Ok(());
    }
    let previous: Vec<Table> = uv
        .get("index")
        .and_then(Item::as_array_of_tables)
        .map(|tables| tables.iter().cloned().collect())
        .unwrap_or_default();
    let mut tables = ArrayOfTables::new();
    for index in indexes {
        let reused = previous.iter().find(|table| {
            table.get("name").and_then(Item::as_str) == Some(index.name.as_str())
                && table.get("url").and_then(Item::as_str) == Some(index.url.as_str())
        });
        let table = reused.cloned().unwrap_or_else(|| {
            let mut table = Table::new();
            table.insert("name", value(index.name.as_str()));
            table.insert("url", value(index.url.as_str()));
            table
        });
        tables.push(table);
    }
    uv.insert("index", Item::ArrayOfTables(tables));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: &str = r#"[project]
name = "app1"
version = "0.1.0"
requires-python = ">=3.10"
dependencies = [
    "Click>=7.1",
    "dep1",
    "numpy==1.21.0; python_version >= '3.8'",
]

[dependency-groups]
dev = ["pytest>=8"]

[tool.uv.sources]
dep1 = { path = "../../libs/dep1", editable = true }

[[tool.uv.index]]
name = "internal"
url = "https://pypi.internal/simple"
explicit = true

[tool.hatch.build.targets.wheel]
packages = ["app1"]
"#;

    fn parse_app() -> Manifest {
        Manifest::parse(ManifestDialect::Uv, APP).expect("parse")
    }

    #[test]
    fn requirement_strings_pick_up_sources() {
        let manifest = parse_app();
        assert_eq!(manifest.package_name.as_deref(), Some("app1"));
        assert_eq!(
            manifest.dependencies.keys().collect::<Vec<_>>(),
            vec!["click", "dep1", "numpy"]
        );
        assert_eq!(
            manifest.dependencies["dep1"],
            DependencySpec::LocalPath(LocalPathSpec {
                path: "../../libs/dep1".into(),
                extras: vec![],
                optional: false,
                develop: true,
            })
        );
        assert!(manifest.dependencies["numpy"].markers().is_some());
        assert_eq!(manifest.groups["dev"].len(), 1);
        assert_eq!(manifest.packages, vec![PackageInclude::new("app1")]);
        assert_eq!(manifest.sources.len(), 1);
    }

    #[test]
    fn unchanged_model_renders_identically() {
        assert_eq!(parse_app().render().expect("render"), APP);
    }

    #[test]
    fn new_dependencies_keep_existing_spelling() {
        let mut manifest = parse_app();
        manifest.set_dependency(None, "dep2", DependencySpec::local("../../libs/dep2"));
        let rendered = manifest.render().expect("render");
        assert!(rendered.contains("\"Click>=7.1\""));
        assert!(rendered.contains("\"dep2\""));
        assert!(rendered.contains("dep2 = { path = \"../../libs/dep2\", editable = true }"));
        let reparsed = Manifest::parse(ManifestDialect::Uv, &rendered).expect("reparse");
        assert!(reparsed.dependencies["dep2"].is_local());
    }

    #[test]
    fn removing_a_local_dependency_drops_its_source() {
        let mut manifest = parse_app();
        manifest.remove_dependency("dep1");
        let rendered = manifest.render().expect("render");
        assert!(!rendered.contains("libs/dep1"));
        assert!(rendered.contains("explicit = true"));
    }

    #[test]
    fn reset_sources_clears_the_table() {
        let mut manifest = parse_app();
        manifest.dependencies.clear();
        manifest.set_dependency(
            None,
            "dep1",
            DependencySpec::Registry(RegistrySpec {
                constraint: Some("==0.2.0".into()),
                source: Some("internal".into()),
                ..RegistrySpec::default()
            }),
        );
        manifest.reset_dependency_sources = true;
        let rendered = manifest.render().expect("render");
        assert!(rendered.contains("\"dep1==0.2.0\""));
        assert!(rendered.contains("dep1 = { index = \"internal\" }"));
        assert!(!rendered.contains("path"));
    }

    #[test]
    fn render_requirement_shapes() {
        assert_eq!(
            render_requirement("numpy", &DependencySpec::Registry(RegistrySpec {
                constraint: Some("==1.21.0".into()),
                markers: Some("python_version >= \"3.8\"".into()),
                ..RegistrySpec::default()
            })),
            "numpy==1.21.0 ; python_version >= \"3.8\""
        );
        assert_eq!(render_requirement("dep1", &DependencySpec::local("../dep1")), "dep1");
        assert_eq!(
            render_requirement("pkg", &DependencySpec::Registry(RegistrySpec {
                constraint: Some("@ https://example.com/pkg.whl".into()),
                extras: vec!["x".into()],
                ..RegistrySpec::default()
            })),
            "pkg[x] @ https://example.com/pkg.whl"
        );
    }
}
