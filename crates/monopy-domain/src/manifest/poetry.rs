use anyhow::Result;
use indexmap::IndexMap;
use toml_edit::{value, Array, ArrayOfTables, DocumentMut, InlineTable, Item, Table, TableLike, Value};

use super::spec::{DependencySpec, GitSpec, LocalPathSpec, RegistrySpec, WorkspaceSpec};
use super::toml::{
    bool_field, ensure_table, remove_if_empty, set_string, str_field, string_array, string_list,
    table_like, table_list, table_mut,
};
use super::{DependencyLayout, Manifest, PackageInclude, MAIN_GROUP};
use crate::sources::SourceRegistry;

pub(super) fn parse(root: &Table, manifest: &mut Manifest) {
    let poetry = table_like(root, &["tool", "poetry"]);
    manifest.package_name = poetry
        .and_then(|poetry| str_field(poetry, "name"))
        .or_else(|| table_like(root, &["project"]).and_then(|project| str_field(project, "name")));
    manifest.version = poetry
        .and_then(|poetry| str_field(poetry, "version"))
        .or_else(|| table_like(root, &["project"]).and_then(|project| str_field(project, "version")));
    let Some(poetry) = poetry else {
        return;
    };

    let implicit = poetry.get("dependencies").and_then(Item::as_table_like);
    let main_group = table_like_at(poetry, &["group", MAIN_GROUP, "dependencies"]);
    let implicit_python = implicit.is_some_and(|deps| deps.contains_key("python"));
    manifest.layout = if !implicit_python && main_group.is_some() {
        DependencyLayout::MainGroup
    } else {
        DependencyLayout::Implicit
    };

    if let Some(deps) = implicit {
        read_dependency_table(deps, &mut manifest.python, &mut manifest.dependencies);
    }
    if manifest.layout == DependencyLayout::MainGroup {
        if let Some(deps) = main_group {
            read_dependency_table(deps, &mut manifest.python, &mut manifest.dependencies);
        }
    }

    if let Some(groups) = poetry.get("group").and_then(Item::as_table_like) {
        for (group, item) in groups.iter() {
            if group == MAIN_GROUP && manifest.layout == DependencyLayout::MainGroup {
                continue;
            }
            let Some(deps) = item
                .as_table_like()
                .and_then(|group| group.get("dependencies"))
                .and_then(Item::as_table_like)
            else {
                continue;
            };
            let mut ignored_python = None;
            let table = manifest.groups.entry(group.to_string()).or_default();
            read_dependency_table(deps, &mut ignored_python, table);
        }
    }

    manifest.packages = parse_packages(poetry);
    manifest.sources = parse_sources(poetry);
    manifest.extras = parse_extras(poetry);
    manifest.plugins = parse_plugins(poetry);
}

fn table_like_at<'a>(table: &'a dyn TableLike, path: &[&str]) -> Option<&'a dyn TableLike> {
    let mut current = table;
    for key in path {
        current = current.get(key)?.as_table_like()?;
    }
    Some(current)
}

fn read_dependency_table(
    table: &dyn TableLike,
    python: &mut Option<String>,
    into: &mut IndexMap<String, DependencySpec>,
) {
    for (name, item) in table.iter() {
        if name == "python" {
            if python.is_none() {
                *python = item.as_str().map(str::to_string);
            }
            continue;
        }
        match spec_from_item(item) {
            Some(spec) => {
                into.entry(name.to_string()).or_insert(spec);
            }
            None => tracing::debug!(dependency = name, "skipping unreadable dependency entry"),
        }
    }
}

pub(super) fn spec_from_item(item: &Item) -> Option<DependencySpec> {
    if let Some(constraint) = item.as_str() {
        return Some(DependencySpec::registry(constraint.trim()));
    }
    if let Some(array) = item.as_array() {
        // multiple-constraint form: the first entry is authoritative
        return array
            .iter()
            .find_map(Value::as_inline_table)
            .and_then(|table| spec_from_table(table));
    }
    item.as_table_like().and_then(spec_from_table)
}

fn spec_from_table(table: &dyn TableLike) -> Option<DependencySpec> {
    let extras = string_list(table.get("extras"));
    let optional = bool_field(table, "optional").unwrap_or(false);
    if let Some(path) = str_field(table, "path") {
        return Some(DependencySpec::LocalPath(LocalPathSpec {
            path,
            extras,
            optional,
            develop: bool_field(table, "develop").unwrap_or(false),
        }));
    }
    if let Some(url) = str_field(table, "git") {
        let rev = str_field(table, "rev")
            .or_else(|| str_field(table, "tag"))
            .or_else(|| str_field(table, "branch"));
        return Some(DependencySpec::Git(GitSpec {
            url,
            rev,
            extras,
            markers: str_field(table, "markers"),
            optional,
        }));
    }
    if bool_field(table, "workspace") == Some(true) {
        return Some(DependencySpec::Workspace(WorkspaceSpec { extras, optional }));
    }
    Some(DependencySpec::Registry(RegistrySpec {
        constraint: str_field(table, "version"),
        extras,
        markers: str_field(table, "markers"),
        optional,
        source: str_field(table, "source"),
    }))
}

pub(super) fn spec_to_item(spec: &DependencySpec) -> Item {
    let mut table = InlineTable::new();
    let (extras, optional) = match spec {
        DependencySpec::Registry(registry) => {
            let plain = registry.extras.is_empty()
                && registry.markers.is_none()
                && !registry.optional
                && registry.source.is_none();
            if plain {
                return value(registry.constraint.as_deref().unwrap_or("*"));
            }
            table.insert(
                "version",
                Value::from(registry.constraint.as_deref().unwrap_or("*")),
            );
            if let Some(markers) = &registry.markers {
                table.insert("markers", Value::from(markers.as_str()));
            }
            if let Some(source) = &registry.source {
                table.insert("source", Value::from(source.as_str()));
            }
            (&registry.extras, registry.optional)
        }
        DependencySpec::LocalPath(local) => {
            table.insert("path", Value::from(local.path.as_str()));
            if local.develop {
                table.insert("develop", Value::from(true));
            }
            (&local.extras, local.optional)
        }
        DependencySpec::Git(git) => {
            table.insert("git", Value::from(git.url.as_str()));
            if let Some(rev) = &git.rev {
                table.insert("rev", Value::from(rev.as_str()));
            }
            if let Some(markers) = &git.markers {
                table.insert("markers", Value::from(markers.as_str()));
            }
            (&git.extras, git.optional)
        }
        DependencySpec::Workspace(workspace) => {
            table.insert("workspace", Value::from(true));
            (&workspace.extras, workspace.optional)
        }
    };
    if optional {
        table.insert("optional", Value::from(true));
    }
    if !extras.is_empty() {
        table.insert("extras", string_array(extras.iter().map(String::as_str)));
    }
    Item::Value(Value::InlineTable(table))
}

fn parse_packages(poetry: &dyn TableLike) -> Vec<PackageInclude> {
    table_list(poetry.get("packages"))
        .into_iter()
        .filter_map(|entry| {
            Some(PackageInclude {
                include: str_field(entry, "include")?,
                from: str_field(entry, "from"),
            })
        })
        .collect()
}

fn parse_sources(poetry: &dyn TableLike) -> Vec<SourceRegistry> {
    table_list(poetry.get("source"))
        .into_iter()
        .filter_map(|entry| {
            Some(SourceRegistry::new(
                str_field(entry, "name")?,
                str_field(entry, "url")?,
            ))
        })
        .collect()
}

fn parse_extras(poetry: &dyn TableLike) -> IndexMap<String, Vec<String>> {
    poetry
        .get("extras")
        .and_then(Item::as_table_like)
        .map(|extras| {
            extras
                .iter()
                .map(|(name, item)| (name.to_string(), string_list(Some(item))))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_plugins(poetry: &dyn TableLike) -> IndexMap<String, IndexMap<String, String>> {
    poetry
        .get("plugins")
        .and_then(Item::as_table_like)
        .map(|plugins| {
            plugins
                .iter()
                .filter_map(|(group, item)| {
                    let entries = item
                        .as_table_like()?
                        .iter()
                        .filter_map(|(name, entry)| {
                            Some((name.to_string(), entry.as_str()?.to_string()))
                        })
                        .collect();
                    Some((group.to_string(), entries))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(super) fn apply(manifest: &Manifest, document: &mut DocumentMut) -> Result<()> {
    let poetry = ensure_table(document.as_table_mut(), &["tool", "poetry"])?;
    if manifest.package_name.is_some() {
        set_string(poetry, "name", manifest.package_name.as_deref());
    }
    if manifest.version.is_some() {
        set_string(poetry, "version", manifest.version.as_deref());
    }

    match manifest.layout {
        DependencyLayout::Implicit => {
            let deps = ensure_table(poetry, &["dependencies"])?;
            write_dependency_table(deps, manifest.python.as_deref(), &manifest.dependencies);
        }
        DependencyLayout::MainGroup => {
            if let Some(deps) = table_mut(poetry, &["dependencies"]) {
                write_dependency_table(deps, None, &IndexMap::new());
            }
            let deps = ensure_table(poetry, &["group", MAIN_GROUP, "dependencies"])?;
            write_dependency_table(deps, manifest.python.as_deref(), &manifest.dependencies);
        }
    }

    apply_groups(manifest, poetry)?;

    if parse_packages(&*poetry) != manifest.packages {
        if manifest.packages.is_empty() {
            poetry.remove("packages");
        } else {
            let mut packages = Array::new();
            for package in &manifest.packages {
                let mut entry = InlineTable::new();
                entry.insert("include", Value::from(package.include.as_str()));
                if let Some(from) = &package.from {
                    entry.insert("from", Value::from(from.as_str()));
                }
                packages.push(entry);
            }
            poetry.insert("packages", value(packages));
        }
    }

    if parse_sources(&*poetry) != manifest.sources {
        apply_sources(poetry, &manifest.sources);
    }

    if parse_extras(&*poetry) != manifest.extras {
        if manifest.extras.is_empty() {
            poetry.remove("extras");
        } else {
            let mut extras = Table::new();
            for (name, packages) in &manifest.extras {
                extras.insert(name, value(string_array(packages.iter().map(String::as_str))));
            }
            poetry.insert("extras", Item::Table(extras));
        }
    }

    if parse_plugins(&*poetry) != manifest.plugins {
        if manifest.plugins.is_empty() {
            poetry.remove("plugins");
        } else {
            let mut plugins = Table::new();
            plugins.set_implicit(true);
            for (group, entries) in &manifest.plugins {
                let mut table = Table::new();
                for (name, target) in entries {
                    table.insert(name, value(target.as_str()));
                }
                plugins.insert(group, Item::Table(table));
            }
            poetry.insert("plugins", Item::Table(plugins));
        }
    }
    Ok(())
}

fn apply_groups(manifest: &Manifest, poetry: &mut Table) -> Result<()> {
    let existing: Vec<String> = poetry
        .get("group")
        .and_then(Item::as_table_like)
        .map(|groups| groups.iter().map(|(name, _)| name.to_string()).collect())
        .unwrap_or_default();
    for group in existing {
        let keep_main = group == MAIN_GROUP && manifest.layout == DependencyLayout::MainGroup;
        if keep_main || manifest.groups.contains_key(&group) {
            continue;
        }
        if let Some(groups) = table_mut(poetry, &["group"]) {
            groups.remove(&group);
        }
    }
    for (group, deps) in &manifest.groups {
        let table = ensure_table(poetry, &["group", group, "dependencies"])?;
        write_dependency_table(table, None, deps);
    }
    remove_if_empty(poetry, "group");
    Ok(())
}

fn write_dependency_table(
    table: &mut Table,
    python: Option<&str>,
    deps: &IndexMap<String, DependencySpec>,
) {
    let stale: Vec<String> = table
        .iter()
        .map(|(name, _)| name.to_string())
        .filter(|name| name != "python" && !deps.contains_key(name))
        .collect();
    for name in stale {
        table.remove(&name);
    }
    set_string(table, "python", python);
    for (name, spec) in deps {
        let unchanged = table
            .get(name)
            .and_then(spec_from_item)
            .is_some_and(|existing| &existing == spec);
        if !unchanged {
            table.insert(name, spec_to_item(spec));
        }
    }
}

fn apply_sources(poetry: &mut Table, sources: &[SourceRegistry]) {
    if sources.is_empty() {
        poetry.remove("source");
        return;
    }
    let previous: Vec<Table> = poetry
        .get("source")
        .and_then(Item::as_array_of_tables)
        .map(|tables| tables.iter().cloned().collect())
        .unwrap_or_default();
    let mut tables = ArrayOfTables::new();
    for source in sources {
        let reused = previous.iter().find(|table| {
            table.get("name").and_then(Item::as_str) == Some(source.name.as_str())
                && table.get("url").and_then(Item::as_str) == Some(source.url.as_str())
        });
        let table = reused.cloned().unwrap_or_else(|| {
            let mut table = Table::new();
            table.insert("name", value(source.name.as_str()));
            table.insert("url", value(source.url.as_str()));
            table
        });
        tables.push(table);
    }
    poetry.insert("source", Item::ArrayOfTables(tables));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestDialect;

    const APP: &str = r#"# application manifest
[tool.poetry]
name = "app1"
version = "0.1.0"
packages = [{ include = "app1" }]

[tool.poetry.dependencies]
python = "^3.9"
click = "7.1.2"
dep1 = { path = "../../libs/dep1", develop = true }
numpy = { version = "1.21.0", markers = "python_version >= \"3.8\"" }
vcs = { git = "https://github.com/acme/vcs.git", rev = "abc123" }

[tool.poetry.group.dev.dependencies]
pytest = "^8.0"   # keep me
dep2 = { path = "../../libs/dep2" }

[[tool.poetry.source]]
name = "internal"
url = "https://pypi.internal/simple"
priority = "explicit"

[tool.black]
line-length = 100
"#;

    fn parse_app() -> Manifest {
        Manifest::parse(ManifestDialect::Poetry, APP).expect("parse")
    }

    #[test]
    fn parses_every_dependency_form() {
        let manifest = parse_app();
        assert_eq!(manifest.package_name.as_deref(), Some("app1"));
        assert_eq!(manifest.python.as_deref(), Some("^3.9"));
        assert_eq!(manifest.layout, DependencyLayout::Implicit);
        assert_eq!(
            manifest.dependencies.keys().collect::<Vec<_>>(),
            vec!["click", "dep1", "numpy", "vcs"]
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
        assert!(matches!(
            &manifest.dependencies["vcs"],
            DependencySpec::Git(git) if git.rev.as_deref() == Some("abc123")
        ));
        assert_eq!(
            manifest.dependencies["numpy"].markers(),
            Some("python_version >= \"3.8\"")
        );
        assert!(manifest.groups["dev"]["dep2"].is_local());
        assert_eq!(manifest.packages, vec![PackageInclude::new("app1")]);
        assert_eq!(
            manifest.sources,
            vec![SourceRegistry::new("internal", "https://pypi.internal/simple")]
        );
    }

    #[test]
    fn unchanged_model_renders_identically() {
        let manifest = parse_app();
        assert_eq!(manifest.render().expect("render"), APP);
    }

    #[test]
    fn edits_keep_unmodeled_sections() {
        let mut manifest = parse_app();
        manifest.remove_dependency("vcs");
        manifest.set_dependency(None, "dep3", DependencySpec::local("../../libs/dep3"));
        manifest.groups.clear();
        let rendered = manifest.render().expect("render");
        assert!(rendered.contains("# application manifest"));
        assert!(rendered.contains("[tool.black]\nline-length = 100"));
        assert!(rendered.contains("dep3 = { path = \"../../libs/dep3\", develop = true }"));
        assert!(!rendered.contains("vcs"));
        assert!(!rendered.contains("pytest"));
        assert!(rendered.contains("priority = \"explicit\""));

        let reparsed = Manifest::parse(ManifestDialect::Poetry, &rendered).expect("reparse");
        assert_eq!(reparsed.python.as_deref(), Some("^3.9"));
        assert!(reparsed.groups.is_empty());
        assert!(reparsed.dependencies.contains_key("dep3"));
    }

    #[test]
    fn main_group_layout_round_trips() {
        let text = r#"[tool.poetry]
name = "lib"

[tool.poetry.group.main.dependencies]
python = ">=3.10"
requests = "^2.31"
"#;
        let mut manifest = Manifest::parse(ManifestDialect::Poetry, text).expect("parse");
        assert_eq!(manifest.layout, DependencyLayout::MainGroup);
        assert!(manifest.groups.is_empty());
        manifest.dependencies.clear();
        manifest.set_dependency(None, "click", DependencySpec::registry("7.1.2"));
        let rendered = manifest.render().expect("render");
        let reparsed = Manifest::parse(ManifestDialect::Poetry, &rendered).expect("reparse");
        assert_eq!(reparsed.layout, DependencyLayout::MainGroup);
        assert_eq!(reparsed.python.as_deref(), Some(">=3.10"));
        assert_eq!(
            reparsed.dependencies.keys().collect::<Vec<_>>(),
            vec!["click"]
        );
    }

    #[test]
    fn registry_entries_inline_only_when_needed() {
        assert_eq!(
            spec_to_item(&DependencySpec::registry("7.1.2")).as_str(),
            Some("7.1.2")
        );
        let item = spec_to_item(&DependencySpec::Registry(RegistrySpec {
            constraint: Some("1.0.0".into()),
            source: Some("internal".into()),
            ..RegistrySpec::default()
        }));
        let table = item.as_inline_table().expect("inline");
        assert_eq!(table.get("source").and_then(Value::as_str), Some("internal"));
    }
}
