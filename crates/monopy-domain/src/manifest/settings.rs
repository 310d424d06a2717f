use serde::Serialize;
use toml_edit::{Item, Table};

use super::toml::{bool_field, str_field, string_list, table_like};
use crate::sources::SourceRegistry;

/// Per-project `[tool.monopy]` options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectSettings {
    pub name: Option<String>,
    /// Edges the host declares in addition to the ones found in manifests.
    pub implicit_dependencies: Vec<String>,
    pub publish: Option<bool>,
    pub custom_source: Option<SourceRegistry>,
}

impl ProjectSettings {
    /// Projects are publishable unless `[tool.monopy.build] publish = false`.
    #[must_use]
    pub fn publishable(&self) -> bool {
        self.publish.unwrap_or(true)
    }
}

/// Workspace-wide `[tool.monopy]` options, read from the root manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkspaceSettings {
    pub backend: Option<String>,
    pub infer_dependencies: Option<bool>,
    pub ignore_paths: Option<Vec<String>>,
    pub bundle_depth: Option<usize>,
}

pub(crate) fn parse_settings(root: &Table) -> (ProjectSettings, WorkspaceSettings) {
    let Some(tool) = table_like(root, &["tool", "monopy"]) else {
        return (ProjectSettings::default(), WorkspaceSettings::default());
    };
    let build = tool.get("build").and_then(Item::as_table_like);
    let custom_source = build.and_then(|build| {
        Some(SourceRegistry::new(
            str_field(build, "custom-source-name")?,
            str_field(build, "custom-source-url")?,
        ))
    });
    let project = ProjectSettings {
        name: str_field(tool, "name"),
        implicit_dependencies: string_list(tool.get("implicit-dependencies")),
        publish: build.and_then(|build| bool_field(build, "publish")),
        custom_source,
    };
    let ignore_paths = tool
        .get("ignore-paths")
        .and_then(Item::as_array)
        .map(|_| string_list(tool.get("ignore-paths")));
    let bundle_depth = tool
        .get("bundle-depth")
        .and_then(Item::as_integer)
        .and_then(|depth| usize::try_from(depth).ok())
        .filter(|depth| *depth > 0);
    let workspace = WorkspaceSettings {
        backend: str_field(tool, "backend"),
        infer_dependencies: bool_field(tool, "infer-dependencies"),
        ignore_paths,
        bundle_depth,
    };
    (project, workspace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use toml_edit::DocumentMut;

    #[test]
    fn reads_build_options_and_workspace_knobs() {
        let doc: DocumentMut = r#"
[tool.monopy]
backend = "uv"
infer-dependencies = true
bundle-depth = 1
implicit-dependencies = ["shared"]

[tool.monopy.build]
publish = false
custom-source-name = "internal"
custom-source-url = "https://pypi.internal/simple"
"#
        .parse()
        .expect("toml");
        let (project, workspace) = parse_settings(doc.as_table());
        assert!(!project.publishable());
        assert_eq!(project.implicit_dependencies, vec!["shared"]);
        assert_eq!(
            project.custom_source,
            Some(SourceRegistry::new("internal", "https://pypi.internal/simple"))
        );
        assert_eq!(workspace.backend.as_deref(), Some("uv"));
        assert_eq!(workspace.infer_dependencies, Some(true));
        assert_eq!(workspace.bundle_depth, Some(1));
        assert_eq!(workspace.ignore_paths, None);
    }

    #[test]
    fn partial_custom_source_is_ignored() {
        let doc: DocumentMut = "[tool.monopy.build]\ncustom-source-name = \"x\"\n"
            .parse()
            .expect("toml");
        let (project, _) = parse_settings(doc.as_table());
        assert!(project.custom_source.is_none());
        assert!(project.publishable());
    }
}
