use serde::{Deserialize, Serialize};

/// A single declared dependency, independent of manifest dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DependencySpec {
    Registry(RegistrySpec),
    LocalPath(LocalPathSpec),
    Git(GitSpec),
    /// uv `{ workspace = true }` source; the target is a workspace member.
    Workspace(WorkspaceSpec),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySpec {
    pub constraint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    pub markers: Option<String>,
    #[serde(default)]
    pub optional: bool,
    /// Name of the custom package index serving this dependency.
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalPathSpec {
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub develop: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSpec {
    pub url: String,
    pub rev: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    pub markers: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    #[serde(default)]
    pub optional: bool,
}

impl DependencySpec {
    #[must_use]
    pub fn registry(constraint: impl Into<String>) -> Self {
        Self::Registry(RegistrySpec {
            constraint: Some(constraint.into()),
            ..RegistrySpec::default()
        })
    }

    #[must_use]
    pub fn local(path: impl Into<String>) -> Self {
        Self::LocalPath(LocalPathSpec {
            path: path.into(),
            extras: Vec::new(),
            optional: false,
            develop: true,
        })
    }

    /// True for the variants that point at another workspace project.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::LocalPath(_) | Self::Workspace(_))
    }

    #[must_use]
    pub fn extras(&self) -> &[String] {
        match self {
            Self::Registry(spec) => &spec.extras,
            Self::LocalPath(spec) => &spec.extras,
            Self::Git(spec) => &spec.extras,
            Self::Workspace(spec) => &spec.extras,
        }
    }

    #[must_use]
    pub fn markers(&self) -> Option<&str> {
        match self {
            Self::Registry(spec) => spec.markers.as_deref(),
            Self::Git(spec) => spec.markers.as_deref(),
            Self::LocalPath(_) | Self::Workspace(_) => None,
        }
    }

    #[must_use]
    pub fn local_path(&self) -> Option<&str> {
        match self {
            Self::LocalPath(spec) => Some(spec.path.as_str()),
            _ => None,
        }
    }
}

pub(crate) fn render_extras(extras: &[String]) -> String {
    if extras.is_empty() {
        String::new()
    } else {
        format!("[{}]", extras.join(","))
    }
}
