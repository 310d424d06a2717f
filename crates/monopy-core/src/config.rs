use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Result};
use monopy_domain::{ManifestDialect, ManifestStore, WorkspaceSettings, WorkspaceTree, MANIFEST_FILE};
use serde::{Deserialize, Serialize};

const DEFAULT_IGNORE_PATHS: [&str; 3] = [".venv", ".tox", "tests"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub verbose: u8,
    pub trace: bool,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn flag_is_enabled(&self, key: &str) -> bool {
        matches!(self.vars.get(key).map(String::as_str), Some("1"))
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    Poetry,
    Uv,
}

impl FromStr for BackendPreference {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "poetry" => Ok(Self::Poetry),
            "uv" => Ok(Self::Uv),
            other => bail!("unknown backend `{other}` (expected poetry, uv or auto)"),
        }
    }
}

/// How many levels of local dependencies a build bundles. Direct
/// dependencies are level 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleDepth {
    #[default]
    Unlimited,
    Levels(usize),
}

impl BundleDepth {
    #[must_use]
    pub fn allows(self, level: usize) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Levels(max) => level <= max,
        }
    }
}

impl fmt::Display for BundleDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Levels(levels) => write!(f, "{levels}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) backend: BackendPreference,
    pub(crate) infer_dependencies: bool,
    pub(crate) ignore_paths: Vec<String>,
    pub(crate) bundle_depth: BundleDepth,
    pub(crate) poetry_bin: String,
    pub(crate) uv_bin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            infer_dependencies: false,
            ignore_paths: DEFAULT_IGNORE_PATHS.iter().map(ToString::to_string).collect(),
            bundle_depth: BundleDepth::Unlimited,
            poetry_bin: "poetry".to_string(),
            uv_bin: "uv".to_string(),
        }
    }
}

impl Config {
    /// Configuration from the process environment layered over the root
    /// manifest's `[tool.monopy]` table.
    ///
    /// # Errors
    /// Returns an error when `MONOPY_BACKEND` or `backend` hold an unknown value.
    pub fn load(tree: &dyn WorkspaceTree) -> Result<Self> {
        // The dialect only affects dependency parsing; settings read the same.
        let root = ManifestStore::new(tree).read(ManifestDialect::Poetry, Path::new(MANIFEST_FILE));
        Self::from_snapshot(&EnvSnapshot::capture(), &root.workspace_settings)
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot, settings: &WorkspaceSettings) -> Result<Self> {
        let defaults = Self::default();
        let backend = match snapshot.var("MONOPY_BACKEND").or(settings.backend.as_deref()) {
            Some(raw) => raw.parse()?,
            None => BackendPreference::Auto,
        };
        let infer_dependencies = if snapshot.contains("MONOPY_INFER_DEPENDENCIES") {
            snapshot.flag_is_enabled("MONOPY_INFER_DEPENDENCIES")
        } else {
            settings.infer_dependencies.unwrap_or(false)
        };
        Ok(Self {
            backend,
            infer_dependencies,
            ignore_paths: settings.ignore_paths.clone().unwrap_or(defaults.ignore_paths),
            bundle_depth: settings
                .bundle_depth
                .map_or(BundleDepth::Unlimited, BundleDepth::Levels),
            poetry_bin: snapshot
                .var("MONOPY_POETRY_BIN")
                .map_or(defaults.poetry_bin, ToOwned::to_owned),
            uv_bin: snapshot
                .var("MONOPY_UV_BIN")
                .map_or(defaults.uv_bin, ToOwned::to_owned),
        })
    }

    /// Override the backend preference, as the `--backend` flag does.
    #[must_use]
    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        if backend != BackendPreference::Auto {
            self.backend = backend;
        }
        self
    }

    #[must_use]
    pub fn with_infer_dependencies(mut self, infer: bool) -> Self {
        self.infer_dependencies = infer;
        self
    }

    #[must_use]
    pub fn backend(&self) -> BackendPreference {
        self.backend
    }

    #[must_use]
    pub fn infer_dependencies(&self) -> bool {
        self.infer_dependencies
    }

    #[must_use]
    pub fn ignore_paths(&self) -> &[String] {
        &self.ignore_paths
    }

    #[must_use]
    pub fn bundle_depth(&self) -> BundleDepth {
        self.bundle_depth
    }

    #[must_use]
    pub fn poetry_bin(&self) -> &str {
        &self.poetry_bin
    }

    #[must_use]
    pub fn uv_bin(&self) -> &str {
        &self.uv_bin
    }
}
