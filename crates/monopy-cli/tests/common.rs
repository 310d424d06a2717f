#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use assert_cmd::assert::Assert;
use serde_json::Value;
use tempfile::TempDir;

/// A Poetry monorepo: `app1` declares `dep1`, imports `lib2` without
/// declaring it.
pub fn poetry_workspace(prefix: &str) -> (TempDir, PathBuf) {
    let temp = tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("tempdir");
    let root = temp.path().join("monorepo");
    write(&root, "pyproject.toml", "[tool.monopy]\nbackend = \"poetry\"\n");
    write(
        &root,
        "apps/app1/pyproject.toml",
        "[tool.poetry]\nname = \"app1\"\nversion = \"0.1.0\"\n\n[tool.poetry.dependencies]\npython = \"^3.11\"\ndep1 = { path = \"../../libs/dep1\", develop = true }\n",
    );
    write(&root, "apps/app1/app1/__init__.py", "import dep1\nfrom lib2 import helpers\n");
    write(
        &root,
        "libs/dep1/pyproject.toml",
        "[tool.poetry]\nname = \"dep1\"\nversion = \"1.2.0\"\n",
    );
    write(&root, "libs/dep1/dep1/__init__.py", "");
    write(
        &root,
        "libs/lib2/pyproject.toml",
        "[tool.poetry]\nname = \"lib2\"\nversion = \"0.3.0\"\n",
    );
    write(&root, "libs/lib2/lib2/__init__.py", "");
    (temp, root)
}

/// A uv workspace whose root lists only `apps/*` as members.
pub fn uv_workspace(prefix: &str) -> (TempDir, PathBuf) {
    let temp = tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("tempdir");
    let root = temp.path().join("monorepo");
    write(
        &root,
        "pyproject.toml",
        "[project]\nname = \"monorepo\"\nversion = \"0.0.0\"\n\n[tool.uv.workspace]\nmembers = [\"apps/*\"]\n\n[tool.monopy]\n",
    );
    write(
        &root,
        "apps/app1/pyproject.toml",
        "[project]\nname = \"app1\"\nversion = \"0.1.0\"\ndependencies = [\"dep1\"]\n\n[tool.uv.sources]\ndep1 = { workspace = true }\n",
    );
    write(
        &root,
        "libs/dep1/pyproject.toml",
        "[project]\nname = \"dep1\"\nversion = \"1.2.0\"\n",
    );
    (temp, root)
}

pub fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create dirs");
    }
    fs::write(path, contents).expect("write file");
}

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json")
}
