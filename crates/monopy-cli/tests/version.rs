use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use toml_edit::DocumentMut;

mod common;

use common::{parse_json, poetry_workspace};

#[test]
fn version_reports_and_updates_the_manifest() {
    let (_tmp, root) = poetry_workspace("version-set");
    let assert = cargo_bin_cmd!("monopy")
        .current_dir(&root)
        .args(["--json", "version", "dep1"])
        .assert()
        .success();
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["version"], "1.2.0");

    cargo_bin_cmd!("monopy")
        .current_dir(&root)
        .args(["--json", "version", "dep1", "1.3.0"])
        .assert()
        .success();
    let contents = fs::read_to_string(root.join("libs/dep1/pyproject.toml")).expect("manifest");
    let doc: DocumentMut = contents.parse().expect("valid toml");
    assert_eq!(doc["tool"]["poetry"]["version"].as_str(), Some("1.3.0"));
    assert_eq!(doc["tool"]["poetry"]["name"].as_str(), Some("dep1"));
}

#[test]
fn dependency_version_comes_from_the_local_project() {
    let (_tmp, root) = poetry_workspace("version-dependency");
    let assert = cargo_bin_cmd!("monopy")
        .current_dir(&root)
        .args(["--json", "version", "app1", "--dependency", "dep1"])
        .assert()
        .success();
    let payload = parse_json(&assert);
    assert_eq!(payload["message"], "dep1 1.2.0");
    assert_eq!(payload["details"]["group"], "main");
}

#[test]
fn unknown_project_is_a_user_error() {
    let (_tmp, root) = poetry_workspace("version-missing");
    let assert = cargo_bin_cmd!("monopy")
        .current_dir(&root)
        .args(["--json", "version", "ghost"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "user-error");
    assert_eq!(payload["details"]["reason"], "project_not_found");
    assert_eq!(payload["command"], "version");
}

#[test]
fn build_without_backend_fails_cleanly() {
    let (_tmp, root) = poetry_workspace("build-missing");
    let assert = cargo_bin_cmd!("monopy")
        .current_dir(&root)
        .env("MONOPY_POETRY_BIN", "monopy-test-missing-poetry")
        .args(["--json", "build", "app1"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["reason"], "tool_missing");
    assert!(!root.join("dist").exists());
}
