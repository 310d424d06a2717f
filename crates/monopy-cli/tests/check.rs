use assert_cmd::cargo::cargo_bin_cmd;

mod common;

use common::{parse_json, poetry_workspace, uv_workspace, write};

#[test]
fn declared_workspace_is_in_sync() {
    let (_tmp, root) = poetry_workspace("check-clean");
    let assert = cargo_bin_cmd!("monopy")
        .current_dir(&root)
        .args(["--json", "check"])
        .assert()
        .success();
    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "ok");
    assert!(payload["details"]["outOfSyncMessage"].is_null());
}

#[test]
fn inferred_imports_report_missing_dependencies() {
    let (_tmp, root) = poetry_workspace("check-infer");
    let assert = cargo_bin_cmd!("monopy")
        .current_dir(&root)
        .args(["--json", "check", "--infer"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "user-error");
    assert_eq!(
        payload["details"]["outOfSyncMessage"],
        "Project app1 is out of sync. Missing dependencies: lib2"
    );
    assert_eq!(payload["details"]["actions"][0]["type"], "addDependency");
    assert_eq!(payload["details"]["actions"][0]["dependency"], "lib2");
}

#[test]
fn inference_can_be_enabled_from_the_root_manifest() {
    let (_tmp, root) = poetry_workspace("check-config");
    write(
        &root,
        "pyproject.toml",
        "[tool.monopy]\nbackend = \"poetry\"\ninfer-dependencies = true\n",
    );
    cargo_bin_cmd!("monopy")
        .current_dir(&root)
        .env_remove("MONOPY_INFER_DEPENDENCIES")
        .args(["--json", "check"])
        .assert()
        .code(1);
    cargo_bin_cmd!("monopy")
        .current_dir(&root)
        .env_remove("MONOPY_INFER_DEPENDENCIES")
        .args(["--json", "check", "--no-infer"])
        .assert()
        .success();
}

#[test]
fn implicit_dependencies_must_be_declared() {
    let (_tmp, root) = poetry_workspace("check-implicit");
    write(
        &root,
        "libs/lib2/pyproject.toml",
        "[tool.poetry]\nname = \"lib2\"\nversion = \"0.3.0\"\n\n[tool.monopy]\nimplicit-dependencies = [\"dep1\"]\n",
    );
    let assert = cargo_bin_cmd!("monopy")
        .current_dir(&root)
        .args(["--json", "check"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(
        payload["details"]["outOfSyncMessage"],
        "Project lib2 is out of sync. Missing dependencies: dep1"
    );
}

#[test]
fn uv_root_must_list_every_member() {
    let (_tmp, root) = uv_workspace("check-uv");
    let assert = cargo_bin_cmd!("monopy")
        .current_dir(&root)
        .args(["--json", "--backend", "uv", "check"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(
        payload["details"]["outOfSyncMessage"],
        "Root pyproject.toml is out of sync. Missing workspace member: libs/dep1"
    );
    assert_eq!(payload["details"]["actions"][0]["type"], "rootMember");
}

#[test]
fn missing_backend_is_reported_before_repair() {
    let (_tmp, root) = poetry_workspace("check-fix");
    let assert = cargo_bin_cmd!("monopy")
        .current_dir(&root)
        .env("MONOPY_POETRY_BIN", "monopy-test-missing-poetry")
        .args(["--json", "check", "--infer", "--fix"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["reason"], "tool_missing");
    let manifest = std::fs::read_to_string(root.join("apps/app1/pyproject.toml")).expect("manifest");
    assert!(!manifest.contains("lib2"), "{manifest}");
}
