use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;

mod common;

use common::{parse_json, poetry_workspace, uv_workspace};

fn pairs(payload: &Value) -> Vec<(String, String, String)> {
    payload["details"]["edges"]
        .as_array()
        .expect("edges array")
        .iter()
        .map(|edge| {
            (
                edge["source"].as_str().unwrap_or_default().to_string(),
                edge["target"].as_str().unwrap_or_default().to_string(),
                edge["type"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

#[test]
fn graph_lists_declared_edges() {
    let (_tmp, root) = poetry_workspace("graph-declared");
    let assert = cargo_bin_cmd!("monopy")
        .current_dir(&root)
        .args(["--json", "graph"])
        .assert()
        .success();
    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["details"]["backend"], "poetry");
    assert_eq!(
        pairs(&payload),
        vec![("app1".to_string(), "dep1".to_string(), "implicit".to_string())]
    );
    let projects = payload["details"]["projects"].as_array().expect("projects");
    assert_eq!(projects.len(), 3);
}

#[test]
fn graph_infers_edges_from_imports() {
    let (_tmp, root) = poetry_workspace("graph-infer");
    let assert = cargo_bin_cmd!("monopy")
        .current_dir(&root)
        .args(["--json", "graph", "--infer"])
        .assert()
        .success();
    let edges = pairs(&parse_json(&assert));
    assert!(edges.contains(&("app1".to_string(), "lib2".to_string(), "dynamic".to_string())));
    assert_eq!(
        edges
            .iter()
            .filter(|(source, target, _)| source == "app1" && target == "dep1")
            .count(),
        1,
        "edge kinds are not duplicated per pair: {edges:?}"
    );
}

#[test]
fn graph_reports_project_neighbours() {
    let (_tmp, root) = poetry_workspace("graph-project");
    let assert = cargo_bin_cmd!("monopy")
        .current_dir(root.join("apps/app1"))
        .args(["--json", "graph", "--project", "dep1"])
        .assert()
        .success();
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["project"]["dependents"], serde_json::json!(["app1"]));
}

#[test]
fn uv_workspace_sources_resolve_by_package_name() {
    let (_tmp, root) = uv_workspace("graph-uv");
    let assert = cargo_bin_cmd!("monopy")
        .current_dir(&root)
        .args(["--json", "--backend", "uv", "graph"])
        .assert()
        .success();
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["backend"], "uv");
    assert_eq!(
        pairs(&payload),
        vec![("app1".to_string(), "dep1".to_string(), "implicit".to_string())]
    );
}

#[test]
fn human_output_prints_an_edge_table() {
    let (_tmp, root) = poetry_workspace("graph-human");
    let assert = cargo_bin_cmd!("monopy")
        .current_dir(&root)
        .args(["--no-color", "graph"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(stdout.contains("1 edges across 3 projects"), "{stdout}");
    assert!(stdout.contains("Depends on"), "{stdout}");
    assert!(stdout.contains("dep1"), "{stdout}");
}
