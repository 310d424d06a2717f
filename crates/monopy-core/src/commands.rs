//! Command entry points used by the CLI.
//!
//! Each function resolves its target project, drives the selected
//! [`Provider`] and folds the result (or error) into an
//! [`ExecutionOutcome`].

use std::path::PathBuf;

use anyhow::Result;
use monopy_domain::Project;
use serde_json::{json, Value};

use crate::build::BuildRequest;
use crate::context::WorkspaceContext;
use crate::outcome::ExecutionOutcome;
use crate::provider::{
    provider_for, AddRequest, EnvRequest, ExportRequest, LockRequest, Provider, PublishRequest,
    RemoveRequest, UpdateRequest,
};
use crate::sync::{detect, expected_edges, SyncOptions};

fn outcome(command: impl FnOnce() -> Result<ExecutionOutcome>) -> ExecutionOutcome {
    command().unwrap_or_else(|err| {
        tracing::debug!(error = ?err, "command failed");
        ExecutionOutcome::from_error(&err)
    })
}

fn sync_options(ctx: &WorkspaceContext, infer: Option<bool>) -> SyncOptions {
    SyncOptions {
        infer_dependencies: infer.unwrap_or_else(|| ctx.config().infer_dependencies()),
    }
}

/// Resolve `name`, or the workspace root aggregator when `None`.
fn target(ctx: &WorkspaceContext, name: Option<&str>) -> Result<Option<Project>> {
    name.map(|name| ctx.project(name).cloned()).transpose()
}

fn prepared<'a>(ctx: &'a WorkspaceContext) -> Result<Box<dyn Provider + 'a>> {
    let provider = provider_for(ctx);
    provider.check_prerequisites()?;
    Ok(provider)
}

#[derive(Debug, Clone, Default)]
pub struct GraphRequest {
    pub infer_dependencies: Option<bool>,
    /// Also report the local dependencies, dependents and module folders of
    /// this project.
    pub project: Option<String>,
}

pub fn graph(ctx: &WorkspaceContext, request: &GraphRequest) -> ExecutionOutcome {
    outcome(|| {
        let edges = expected_edges(ctx, sync_options(ctx, request.infer_dependencies))?;
        let projects: Vec<&str> = ctx.registry().iter().map(|project| project.name.as_str()).collect();
        let mut details = json!({
            "backend": ctx.backend(),
            "projects": projects,
            "edges": edges,
        });
        if let Some(name) = &request.project {
            let project = ctx.project(name)?;
            let provider = provider_for(ctx);
            details["project"] = json!({
                "name": project.name,
                "root": project.root,
                "dependencies": provider.dependencies(project)?,
                "dependents": provider
                    .dependents(project)?
                    .into_iter()
                    .map(|dependent| dependent.name)
                    .collect::<Vec<_>>(),
                "moduleFolders": provider.module_folders(project),
            });
        }
        Ok(ExecutionOutcome::success(
            format!("{} edges across {} projects", edges.len(), projects.len()),
            details,
        ))
    })
}

#[derive(Debug, Clone, Default)]
pub struct CheckRequest {
    pub fix: bool,
    pub infer_dependencies: Option<bool>,
}

/// Detect drift; with `fix`, repair it and refresh every touched project.
pub fn check(ctx: &WorkspaceContext, request: &CheckRequest) -> ExecutionOutcome {
    outcome(|| {
        let report = detect(ctx, sync_options(ctx, request.infer_dependencies))?;
        let message = report.out_of_sync_message();
        let mut details = json!({
            "outOfSyncMessage": message,
            "messages": &report.messages,
            "actions": &report.actions,
        });
        let Some(message) = message else {
            return Ok(ExecutionOutcome::success("workspace is in sync", details));
        };
        if !request.fix {
            return Ok(ExecutionOutcome::user_error(message, details));
        }
        let provider = prepared(ctx)?;
        let refreshed = report.repair(provider.as_ref())?;
        details["refreshed"] = json!(refreshed);
        Ok(ExecutionOutcome::success(
            format!("repaired {} out-of-sync declarations", details["actions"].as_array().map_or(0, Vec::len)),
            details,
        ))
    })
}

pub fn add(ctx: &WorkspaceContext, project: &str, request: &AddRequest) -> ExecutionOutcome {
    outcome(|| {
        let project = ctx.project(project)?;
        prepared(ctx)?.add(project, request)?;
        Ok(ExecutionOutcome::success(
            format!("added {} to {}", request.name, project.name),
            json!({ "project": project.name, "dependency": request.name, "local": request.local }),
        ))
    })
}

pub fn remove(ctx: &WorkspaceContext, project: &str, request: &RemoveRequest) -> ExecutionOutcome {
    outcome(|| {
        let project = ctx.project(project)?;
        prepared(ctx)?.remove(project, request)?;
        Ok(ExecutionOutcome::success(
            format!("removed {} from {}", request.name, project.name),
            json!({ "project": project.name, "dependency": request.name }),
        ))
    })
}

pub fn update(ctx: &WorkspaceContext, project: &str, request: &UpdateRequest) -> ExecutionOutcome {
    outcome(|| {
        let project = ctx.project(project)?;
        prepared(ctx)?.update(project, request)?;
        let message = match &request.name {
            Some(name) => format!("updated {name} in {}", project.name),
            None => format!("updated {}", project.name),
        };
        Ok(ExecutionOutcome::success(
            message,
            json!({ "project": project.name, "dependency": request.name }),
        ))
    })
}

pub fn lock(ctx: &WorkspaceContext, project: Option<&str>, request: &LockRequest) -> ExecutionOutcome {
    outcome(|| {
        let project = target(ctx, project)?;
        prepared(ctx)?.lock(project.as_ref(), request)?;
        let name = project.map_or_else(|| ctx.root_project().name, |project| project.name);
        Ok(ExecutionOutcome::success(format!("locked {name}"), json!({ "project": name })))
    })
}

pub fn sync(ctx: &WorkspaceContext, project: &str, request: &EnvRequest) -> ExecutionOutcome {
    outcome(|| {
        let project = ctx.project(project)?;
        prepared(ctx)?.sync(project, request)?;
        Ok(ExecutionOutcome::success(
            format!("synced {}", project.name),
            json!({ "project": project.name }),
        ))
    })
}

pub fn install(ctx: &WorkspaceContext, project: Option<&str>, request: &EnvRequest) -> ExecutionOutcome {
    outcome(|| {
        let project = target(ctx, project)?;
        prepared(ctx)?.install(project.as_ref(), request)?;
        let name = project.map_or_else(|| ctx.root_project().name, |project| project.name);
        Ok(ExecutionOutcome::success(format!("installed {name}"), json!({ "project": name })))
    })
}

pub fn build(ctx: &WorkspaceContext, project: &str, request: &BuildRequest) -> ExecutionOutcome {
    outcome(|| {
        let project = ctx.project(project)?;
        let output = prepared(ctx)?.build(project, request)?;
        let mut details = json!({
            "success": true,
            "outputPath": output.output_path,
            "artifacts": output.artifacts,
        });
        if output.retained {
            details["buildFolderPath"] = json!(output.build_folder_path);
        }
        let message = if request.skip_build {
            format!("prepared {} in {}", project.name, output.build_folder_path.display())
        } else {
            format!("built {} artifacts for {}", output.artifacts.len(), project.name)
        };
        Ok(ExecutionOutcome::success(message, details))
    })
}

pub fn publish(ctx: &WorkspaceContext, project: &str, request: &PublishRequest) -> ExecutionOutcome {
    outcome(|| {
        let project = ctx.project(project)?;
        let output = prepared(ctx)?.publish(project, request)?;
        let message = if output.already_published {
            format!("{} is already published", project.name)
        } else if request.dry_run {
            format!("dry run for {} finished", project.name)
        } else {
            format!("published {}", project.name)
        };
        Ok(ExecutionOutcome::success(
            message,
            json!({
                "success": true,
                "alreadyPublished": output.already_published,
                "dryRun": request.dry_run,
            }),
        ))
    })
}

/// Run a command inside the project environment. The child's exit code is
/// reported as `details.exitCode`.
pub fn run(ctx: &WorkspaceContext, project: &str, args: &[String]) -> ExecutionOutcome {
    outcome(|| {
        let project = ctx.project(project)?;
        let code = prepared(ctx)?.run(project, args)?;
        let details = json!({ "exitCode": code, "passthrough": true });
        if code == 0 {
            Ok(ExecutionOutcome::success(String::new(), details))
        } else {
            Ok(ExecutionOutcome::failure(format!("command exited with code {code}"), details))
        }
    })
}

#[derive(Debug, Clone, Default)]
pub struct VersionRequest {
    /// New version to write; reports the current one when `None`.
    pub set: Option<String>,
    /// Report the metadata of this local dependency instead.
    pub dependency: Option<String>,
}

pub fn version(ctx: &WorkspaceContext, project: &str, request: &VersionRequest) -> ExecutionOutcome {
    outcome(|| {
        let project = ctx.project(project)?;
        let provider = provider_for(ctx);
        if let Some(dependency) = &request.dependency {
            let Some(metadata) = provider.dependency_metadata(project, dependency)? else {
                return Ok(ExecutionOutcome::user_error(
                    format!("{} has no local dependency named {dependency}", project.name),
                    json!({ "project": project.name, "reason": "dependency_not_found" }),
                ));
            };
            return Ok(ExecutionOutcome::success(
                format!(
                    "{} {}",
                    metadata.name.as_deref().unwrap_or(dependency),
                    metadata.version.as_deref().unwrap_or("unknown")
                ),
                json!(metadata),
            ));
        }
        if let Some(version) = &request.set {
            provider.update_version(project, version)?;
        }
        let metadata = provider.metadata(project)?;
        let message = format!(
            "{} {}",
            metadata.name.as_deref().unwrap_or(&project.name),
            metadata.version.as_deref().unwrap_or("unknown")
        );
        Ok(ExecutionOutcome::success(message, json!(metadata)))
    })
}

pub fn export(ctx: &WorkspaceContext, project: &str, request: &ExportRequest) -> ExecutionOutcome {
    outcome(|| {
        let project = ctx.project(project)?;
        let path: PathBuf = prepared(ctx)?.export_requirements(project, request)?;
        Ok(ExecutionOutcome::success(
            format!("wrote {}", path.display()),
            json!({ "path": path }),
        ))
    })
}

/// `details.exitCode` of a passthrough outcome, if any.
#[must_use]
pub fn exit_code(details: &Value) -> Option<i32> {
    details
        .get("exitCode")
        .and_then(Value::as_i64)
        .and_then(|code| i32::try_from(code).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::outcome::CommandStatus;
    use crate::testing::FakeRunner;
    use monopy_domain::MemoryTree;
    use std::sync::Arc;

    fn workspace(runner: &Arc<FakeRunner>) -> WorkspaceContext {
        let tree = MemoryTree::new()
            .with_file(
                "pyproject.toml",
                "[tool.monopy]\nbackend = \"poetry\"\n",
            )
            .with_file(
                "apps/app1/pyproject.toml",
                "[tool.poetry]\nname = \"app1\"\nversion = \"0.1.0\"\n\n[tool.poetry.dependencies]\npython = \"^3.11\"\ndep1 = { path = \"../../libs/dep1\", develop = true }\n",
            )
            .with_file(
                "apps/app1/app1/main.py",
                "import dep1\nimport lib2\n",
            )
            .with_file(
                "libs/dep1/pyproject.toml",
                "[tool.poetry]\nname = \"dep1\"\nversion = \"1.2.0\"\n",
            )
            .with_file(
                "libs/lib2/pyproject.toml",
                "[tool.poetry]\nname = \"lib2\"\nversion = \"0.3.0\"\n",
            )
            .with_file("libs/lib2/lib2/__init__.py", "")
            .with_file("libs/dep1/dep1/__init__.py", "");
        WorkspaceContext::new(
            "/ws",
            Arc::new(tree),
            runner.clone(),
            Config::default().with_infer_dependencies(true),
        )
        .expect("context")
    }

    #[test]
    fn graph_reports_edges_and_project_neighbours() {
        let runner = Arc::new(FakeRunner::default());
        let ctx = workspace(&runner);
        let outcome = graph(
            &ctx,
            &GraphRequest {
                infer_dependencies: None,
                project: Some("dep1".into()),
            },
        );
        assert!(outcome.is_success(), "{}", outcome.message);
        let edges = outcome.details["edges"].as_array().expect("edges");
        assert!(edges
            .iter()
            .any(|edge| edge["source"] == "app1" && edge["target"] == "lib2" && edge["type"] == "dynamic"));
        assert_eq!(outcome.details["project"]["dependents"], json!(["app1"]));
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn check_without_fix_is_a_user_error() {
        let runner = Arc::new(FakeRunner::default());
        let ctx = workspace(&runner);
        let outcome = check(&ctx, &CheckRequest::default());
        assert_eq!(outcome.status, CommandStatus::UserError);
        assert_eq!(
            outcome.details["outOfSyncMessage"],
            "Project app1 is out of sync. Missing dependencies: lib2"
        );
    }

    #[test]
    fn unknown_projects_are_user_errors() {
        let runner = Arc::new(FakeRunner::default());
        let ctx = workspace(&runner);
        let outcome = version(&ctx, "ghost", &VersionRequest::default());
        assert_eq!(outcome.status, CommandStatus::UserError);
        assert_eq!(outcome.details["reason"], "project_not_found");
    }

    #[test]
    fn version_reports_local_dependency_metadata() {
        let runner = Arc::new(FakeRunner::default());
        let ctx = workspace(&runner);
        let outcome = version(
            &ctx,
            "app1",
            &VersionRequest {
                set: None,
                dependency: Some("dep1".into()),
            },
        );
        assert!(outcome.is_success(), "{}", outcome.message);
        assert_eq!(outcome.message, "dep1 1.2.0");
        assert_eq!(outcome.details["group"], "main");
    }

    #[test]
    fn failing_run_keeps_the_child_exit_code() {
        let runner = Arc::new(FakeRunner::default().respond("poetry run", 3, "", ""));
        let ctx = workspace(&runner);
        let outcome = run(&ctx, "app1", &["pytest".to_string()]);
        assert_eq!(outcome.status, CommandStatus::Failure);
        assert_eq!(exit_code(&outcome.details), Some(3));
    }
}
