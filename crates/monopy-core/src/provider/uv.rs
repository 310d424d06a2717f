use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use pep440_rs::Version;

use monopy_domain::{relative_path, Manifest, Project, UV_LOCK};

use super::backend::{check_status, ALREADY_PUBLISHED};
use super::versioning::{uv_export_args, uv_lock_args};
use super::{
    verbosity_args, AddRequest, Backend, Cascade, EnvRequest, ExportRequest, LockRequest,
    Operation, Provider, PublishOutput, PublishRequest, RemoveRequest, UpdateRequest,
};
use crate::build::{
    lock_for, run_build, ArtifactFormat, BuildBackend, BuildBundle, BuildOutput, BuildRequest,
    LockedExport,
};
use crate::context::{BackendKind, WorkspaceContext};

/// uv strategy.
///
/// With a workspace `uv.lock` every command runs at the workspace root with
/// `--project <member>` and one lock covers all members, so nothing
/// cascades between projects.
pub struct UvProvider<'a> {
    ctx: &'a WorkspaceContext,
}

impl<'a> UvProvider<'a> {
    #[must_use]
    pub fn new(ctx: &'a WorkspaceContext) -> Self {
        Self { ctx }
    }

    fn backend(&self) -> Backend<'a> {
        Backend::new(self.ctx, BackendKind::Uv)
    }

    fn workspace_mode(&self) -> bool {
        self.ctx.uv_workspace_mode()
    }

    /// Working directory and trailing `--project` arguments for commands
    /// about `project`.
    fn target(&self, project: &Project) -> (PathBuf, Vec<String>) {
        if self.workspace_mode() {
            (PathBuf::new(), vec!["--project".to_string(), project_arg(project)])
        } else {
            (project.root.clone(), Vec::new())
        }
    }

    fn env_args(mut args: Vec<String>, request: &EnvRequest) -> Vec<String> {
        args.extend(verbosity_args(request.verbose));
        args.extend(request.args.iter().cloned());
        if let Some(dir) = &request.cache_dir {
            args.push("--cache-dir".into());
            args.push(dir.display().to_string());
        }
        args
    }

    fn sync_at(&self, project: &Project, request: &EnvRequest) -> Result<()> {
        let (cwd, target) = self.target(project);
        let mut args = Self::env_args(vec!["sync".to_string()], request);
        args.extend(target);
        self.backend().exec(&cwd, args, Operation::Sync)?;
        Ok(())
    }

    fn cascade(&self, project: &Project) -> Result<()> {
        let mut cascade = Cascade::new(self);
        cascade.propagate(project)?;
        cascade.require_root(project);
        let refreshed = cascade.finish()?;
        tracing::debug!(origin = %project.name, ?refreshed, "cascade finished");
        Ok(())
    }

    fn package_name(&self, project: &Project) -> Result<String> {
        Ok(self
            .ctx
            .manifest(project)?
            .package_name
            .unwrap_or_else(|| project.name.clone()))
    }

    fn lock_path(&self, project: &Project) -> PathBuf {
        if self.workspace_mode() {
            PathBuf::from(UV_LOCK)
        } else {
            project.root.join(UV_LOCK)
        }
    }
}

fn project_arg(project: &Project) -> String {
    if project.is_workspace_root() {
        ".".to_string()
    } else {
        project.root.display().to_string()
    }
}

impl Provider for UvProvider<'_> {
    fn context(&self) -> &WorkspaceContext {
        self.ctx
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Uv
    }

    fn check_prerequisites(&self) -> Result<()> {
        self.backend().check()
    }

    fn backend_version(&self) -> Result<Version> {
        self.backend().version(Path::new(""))
    }

    fn add(&self, project: &Project, request: &AddRequest) -> Result<()> {
        self.check_prerequisites()?;
        let (cwd, target) = self.target(project);
        let mut args = vec!["add".to_string()];
        if request.local {
            let dependency = self.ctx.project(&request.name)?;
            tracing::info!("Adding {} local dependency", dependency.name);
            args.push("--editable".into());
            args.push(relative_path(&cwd, &dependency.root));
        } else {
            tracing::info!("Adding {} dependency", request.name);
            args.push(request.name.clone());
        }
        if let Some(group) = &request.group {
            args.push("--group".into());
            args.push(group.clone());
        }
        for extra in &request.extras {
            args.push("--extra".into());
            args.push(extra.clone());
        }
        args.extend(request.args.iter().cloned());
        args.extend(target);
        self.backend().exec(&cwd, args, Operation::Dependency)?;
        self.cascade(project)
    }

    fn update(&self, project: &Project, request: &UpdateRequest) -> Result<()> {
        self.check_prerequisites()?;
        let (cwd, target) = self.target(project);
        let mut args = vec!["lock".to_string()];
        match &request.name {
            Some(name) => {
                let package = if request.local {
                    self.package_name(self.ctx.project(name)?)?
                } else {
                    name.clone()
                };
                tracing::info!("Updating {package} dependency");
                args.push("--upgrade-package".into());
                args.push(package);
            }
            None => args.push("--upgrade".into()),
        }
        args.extend(request.args.iter().cloned());
        args.extend(target);
        self.backend().exec(&cwd, args, Operation::Lock)?;
        self.sync_at(project, &EnvRequest::default())?;
        self.cascade(project)
    }

    fn remove(&self, project: &Project, request: &RemoveRequest) -> Result<()> {
        self.check_prerequisites()?;
        let name = if request.local {
            self.package_name(self.ctx.project(&request.name)?)?
        } else {
            request.name.clone()
        };
        tracing::info!("Removing {name} dependency");
        let (cwd, target) = self.target(project);
        let mut args = vec!["remove".to_string(), name];
        args.extend(target);
        args.extend(request.args.iter().cloned());
        self.backend().exec(&cwd, args, Operation::Dependency)?;
        self.cascade(project)
    }

    fn lock(&self, project: Option<&Project>, request: &LockRequest) -> Result<()> {
        self.check_prerequisites()?;
        let cwd = match project {
            Some(project) if !self.workspace_mode() => project.root.clone(),
            _ => PathBuf::new(),
        };
        let env = EnvRequest {
            args: request.args.clone(),
            verbose: request.verbose,
            cache_dir: request.cache_dir.clone(),
        };
        let args = Self::env_args(uv_lock_args(request.update), &env);
        self.backend().exec(&cwd, args, Operation::Lock)?;
        Ok(())
    }

    fn sync(&self, project: &Project, request: &EnvRequest) -> Result<()> {
        self.check_prerequisites()?;
        self.sync_at(project, request)
    }

    fn install(&self, project: Option<&Project>, request: &EnvRequest) -> Result<()> {
        self.check_prerequisites()?;
        match project {
            Some(project) => self.sync_at(project, request),
            None => {
                let args = Self::env_args(vec!["sync".to_string()], request);
                self.backend().exec(Path::new(""), args, Operation::Sync)?;
                Ok(())
            }
        }
    }

    fn build(&self, project: &Project, request: &BuildRequest) -> Result<BuildOutput> {
        self.check_prerequisites()?;
        run_build(self, project, request)
    }

    fn publish(&self, project: &Project, request: &PublishRequest) -> Result<PublishOutput> {
        if request.dry_run {
            tracing::warn!("uv publish has no dry-run mode; building only");
        }
        let mut build = request.build.clone();
        build.keep_build_folder = true;
        build.skip_build = false;
        let output = self.build(project, &build)?;
        let folder = output.build_folder_path;
        let published = if request.dry_run {
            Ok(false)
        } else {
            let mut args = vec!["publish".to_string()];
            if let Some(repository) = &request.repository {
                args.push("--index".into());
                args.push(repository.clone());
            }
            args.extend(request.args.iter().cloned());
            let invocation = self.backend().invocation(&folder, args);
            tracing::info!(command = %invocation.display(), "Running command");
            self.ctx.runner().run_streaming(&invocation).and_then(|output| {
                if !output.success() && output.mentions(ALREADY_PUBLISHED) {
                    tracing::warn!("This version is already published; skipping");
                    return Ok(true);
                }
                check_status(&invocation, output, Operation::Publish).map(|_| false)
            })
        };
        if let Err(err) = fs::remove_dir_all(&folder) {
            tracing::warn!(path = %folder.display(), %err, "failed to remove build folder");
        }
        let already_published = published?;
        Ok(PublishOutput {
            build_folder_path: folder,
            already_published,
        })
    }

    fn run(&self, project: &Project, args: &[String]) -> Result<i32> {
        self.check_prerequisites()?;
        let (cwd, target) = self.target(project);
        let mut command = vec!["run".to_string()];
        command.extend(target);
        command.extend(args.iter().cloned());
        let invocation = self.backend().invocation(&cwd, command);
        Ok(self.ctx.runner().run_passthrough(&invocation)?.code)
    }

    fn export_requirements(&self, project: &Project, request: &ExportRequest) -> Result<PathBuf> {
        self.check_prerequisites()?;
        let version = self.backend().version(Path::new(""))?;
        let output = request.output.clone().unwrap_or_else(|| "requirements.txt".to_string());
        let path = self.ctx.abs(&project.root.join(output));
        let mut args = uv_export_args(&version, &project_arg(project), false);
        for extra in &request.extras {
            args.push("--extra".into());
            args.push(extra.clone());
        }
        args.push("--output-file".into());
        args.push(path.display().to_string());
        self.backend().exec(Path::new(""), args, Operation::Export)?;
        Ok(path)
    }

    fn refresh_project(&self, project: &Project) -> Result<()> {
        if self.workspace_mode() {
            return Ok(());
        }
        self.backend()
            .exec(&project.root, vec!["sync".into()], Operation::Sync)?;
        Ok(())
    }

    fn refresh_root(&self) -> Result<()> {
        self.backend()
            .exec(Path::new(""), vec!["sync".into()], Operation::Sync)?;
        Ok(())
    }

    fn propagates(&self) -> bool {
        !self.workspace_mode()
    }

    fn needs_root_refresh(&self, _project: &Project) -> bool {
        self.workspace_mode()
    }
}

impl BuildBackend for UvProvider<'_> {
    fn context(&self) -> &WorkspaceContext {
        self.ctx
    }

    fn export_locked(
        &self,
        project: &Project,
        _manifest: &Manifest,
        dev: bool,
        _bundle: &BuildBundle,
    ) -> Result<LockedExport> {
        if !self.ctx.tree().exists(&self.lock_path(project)) {
            tracing::info!(project = %project.name, "Generating uv.lock");
            let cwd = if self.workspace_mode() {
                PathBuf::new()
            } else {
                project.root.clone()
            };
            self.backend().exec(&cwd, vec!["lock".into()], Operation::Lock)?;
        }
        let version = self.backend().version(Path::new(""))?;
        let args = uv_export_args(&version, &project_arg(project), dev);
        let output = self.backend().exec(Path::new(""), args, Operation::Export)?;
        let base_dir = if self.workspace_mode() {
            PathBuf::new()
        } else {
            project.root.clone()
        };
        Ok(LockedExport {
            text: output.stdout,
            lock: lock_for(self.ctx, project)?,
            base_dir,
        })
    }

    fn build_artifacts(&self, bundle_dir: &Path, format: Option<ArtifactFormat>) -> Result<()> {
        let mut args = vec!["build".to_string()];
        if let Some(format) = format {
            args.push(format!("--{}", format.as_str()));
        }
        self.backend().exec(bundle_dir, args, Operation::Build)?;
        Ok(())
    }
}
