use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pep440_rs::Version;

use monopy_domain::{relative_path, Manifest, Project};

use super::backend::{check_status, ALREADY_PUBLISHED};
use super::versioning::{
    poetry_export_args, poetry_lock_args, poetry_remove_supports_lock, poetry_sync_args,
};
use super::{
    local_spec, names_match, verbosity_args, AddRequest, Backend, Cascade, EnvRequest,
    ExportRequest, LockRequest, Operation, Provider, PublishOutput, PublishRequest, RemoveRequest,
    UpdateRequest,
};
use crate::build::{
    lock_for, run_build, ArtifactFormat, BuildBackend, BuildBundle, BuildOutput, BuildRequest,
    LockedExport,
};
use crate::context::{BackendKind, WorkspaceContext};
use crate::effects::Invocation;

const EXPORT_PLUGIN: &str = "poetry-plugin-export";
const MISSING_EXPORT: &str = "The command \"export\" does not exist";
const CACHE_ENV: &str = "POETRY_CACHE_DIR";

pub struct PoetryProvider<'a> {
    ctx: &'a WorkspaceContext,
}

impl<'a> PoetryProvider<'a> {
    #[must_use]
    pub fn new(ctx: &'a WorkspaceContext) -> Self {
        Self { ctx }
    }

    fn backend(&self) -> Backend<'a> {
        Backend::new(self.ctx, BackendKind::Poetry)
    }

    fn shared_env(&self) -> bool {
        self.ctx.poetry_shared_env()
    }

    fn version_in(&self, cwd: &Path) -> Result<Version> {
        self.backend().version(cwd)
    }

    fn lock_at(&self, cwd: &Path) -> Result<()> {
        let version = self.version_in(cwd)?;
        self.backend()
            .exec(cwd, poetry_lock_args(&version, false), Operation::Lock)?;
        Ok(())
    }

    fn env_invocation(&self, cwd: &Path, mut args: Vec<String>, request: &EnvRequest) -> Invocation {
        args.extend(request.args.iter().cloned());
        args.extend(verbosity_args(request.verbose));
        let invocation = self.backend().invocation(cwd, args);
        match &request.cache_dir {
            Some(dir) => invocation.env(CACHE_ENV, dir.display().to_string()),
            None => invocation,
        }
    }

    /// Run `cascade` from `project` after its dependencies changed.
    fn cascade(&self, project: &Project, refresh_origin: bool) -> Result<()> {
        let mut cascade = Cascade::new(self);
        if refresh_origin {
            cascade.refresh(project)?;
        }
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

    fn ensure_export_plugin(&self, cwd: &Path) -> Result<()> {
        let help = self
            .backend()
            .capture(cwd, vec!["export".into(), "--help".into()])?;
        if help.success() || !help.mentions(MISSING_EXPORT) {
            return Ok(());
        }
        tracing::info!("Installing {EXPORT_PLUGIN}");
        self.backend().exec(
            cwd,
            vec!["self".into(), "add".into(), EXPORT_PLUGIN.into()],
            Operation::Export,
        )?;
        Ok(())
    }

    /// Stream `poetry publish` from the bundle; true when the registry
    /// already holds this version.
    fn publish_from(&self, folder: &Path, request: &PublishRequest) -> Result<bool> {
        let mut args = vec!["publish".to_string()];
        if request.dry_run {
            args.push("--dry-run".into());
        }
        args.extend(request.args.iter().cloned());
        if let Some(repository) = &request.repository {
            args.push("--repository".into());
            args.push(repository.clone());
        }
        let invocation = self.backend().invocation(folder, args);
        tracing::info!(command = %invocation.display(), "Running command");
        let output = self.ctx.runner().run_streaming(&invocation)?;
        if !output.success() && output.mentions(ALREADY_PUBLISHED) {
            tracing::warn!("This version is already published; skipping");
            return Ok(true);
        }
        check_status(&invocation, output, Operation::Publish)?;
        Ok(false)
    }
}

impl Provider for PoetryProvider<'_> {
    fn context(&self) -> &WorkspaceContext {
        self.ctx
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Poetry
    }

    fn check_prerequisites(&self) -> Result<()> {
        self.backend().check()
    }

    fn backend_version(&self) -> Result<Version> {
        self.version_in(Path::new(""))
    }

    fn add(&self, project: &Project, request: &AddRequest) -> Result<()> {
        self.check_prerequisites()?;
        if request.local {
            let dependency = self.ctx.project(&request.name)?.clone();
            tracing::info!("Adding {} local dependency", dependency.name);
            let key = self.package_name(&dependency)?;
            let mut manifest = self.ctx.manifest(project)?;
            let path = relative_path(&project.root, &dependency.root);
            manifest.set_dependency(request.group.as_deref(), &key, local_spec(path, &request.extras));
            self.ctx.write_manifest(project, &manifest)?;
            return self.cascade(project, true);
        }

        tracing::info!("Adding {} dependency", request.name);
        let mut args = vec!["add".to_string(), request.name.clone()];
        if let Some(group) = &request.group {
            args.push("--group".into());
            args.push(group.clone());
        }
        args.extend(request.args.iter().cloned());
        for extra in &request.extras {
            args.push(format!("--extras={extra}"));
        }
        if self.shared_env() {
            args.push("--lock".into());
        }
        self.backend().exec(&project.root, args, Operation::Dependency)?;
        self.cascade(project, false)
    }

    fn update(&self, project: &Project, request: &UpdateRequest) -> Result<()> {
        self.check_prerequisites()?;
        if request.local {
            if let Some(name) = &request.name {
                tracing::info!("Updating {name} local dependency");
            }
            return self.cascade(project, true);
        }
        let mut args = vec!["update".to_string()];
        args.extend(request.name.iter().cloned());
        args.extend(request.args.iter().cloned());
        if self.shared_env() {
            args.push("--lock".into());
        }
        self.backend().exec(&project.root, args, Operation::Dependency)?;
        self.cascade(project, false)
    }

    fn remove(&self, project: &Project, request: &RemoveRequest) -> Result<()> {
        self.check_prerequisites()?;
        let name = if request.local {
            let dependency = self.ctx.project(&request.name)?.clone();
            self.package_name(&dependency)?
        } else {
            request.name.clone()
        };
        tracing::info!("Removing {name} dependency");
        let mut args = vec!["remove".to_string(), name];
        args.extend(request.args.iter().cloned());
        if self.shared_env() && poetry_remove_supports_lock(&self.version_in(&project.root)?) {
            args.push("--lock".into());
        }
        self.backend().exec(&project.root, args, Operation::Dependency)?;
        self.cascade(project, false)
    }

    fn lock(&self, project: Option<&Project>, request: &LockRequest) -> Result<()> {
        self.check_prerequisites()?;
        let cwd = project.map_or_else(PathBuf::new, |project| project.root.clone());
        let version = self.version_in(&cwd)?;
        let env = EnvRequest {
            args: request.args.clone(),
            verbose: request.verbose,
            cache_dir: request.cache_dir.clone(),
        };
        let invocation = self.env_invocation(&cwd, poetry_lock_args(&version, request.update), &env);
        self.backend().exec_invocation(&invocation, Operation::Lock)?;
        Ok(())
    }

    fn sync(&self, project: &Project, request: &EnvRequest) -> Result<()> {
        self.check_prerequisites()?;
        let version = self.version_in(&project.root)?;
        let invocation = self.env_invocation(&project.root, poetry_sync_args(&version), request);
        self.backend().exec_invocation(&invocation, Operation::Sync)?;
        Ok(())
    }

    fn install(&self, project: Option<&Project>, request: &EnvRequest) -> Result<()> {
        self.check_prerequisites()?;
        let (cwd, args) = match project {
            Some(project) => (project.root.clone(), vec!["install".to_string()]),
            None => (PathBuf::new(), vec!["install".to_string(), "--no-root".to_string()]),
        };
        let invocation = self.env_invocation(&cwd, args, request);
        self.backend().exec_invocation(&invocation, Operation::Sync)?;
        Ok(())
    }

    fn build(&self, project: &Project, request: &BuildRequest) -> Result<BuildOutput> {
        self.check_prerequisites()?;
        run_build(self, project, request)
    }

    fn publish(&self, project: &Project, request: &PublishRequest) -> Result<PublishOutput> {
        let mut build = request.build.clone();
        build.keep_build_folder = true;
        build.skip_build = false;
        let output = self.build(project, &build)?;
        let folder = output.build_folder_path;
        let published = self.publish_from(&folder, request);
        if let Err(err) = fs::remove_dir_all(&folder) {
            tracing::warn!(path = %folder.display(), %err, "failed to remove build folder");
        }
        Ok(PublishOutput {
            build_folder_path: folder,
            already_published: published?,
        })
    }

    fn run(&self, project: &Project, args: &[String]) -> Result<i32> {
        self.check_prerequisites()?;
        let mut command = vec!["run".to_string()];
        command.extend(args.iter().cloned());
        let invocation = self.backend().invocation(&project.root, command);
        Ok(self.ctx.runner().run_passthrough(&invocation)?.code)
    }

    fn export_requirements(&self, project: &Project, request: &ExportRequest) -> Result<PathBuf> {
        self.check_prerequisites()?;
        self.ensure_export_plugin(&project.root)?;
        self.lock_at(&project.root)?;
        let version = self.version_in(&project.root)?;
        let output = request.output.clone().unwrap_or_else(|| "requirements.txt".to_string());
        let args = poetry_export_args(&version, &output, &request.extras, false);
        self.backend().exec(&project.root, args, Operation::Export)?;
        Ok(self.ctx.abs(&project.root.join(output)))
    }

    fn refresh_project(&self, project: &Project) -> Result<()> {
        self.lock_at(&project.root)?;
        if !self.shared_env() {
            self.backend()
                .exec(&project.root, vec!["install".into()], Operation::Sync)?;
        }
        Ok(())
    }

    fn refresh_root(&self) -> Result<()> {
        let root = Path::new("");
        self.lock_at(root)?;
        self.backend().exec(
            root,
            vec!["install".into(), "--no-root".into()],
            Operation::Sync,
        )?;
        Ok(())
    }

    fn propagates(&self) -> bool {
        true
    }

    fn needs_root_refresh(&self, project: &Project) -> bool {
        if !self.shared_env() {
            return false;
        }
        let Ok(package) = self.package_name(project) else {
            return false;
        };
        self.ctx
            .root_manifest()
            .all_dependencies()
            .any(|(_, name, _)| names_match(name, &package))
    }
}

impl BuildBackend for PoetryProvider<'_> {
    fn context(&self) -> &WorkspaceContext {
        self.ctx
    }

    fn export_locked(
        &self,
        project: &Project,
        manifest: &Manifest,
        dev: bool,
        bundle: &BuildBundle,
    ) -> Result<LockedExport> {
        self.ensure_export_plugin(&project.root)?;
        let version = self.version_in(&project.root)?;
        let output = bundle.path().join("requirements.txt");
        let extras: Vec<String> = manifest.extras.keys().cloned().collect();
        let args = poetry_export_args(&version, &output.display().to_string(), &extras, dev);
        self.backend().exec(&project.root, args, Operation::Export)?;
        let text = fs::read_to_string(&output)
            .with_context(|| format!("failed to read {}", output.display()))?;
        fs::remove_file(&output).with_context(|| format!("failed to remove {}", output.display()))?;
        Ok(LockedExport {
            text,
            lock: lock_for(self.ctx, project)?,
            base_dir: project.root.clone(),
        })
    }

    fn build_artifacts(&self, bundle_dir: &Path, format: Option<ArtifactFormat>) -> Result<()> {
        let mut args = vec!["build".to_string()];
        if let Some(format) = format {
            args.push("--format".into());
            args.push(format.as_str().into());
        }
        self.backend().exec(bundle_dir, args, Operation::Build)?;
        Ok(())
    }
}
