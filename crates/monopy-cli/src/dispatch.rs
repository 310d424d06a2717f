use std::env;
use std::path::{Path, PathBuf};

use monopy_core::commands::{self, CheckRequest, GraphRequest, VersionRequest};
use monopy_core::{
    AddRequest, BuildRequest, BundleDepth, EnvRequest, ExecutionOutcome, ExportRequest,
    LockRequest, PublishRequest, RemoveRequest, UpdateRequest, WorkspaceContext,
};

use crate::cli::{BuildArgs, BundleArgs, CommandCli, EnvArgs, InstallArgs, LockArgs};

pub fn dispatch_command(
    ctx: &WorkspaceContext,
    command: &CommandCli,
    verbose: bool,
) -> (&'static str, ExecutionOutcome) {
    match command {
        CommandCli::Graph(args) => {
            let request = GraphRequest {
                infer_dependencies: args.infer.choice(),
                project: args.project.clone(),
            };
            ("graph", commands::graph(ctx, &request))
        }
        CommandCli::Check(args) => {
            let request = CheckRequest {
                fix: args.fix,
                infer_dependencies: args.infer.choice(),
            };
            ("check", commands::check(ctx, &request))
        }
        CommandCli::Add(args) => {
            let request = AddRequest {
                name: args.name.clone(),
                local: args.local,
                group: args.group.clone(),
                extras: args.extras.clone(),
                args: args.args.clone(),
            };
            ("add", commands::add(ctx, &args.project, &request))
        }
        CommandCli::Remove(args) => {
            let request = RemoveRequest {
                name: args.name.clone(),
                local: args.local,
                args: args.args.clone(),
            };
            ("remove", commands::remove(ctx, &args.project, &request))
        }
        CommandCli::Update(args) => {
            let request = UpdateRequest {
                name: args.name.clone(),
                local: args.local,
                args: args.args.clone(),
            };
            ("update", commands::update(ctx, &args.project, &request))
        }
        CommandCli::Lock(args) => {
            let request = lock_request(args, verbose);
            ("lock", commands::lock(ctx, args.project.as_deref(), &request))
        }
        CommandCli::Sync(args) => {
            let request = env_request(args, verbose);
            ("sync", commands::sync(ctx, &args.project, &request))
        }
        CommandCli::Install(args) => {
            let request = install_request(args, verbose);
            ("install", commands::install(ctx, args.project.as_deref(), &request))
        }
        CommandCli::Build(args) => {
            let request = build_request(args);
            ("build", commands::build(ctx, &args.project, &request))
        }
        CommandCli::Publish(args) => {
            let request = PublishRequest {
                repository: args.repository.clone(),
                dry_run: args.dry_run,
                args: args.args.clone(),
                build: bundle_request(&args.bundle),
            };
            ("publish", commands::publish(ctx, &args.project, &request))
        }
        CommandCli::Run(args) => ("run", commands::run(ctx, &args.project, &args.command)),
        CommandCli::Version(args) => {
            let request = VersionRequest {
                set: args.set.clone(),
                dependency: args.dependency.clone(),
            };
            ("version", commands::version(ctx, &args.project, &request))
        }
        CommandCli::Export(args) => {
            let request = ExportRequest {
                extras: args.extras.clone(),
                output: args.output.clone(),
            };
            ("export", commands::export(ctx, &args.project, &request))
        }
    }
}

fn lock_request(args: &LockArgs, verbose: bool) -> LockRequest {
    LockRequest {
        update: args.update,
        args: args.args.clone(),
        verbose,
        cache_dir: args.cache_dir.as_deref().map(from_cwd),
    }
}

fn env_request(args: &EnvArgs, verbose: bool) -> EnvRequest {
    EnvRequest {
        args: args.args.clone(),
        verbose,
        cache_dir: args.cache_dir.as_deref().map(from_cwd),
    }
}

fn install_request(args: &InstallArgs, verbose: bool) -> EnvRequest {
    EnvRequest {
        args: args.args.clone(),
        verbose,
        cache_dir: args.cache_dir.as_deref().map(from_cwd),
    }
}

fn bundle_request(args: &BundleArgs) -> BuildRequest {
    BuildRequest {
        locked_versions: !args.no_locked,
        bundle_local_dependencies: !args.no_bundle,
        bundle_depth: args.depth.map(BundleDepth::Levels),
        dev_dependencies: args.dev,
        ignore_paths: (!args.ignore.is_empty()).then(|| args.ignore.clone()),
        ..BuildRequest::default()
    }
}

fn build_request(args: &BuildArgs) -> BuildRequest {
    BuildRequest {
        output_path: args.output.as_deref().map(from_cwd),
        keep_build_folder: args.keep_build_folder,
        build_folder: args.build_folder.as_deref().map(from_cwd),
        skip_build: args.skip_build,
        format: args.format.map(Into::into),
        ..bundle_request(&args.bundle)
    }
}

/// Paths given on the command line are relative to where monopy was invoked,
/// not to the workspace root.
fn from_cwd(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
}
