use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use monopy_core::{ArtifactFormat, BackendPreference};

pub const MONOPY_BEFORE_HELP: &str = concat!(
    "monopy ",
    env!("CARGO_PKG_VERSION"),
    " – Python monorepo dependency graph and bundled builds\n\n",
    "\x1b[1;36mWorkspace\x1b[0m\n",
    "  graph            Print the dependency edges between workspace projects.\n",
    "  check            Report projects whose manifests miss a dependency (--fix repairs).\n\n",
    "\x1b[1;36mDependencies\x1b[0m\n",
    "  add / remove     Edit a project's dependencies and refresh its dependents.\n",
    "  update           Upgrade dependencies of a project.\n",
    "  lock / sync      Lock a project or the root, or sync its environment.\n",
    "  install          Install a project or the shared root environment.\n\n",
    "\x1b[1;36mRelease\x1b[0m\n",
    "  build            Bundle local dependencies and build sdists/wheels.\n",
    "  publish          Build and upload a project to a package index.\n",
    "  version          Show or set a project's version.\n",
    "  export           Write requirements.txt from the lockfile.\n",
    "  run              Run a command inside a project's environment.\n",
);

#[derive(Parser, Debug)]
#[command(
    name = "monopy",
    author,
    version,
    disable_help_subcommand = true,
    before_help = MONOPY_BEFORE_HELP
)]
#[allow(clippy::struct_excessive_bools)]
pub struct MonopyCli {
    #[arg(
        long,
        value_name = "DIR",
        help = "Start workspace discovery here instead of the current directory",
        global = true
    )]
    pub workspace: Option<PathBuf>,
    #[arg(
        long,
        value_enum,
        default_value_t = BackendArg::Auto,
        help = "Package manager driving the workspace",
        global = true
    )]
    pub backend: BackendArg,
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)", global = true)]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendArg {
    Auto,
    Poetry,
    Uv,
}

impl From<BackendArg> for BackendPreference {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Auto => BackendPreference::Auto,
            BackendArg::Poetry => BackendPreference::Poetry,
            BackendArg::Uv => BackendPreference::Uv,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    #[command(about = "Print the dependency edges between workspace projects.")]
    Graph(GraphArgs),
    #[command(about = "Detect dependencies missing from project manifests.")]
    Check(CheckArgs),
    #[command(
        about = "Add a dependency to a project and refresh its dependents.",
        override_usage = "monopy add <PROJECT> <NAME> [--local] [--group G] [-- ARGS...]"
    )]
    Add(AddArgs),
    #[command(about = "Remove a dependency from a project.")]
    Remove(RemoveArgs),
    #[command(about = "Upgrade one or every dependency of a project.")]
    Update(UpdateArgs),
    #[command(about = "Lock a project, or the workspace root when none is given.")]
    Lock(LockArgs),
    #[command(about = "Sync a project's environment with its lockfile.")]
    Sync(EnvArgs),
    #[command(about = "Install a project, or the shared root environment when none is given.")]
    Install(InstallArgs),
    #[command(about = "Bundle local dependencies and build distribution artifacts.")]
    Build(BuildArgs),
    #[command(about = "Build a project and upload it to a package index.")]
    Publish(PublishArgs),
    #[command(
        about = "Run a command inside a project's environment.",
        override_usage = "monopy run <PROJECT> <COMMAND> [ARG...]"
    )]
    Run(RunArgs),
    #[command(about = "Show or set a project's version.")]
    Version(VersionArgs),
    #[command(about = "Write requirements.txt for a project from its lockfile.")]
    Export(ExportArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct InferArgs {
    #[arg(
        long,
        conflicts_with = "no_infer",
        help = "Treat imports of workspace packages as dependencies"
    )]
    pub infer: bool,
    #[arg(long, help = "Ignore import inference even if enabled in [tool.monopy]")]
    pub no_infer: bool,
}

impl InferArgs {
    pub fn choice(&self) -> Option<bool> {
        match (self.infer, self.no_infer) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Args, Debug)]
pub struct GraphArgs {
    #[command(flatten)]
    pub infer: InferArgs,
    #[arg(long, value_name = "NAME", help = "Also list the neighbours of this project")]
    pub project: Option<String>,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub infer: InferArgs,
    #[arg(long, help = "Declare missing dependencies and refresh affected projects")]
    pub fix: bool,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    pub project: String,
    pub name: String,
    #[arg(long, help = "NAME is a workspace project")]
    pub local: bool,
    #[arg(long, value_name = "GROUP")]
    pub group: Option<String>,
    #[arg(long = "extra", value_name = "EXTRA")]
    pub extras: Vec<String>,
    #[arg(last = true, help = "Extra arguments passed to the backend")]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    pub project: String,
    pub name: String,
    #[arg(long, help = "NAME is a workspace project")]
    pub local: bool,
    #[arg(last = true)]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    pub project: String,
    pub name: Option<String>,
    #[arg(long, help = "NAME is a workspace project")]
    pub local: bool,
    #[arg(last = true)]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct LockArgs {
    pub project: Option<String>,
    #[arg(long, help = "Allow the lock to move to newer versions")]
    pub update: bool,
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
    #[arg(last = true)]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct EnvArgs {
    pub project: String,
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
    #[arg(last = true)]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    pub project: Option<String>,
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
    #[arg(last = true)]
    pub args: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatArg {
    Sdist,
    Wheel,
}

impl From<FormatArg> for ArtifactFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Sdist => ArtifactFormat::Sdist,
            FormatArg::Wheel => ArtifactFormat::Wheel,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BundleArgs {
    #[arg(long, help = "Resolve from manifests instead of pinning locked versions")]
    pub no_locked: bool,
    #[arg(long, help = "Pin local dependencies instead of bundling them")]
    pub no_bundle: bool,
    #[arg(long, value_name = "LEVELS", help = "Bundle local dependencies this many levels deep")]
    pub depth: Option<usize>,
    #[arg(long, help = "Include development dependencies in the locked export")]
    pub dev: bool,
    #[arg(long = "ignore", value_name = "PATTERN", help = "Top-level entries left out of the bundle")]
    pub ignore: Vec<String>,
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    pub project: String,
    #[command(flatten)]
    pub bundle: BundleArgs,
    #[arg(long, value_name = "DIR", help = "Where artifacts are collected (default dist/<project>)")]
    pub output: Option<PathBuf>,
    #[arg(long, help = "Keep the bundle directory after building")]
    pub keep_build_folder: bool,
    #[arg(long, value_name = "DIR", help = "Bundle into this directory instead of a temporary one")]
    pub build_folder: Option<PathBuf>,
    #[arg(long, help = "Prepare the bundle without building artifacts")]
    pub skip_build: bool,
    #[arg(long, value_enum)]
    pub format: Option<FormatArg>,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    pub project: String,
    #[arg(long, value_name = "NAME")]
    pub repository: Option<String>,
    #[arg(long)]
    pub dry_run: bool,
    #[command(flatten)]
    pub bundle: BundleArgs,
    #[arg(last = true)]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    pub project: String,
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    pub project: String,
    #[arg(value_name = "NEW_VERSION")]
    pub set: Option<String>,
    #[arg(
        long,
        value_name = "NAME",
        conflicts_with = "set",
        help = "Show the version of a local dependency instead"
    )]
    pub dependency: Option<String>,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    pub project: String,
    #[arg(long = "extra", value_name = "EXTRA")]
    pub extras: Vec<String>,
    #[arg(long, value_name = "FILE", help = "Output file relative to the project")]
    pub output: Option<String>,
}
