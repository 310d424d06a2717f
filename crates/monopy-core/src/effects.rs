use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::process::{self, RunOutput};

/// A single backend subprocess call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub envs: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            envs: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Command line as shown in logs and error messages.
    #[must_use]
    pub fn display(&self) -> String {
        let program = Path::new(&self.program)
            .file_name()
            .map_or_else(|| self.program.clone(), |name| name.to_string_lossy().to_string());
        std::iter::once(program)
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs backend executables. Every provider call goes through this seam.
pub trait CommandRunner: Send + Sync {
    /// Absolute path of `program` when it is on `PATH`.
    fn locate(&self, program: &str) -> Option<PathBuf>;
    fn run(&self, invocation: &Invocation) -> Result<RunOutput>;
    /// Stream output to the terminal while capturing it.
    fn run_streaming(&self, invocation: &Invocation) -> Result<RunOutput>;
    /// Inherit stdio; only the exit code is captured.
    fn run_passthrough(&self, invocation: &Invocation) -> Result<RunOutput>;
}

pub type SharedRunner = Arc<dyn CommandRunner>;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }

    fn run(&self, invocation: &Invocation) -> Result<RunOutput> {
        tracing::debug!(command = %invocation.display(), cwd = %invocation.cwd.display(), "running");
        process::capture(invocation)
    }

    fn run_streaming(&self, invocation: &Invocation) -> Result<RunOutput> {
        tracing::debug!(command = %invocation.display(), cwd = %invocation.cwd.display(), "streaming");
        process::stream(invocation)
    }

    fn run_passthrough(&self, invocation: &Invocation) -> Result<RunOutput> {
        tracing::debug!(command = %invocation.display(), cwd = %invocation.cwd.display(), "passthrough");
        process::passthrough(invocation)
    }
}
