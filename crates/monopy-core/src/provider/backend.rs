use std::path::Path;

use anyhow::{anyhow, Result};
use pep440_rs::Version;

use super::versioning::parse_banner_version;
use crate::context::{BackendKind, WorkspaceContext};
use crate::effects::Invocation;
use crate::errors::{BackendError, CommandFailure};
use crate::process::RunOutput;

/// What a backend call was for; decides the error variant on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Dependency,
    Lock,
    Sync,
    Export,
    Build,
    Publish,
    Run,
}

impl Operation {
    fn error(self, failure: CommandFailure) -> BackendError {
        match self {
            Self::Dependency => BackendError::DependencyOp(failure),
            Self::Lock => BackendError::Lock(failure),
            Self::Sync => BackendError::Sync(failure),
            Self::Export => BackendError::Export(failure),
            Self::Build => BackendError::Build(failure.to_string()),
            Self::Publish => BackendError::Publish(failure),
            Self::Run => BackendError::Run(failure),
        }
    }
}

/// Thin wrapper over the backend executable.
#[derive(Clone, Copy)]
pub struct Backend<'a> {
    ctx: &'a WorkspaceContext,
    kind: BackendKind,
}

impl<'a> Backend<'a> {
    #[must_use]
    pub fn new(ctx: &'a WorkspaceContext, kind: BackendKind) -> Self {
        Self { ctx, kind }
    }

    #[must_use]
    pub fn program(&self) -> &'a str {
        match self.kind {
            BackendKind::Poetry => self.ctx.config().poetry_bin(),
            BackendKind::Uv => self.ctx.config().uv_bin(),
        }
    }

    /// # Errors
    /// Returns [`BackendError::ToolMissing`] when the executable is not on `PATH`.
    pub fn check(&self) -> Result<()> {
        if self.ctx.runner().locate(self.program()).is_some() {
            return Ok(());
        }
        Err(BackendError::ToolMissing {
            tool: self.kind.as_str().to_string(),
        }
        .into())
    }

    /// Version reported by `<backend> --version` run in `cwd`.
    ///
    /// # Errors
    /// Returns an error when the command fails or prints no version.
    pub fn version(&self, cwd: &Path) -> Result<Version> {
        let output = self.capture(cwd, vec!["--version".to_string()])?;
        let prefix = match self.kind {
            BackendKind::Poetry => "version",
            BackendKind::Uv => "uv",
        };
        parse_banner_version(&output.stdout, prefix).ok_or_else(|| {
            anyhow!(
                "could not determine {} version from `{}`",
                self.kind,
                output.stdout.trim()
            )
        })
    }

    /// Invocation of the backend in `cwd`, workspace-relative or absolute.
    #[must_use]
    pub fn invocation(&self, cwd: &Path, args: Vec<String>) -> Invocation {
        Invocation::new(self.program(), self.ctx.abs(cwd)).args(args)
    }

    /// Run and fail with the operation's error on a non-zero exit.
    ///
    /// # Errors
    /// Returns the [`BackendError`] mapped from `operation` on failure.
    pub fn exec(&self, cwd: &Path, args: Vec<String>, operation: Operation) -> Result<RunOutput> {
        self.exec_invocation(&self.invocation(cwd, args), operation)
    }

    /// # Errors
    /// Returns the [`BackendError`] mapped from `operation` on failure.
    pub fn exec_invocation(&self, invocation: &Invocation, operation: Operation) -> Result<RunOutput> {
        tracing::info!(command = %invocation.display(), cwd = %invocation.cwd.display(), "Running command");
        let output = self.ctx.runner().run(invocation)?;
        check_status(invocation, output, operation)
    }

    /// Run without inspecting the exit code.
    ///
    /// # Errors
    /// Returns an error when the process cannot be started.
    pub fn capture(&self, cwd: &Path, args: Vec<String>) -> Result<RunOutput> {
        self.ctx.runner().run(&self.invocation(cwd, args))
    }
}

/// Registry response for a version that was uploaded before.
pub(crate) const ALREADY_PUBLISHED: &str = "File already exists";

pub(crate) fn check_status(invocation: &Invocation, output: RunOutput, operation: Operation) -> Result<RunOutput> {
    if output.success() {
        return Ok(output);
    }
    tracing::debug!(stderr = %output.stderr.trim(), "backend command failed");
    Err(operation
        .error(CommandFailure::new(invocation.display(), output.code))
        .into())
}

/// Split a free-form argument string the way a shell would for plain words.
#[must_use]
pub fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(ToString::to_string).collect()
}
