use std::fmt;

use monopy_domain::ManifestError;

/// A backend subprocess that exited non-zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub command: String,
    pub code: i32,
}

impl CommandFailure {
    pub fn new(command: impl Into<String>, code: i32) -> Self {
        Self {
            command: command.into(),
            code,
        }
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} command failed with exit code {}", self.command, self.code)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{tool} is not installed. Please install {tool} before running this command.")]
    ToolMissing { tool: String },
    #[error(transparent)]
    Parse(#[from] ManifestError),
    #[error("{0}")]
    DependencyOp(CommandFailure),
    #[error("{0}")]
    Lock(CommandFailure),
    #[error("{0}")]
    Sync(CommandFailure),
    #[error("{0}")]
    Export(CommandFailure),
    #[error("{0}")]
    Build(String),
    #[error("{0}")]
    Publish(CommandFailure),
    #[error("{0}")]
    Run(CommandFailure),
    #[error("local dependency {location} does not match any workspace project")]
    UnresolvableLocalDependency { location: String },
    #[error("project {name} not found in the workspace")]
    ProjectNotFound { name: String },
}

impl BackendError {
    /// Errors the user can fix without a backend retry.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::ToolMissing { .. }
                | Self::Parse(_)
                | Self::UnresolvableLocalDependency { .. }
                | Self::ProjectNotFound { .. }
        )
    }

    /// The failing subprocess, when the error came from one.
    #[must_use]
    pub fn failure(&self) -> Option<&CommandFailure> {
        match self {
            Self::DependencyOp(failure)
            | Self::Lock(failure)
            | Self::Sync(failure)
            | Self::Export(failure)
            | Self::Publish(failure)
            | Self::Run(failure) => Some(failure),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn messages_name_command_and_code() {
        let err = BackendError::Lock(CommandFailure::new("poetry lock --no-update", 1));
        assert_eq!(err.to_string(), "poetry lock --no-update command failed with exit code 1");
        assert_eq!(err.failure().map(|failure| failure.code), Some(1));
        assert!(!err.is_user_error());

        let err = BackendError::from(ManifestError::Missing {
            path: PathBuf::from("apps/app1/pyproject.toml"),
        });
        assert!(err.is_user_error());
        assert!(err.failure().is_none());
    }
}
