use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::BackendError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            details,
        }
    }

    pub fn failure(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Failure,
            message: message.into(),
            details,
        }
    }

    pub fn user_error(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::UserError,
            message: message.into(),
            details,
        }
    }

    /// Classify an error raised by a command: backend errors the user can
    /// act on become user errors, everything else is a failure.
    #[must_use]
    pub fn from_error(err: &anyhow::Error) -> Self {
        let Some(backend) = err.downcast_ref::<BackendError>() else {
            return Self::failure(format!("{err:#}"), json!({ "reason": "internal" }));
        };
        let mut details = json!({ "reason": reason(backend) });
        if let Some(failure) = backend.failure() {
            details["command"] = json!(failure.command);
            details["code"] = json!(failure.code);
        }
        if backend.is_user_error() {
            Self::user_error(backend.to_string(), details)
        } else {
            Self::failure(backend.to_string(), details)
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Ok
    }
}

fn reason(err: &BackendError) -> &'static str {
    match err {
        BackendError::ToolMissing { .. } => "tool_missing",
        BackendError::Parse(_) => "manifest_parse",
        BackendError::DependencyOp(_) => "dependency_op_failed",
        BackendError::Lock(_) => "lock_failed",
        BackendError::Sync(_) => "sync_failed",
        BackendError::Export(_) => "export_failed",
        BackendError::Build(_) => "build_failed",
        BackendError::Publish(_) => "publish_failed",
        BackendError::Run(_) => "run_failed",
        BackendError::UnresolvableLocalDependency { .. } => "unresolvable_local_dependency",
        BackendError::ProjectNotFound { .. } => "project_not_found",
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}
