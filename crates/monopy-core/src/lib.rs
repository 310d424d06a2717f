#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod build;
pub mod commands;
pub mod config;
pub mod context;
pub mod effects;
pub mod errors;
pub mod outcome;
pub mod process;
pub mod provider;
pub mod sync;

#[cfg(test)]
mod testing;

pub use crate::build::{ArtifactFormat, BuildOutput, BuildRequest};
pub use crate::config::{BackendPreference, BundleDepth, Config, GlobalOptions};
pub use crate::context::{BackendKind, WorkspaceContext};
pub use crate::effects::{CommandRunner, Invocation, SystemRunner};
pub use crate::errors::{BackendError, CommandFailure};
pub use crate::outcome::{CommandStatus, ExecutionOutcome};
pub use crate::provider::{
    provider_for, AddRequest, EnvRequest, ExportRequest, LockRequest, Provider, PublishRequest,
    RemoveRequest, UpdateRequest,
};
pub use crate::sync::{detect, RepairAction, SyncOptions, SyncReport};

pub const MONOPY_VERSION: &str = env!("CARGO_PKG_VERSION");
