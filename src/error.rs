use thiserror::Error;

use crate::policy::Role;
use crate::state_machine::{JobId, JobStatus, UserId};

/// Named failures returned by every dispatch operation.
///
/// These are outcomes the caller is expected to map onto its own transport
/// (HTTP status, CLI exit code). None of them are retried here.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("invalid job spec: {0}")]
    InvalidSpec(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("user {actor} ({role}) may not {operation}")]
    Unauthorized {
        actor: UserId,
        role: Role,
        operation: &'static str,
    },

    #[error("cannot move job from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("job {0} was already accepted by another worker")]
    AlreadyAssigned(JobId),

    #[error("none of the candidate jobs is still open")]
    NoJobAvailable,

    #[error("flagging a job requires an admin comment")]
    MissingComment,

    #[error("job store unavailable: {0}")]
    StoreUnavailable(String),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors raised while loading `dispatch.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid role table: {0}")]
    Roles(String),

    #[error("invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },
}
