//! Error taxonomy for configuration passes.
//!
//! Every handler method and response hook reports a [`Status`]. A failure is
//! always scoped to a single artifact: the engine records it and moves on.

use std::path::PathBuf;

use crate::bus::BusError;

/// Result type for configurator operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Outcome of a handler call or response hook.
pub type Status = Result<()>;

/// Errors that can occur while applying a configuration artifact.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Required field '{0}' is missing")]
    MissingField(&'static str),

    #[error("Transport error: {0}")]
    Transport(#[from] BusError),

    #[error("Response was already delegated")]
    AlreadyDelegated,

    #[error("Exchange was already resolved")]
    AlreadyResolved,

    #[error("Cannot both mark and unmark {} as applied", .0.display())]
    ConflictingCacheUpdate(PathBuf),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConfigError {
    /// Short machine-friendly label used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "read",
            ConfigError::Parse(_) => "parse",
            ConfigError::InvalidArgument(_) => "invalid_argument",
            ConfigError::MissingField(_) => "missing_field",
            ConfigError::Transport(_) => "transport",
            ConfigError::AlreadyDelegated => "access_denied",
            ConfigError::AlreadyResolved => "already_resolved",
            ConfigError::ConflictingCacheUpdate(_) => "conflicting_cache_update",
            ConfigError::Internal(_) => "internal",
        }
    }
}
