use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, machine-readable failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    InvalidInput,
    InvalidState,
    Conflict,
    Internal,
}

/// Every externally observable failure of the messaging core.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Bad, expired or missing credential, or acting on someone else's message.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Suspended account or blocked pair.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Status downgrade. The lifecycle manager resolves this as a no-op and
    /// never returns it, but callers matching on kinds can still name it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Duplicate registration. Resolved as a no-op, like `InvalidState`.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The human-readable part, without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::NotFound(m)
            | Self::InvalidInput(m)
            | Self::InvalidState(m)
            | Self::Conflict(m)
            | Self::Internal(m) => m,
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }
}
