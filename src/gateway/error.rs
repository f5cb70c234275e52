//! Error types for backend calls.
//!
//! This module defines the typed failures the RPC gateway reports. The
//! variants mirror the status codes of the backend services so that the
//! engine can tell an expired token apart from a network outage.

use thiserror::Error;

/// Failure reported by a remote operation.
///
/// `Clone` so that the outcome of a shared renewal can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The bearer token was missing, expired or rejected.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// The backend or the network is unreachable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The request was malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The entity being created already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The backend refused the operation in its current state.
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// The caller is not allowed to perform the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The call did not complete in time.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Any other backend failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// Returns whether the failure means the access token was rejected.
    #[must_use]
    pub const fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated(_))
    }

    /// Returns whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::DeadlineExceeded(_))
    }
}

/// Result type for backend calls.
pub type RpcResult<T> = Result<T, RpcError>;
