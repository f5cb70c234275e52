//! Error types for session management.

use thiserror::Error;

use crate::gateway::RpcError;

/// Errors that can occur while managing or using the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No credential is stored; the user has to sign in.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The backend rejected the current access token.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// The session could not be recovered. The credential has been
    /// cleared and the user has to sign in again.
    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    /// Exchanging the refresh token failed. The credential has been
    /// cleared.
    #[error("Session renewal failed: {0}")]
    RenewalFailed(String),

    /// The credential store failed.
    #[error("Credential storage error: {0}")]
    Storage(String),

    /// Any other backend failure, passed through unchanged.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl SessionError {
    /// Returns whether the user has to go through sign-in again.
    #[must_use]
    pub const fn requires_sign_in(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated | Self::SessionInvalid(_) | Self::RenewalFailed(_)
        )
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_authenticated_error_display() {
        assert_eq!(SessionError::NotAuthenticated.to_string(), "Not authenticated");
    }

    #[test]
    fn session_invalid_error_display() {
        let err = SessionError::SessionInvalid("refresh token revoked".to_string());
        assert_eq!(err.to_string(), "Session invalid: refresh token revoked");
    }

    #[test]
    fn renewal_failed_error_display() {
        let err = SessionError::RenewalFailed("timed out".to_string());
        assert_eq!(err.to_string(), "Session renewal failed: timed out");
    }

    #[test]
    fn storage_error_display() {
        let err = SessionError::Storage("keychain locked".to_string());
        assert_eq!(err.to_string(), "Credential storage error: keychain locked");
    }

    #[test]
    fn rpc_error_is_transparent() {
        let err = SessionError::from(RpcError::Unavailable("connection reset".to_string()));
        assert_eq!(err.to_string(), "Service unavailable: connection reset");
        assert!(matches!(err, SessionError::Rpc(RpcError::Unavailable(_))));
    }

    #[test]
    fn sign_in_required_for_terminal_errors() {
        assert!(SessionError::NotAuthenticated.requires_sign_in());
        assert!(SessionError::SessionInvalid(String::new()).requires_sign_in());
        assert!(SessionError::RenewalFailed(String::new()).requires_sign_in());
        assert!(!SessionError::Storage(String::new()).requires_sign_in());
        assert!(!SessionError::Rpc(RpcError::Unavailable(String::new())).requires_sign_in());
    }
}
