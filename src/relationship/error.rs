//! Error types for relationship commands.

use thiserror::Error;

use super::types::{RelationshipAction, RelationshipState};
use crate::gateway::UserId;
use crate::session::SessionError;

/// Errors that can occur during relationship commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelationshipError {
    /// The action is not allowed in the current state. Nothing was sent.
    #[error("Cannot {action} relationship with {peer} while {state}")]
    IllegalTransition {
        /// The other user.
        peer: UserId,
        /// State the edge was in.
        state: RelationshipState,
        /// Rejected action.
        action: RelationshipAction,
    },

    /// The backend call failed; the edge is unchanged.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Result type for relationship commands.
pub type Result<T> = std::result::Result<T, RelationshipError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::RpcError;

    #[test]
    fn illegal_transition_error_display() {
        let err = RelationshipError::IllegalTransition {
            peer: UserId::new("2"),
            state: RelationshipState::Friends,
            action: RelationshipAction::Accept,
        };
        assert_eq!(
            err.to_string(),
            "Cannot accept relationship with 2 while friends"
        );
    }

    #[test]
    fn session_error_is_transparent() {
        let err = RelationshipError::from(SessionError::NotAuthenticated);
        assert_eq!(err.to_string(), "Not authenticated");
    }

    #[test]
    fn rpc_error_passes_through_session() {
        let err = RelationshipError::from(SessionError::from(RpcError::Unavailable(
            "down".to_string(),
        )));
        assert_eq!(err.to_string(), "Service unavailable: down");
    }
}
