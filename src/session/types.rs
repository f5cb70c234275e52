//! Types handed to authenticated operations.

use std::fmt;

use zeroize::Zeroize;

use crate::gateway::{UserId, UserProfile};

/// The verified identity behind the current credential.
///
/// Obtained from "who am I" and kept until the credential is cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Backend user id.
    pub user_id: UserId,
    /// Unique handle.
    pub username: String,
    /// Name shown in the UI, if set.
    pub display_name: Option<String>,
    /// Contact email, if disclosed.
    pub email: Option<String>,
}

impl From<UserProfile> for SessionIdentity {
    fn from(profile: UserProfile) -> Self {
        Self {
            user_id: profile.id,
            username: profile.username,
            display_name: profile.display_name,
            email: profile.email,
        }
    }
}

/// Context passed to an operation run through
/// [`SessionManager::call_authenticated`](super::SessionManager::call_authenticated).
///
/// The access token is never empty. It is zeroized when the context is
/// dropped.
pub struct AuthContext {
    access_token: String,
    identity: Option<SessionIdentity>,
}

impl AuthContext {
    pub(crate) const fn new(access_token: String, identity: Option<SessionIdentity>) -> Self {
        Self {
            access_token,
            identity,
        }
    }

    /// Bearer token for the call.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Identity verified for this session, if it has been resolved.
    #[must_use]
    pub const fn identity(&self) -> Option<&SessionIdentity> {
        self.identity.as_ref()
    }
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        self.access_token.zeroize();
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("access_token", &"<redacted>")
            .field("identity", &self.identity)
            .finish()
    }
}
