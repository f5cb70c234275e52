//! Request and response types exchanged with the backend.
//!
//! These are the shapes of the auth and search services. Presence and
//! relationship payloads live with their engines in
//! [`crate::presence`] and [`crate::relationship`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::presence::PresenceStatus;

/// Backend identifier of a user.
///
/// The backend issues UUID strings; the client treats them as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user id from its string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A user as described by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Backend user id.
    pub id: UserId,
    /// Unique handle.
    pub username: String,
    /// Name shown in the UI, if set.
    pub display_name: Option<String>,
    /// Contact email, if disclosed.
    pub email: Option<String>,
    /// Last known presence, if the backend included it.
    pub status: Option<PresenceStatus>,
    /// When the account was created.
    pub created_at: Option<DateTime<Utc>>,
}

/// Access/refresh token pair issued by sign-in and renewal.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct TokenPair {
    /// Short-lived bearer token.
    pub access_token: String,
    /// Long-lived token used to obtain a new pair.
    pub refresh_token: String,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Account creation request.
///
/// The phone number only ever leaves the client hashed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SignUpRequest {
    /// Requested handle.
    pub username: String,
    /// SHA-256 (hex) of the normalized phone number.
    pub phone_hash: String,
    /// Contact email.
    pub email: String,
    /// Account password.
    pub password: String,
}

impl fmt::Debug for SignUpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignUpRequest")
            .field("username", &self.username)
            .field("phone_hash", &self.phone_hash)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Sign-in request.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SignInRequest {
    /// SHA-256 (hex) of the normalized phone number.
    pub phone_hash: String,
    /// Account password.
    pub password: String,
}

impl fmt::Debug for SignInRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignInRequest")
            .field("phone_hash", &self.phone_hash)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What a search should look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchKind {
    /// Users and servers.
    #[default]
    Unspecified,
    /// Users only.
    User,
    /// Servers (group spaces) only.
    Server,
}

impl SearchKind {
    /// Returns whether users are part of the result.
    #[must_use]
    pub const fn includes_users(self) -> bool {
        matches!(self, Self::Unspecified | Self::User)
    }

    /// Returns whether servers are part of the result.
    #[must_use]
    pub const fn includes_servers(self) -> bool {
        matches!(self, Self::Unspecified | Self::Server)
    }
}

/// A search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Term matched against names.
    pub term: String,
    /// Optional type hint.
    pub kind: SearchKind,
}

impl SearchQuery {
    /// Creates a query over users and servers.
    #[must_use]
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            kind: SearchKind::default(),
        }
    }

    /// Restricts the query to one kind of result.
    #[must_use]
    pub fn with_kind(mut self, kind: SearchKind) -> Self {
        self.kind = kind;
        self
    }
}

/// A server (group space) returned by search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSummary {
    /// Backend server id.
    pub id: String,
    /// Server name.
    pub name: String,
}

/// Search results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    /// Matching users.
    pub users: Vec<UserProfile>,
    /// Matching servers.
    pub servers: Vec<ServerSummary>,
}

impl SearchResults {
    /// Returns true if nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.servers.is_empty()
    }
}
