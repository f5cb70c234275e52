//! Abstract call surface to the backend services.
//!
//! The engine never talks to a transport directly. Everything it needs
//! from the auth, presence, relationship and search services goes through
//! the [`RpcGateway`] trait: unary calls that return a result or a typed
//! [`RpcError`], and one server-streaming call that opens the presence
//! feed.
//!
//! # Architecture
//!
//! ```text
//! ParleyCore
//!     │
//!     ├── RelationshipEngine ─┐
//!     ├── PresenceSubscriber ─┼── SessionManager::call_authenticated
//!     │                       │
//!     ▼                       ▼
//! RpcGateway (generated stubs, supplied by the host)
//! ```
//!
//! Bearer tokens are passed explicitly on every authenticated call. The
//! gateway must not cache them.

mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
mod types;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use error::{RpcError, RpcResult};
pub use types::{
    SearchKind, SearchQuery, SearchResults, ServerSummary, SignInRequest, SignUpRequest,
    TokenPair, UserId, UserProfile,
};

use crate::presence::{PresenceEvent, UserStatus};
use crate::relationship::{
    RelationshipAction, RelationshipEdge, RelationshipPage, RelationshipQuery,
};

/// Server-streamed presence feed.
///
/// Ends with `None` when the server closes the stream; an `Err` item means
/// the stream broke.
pub type PresenceStream = BoxStream<'static, RpcResult<PresenceEvent>>;

/// Unary and server-streaming operations of the backend.
///
/// Implementations wrap the generated service stubs. Every method taking
/// an `access_token` is an authenticated call; the engine guarantees the
/// token is never empty.
#[async_trait]
pub trait RpcGateway: Send + Sync {
    /// Creates an account.
    async fn sign_up(&self, request: SignUpRequest) -> RpcResult<UserProfile>;

    /// Exchanges phone hash and password for a token pair.
    async fn sign_in(&self, request: SignInRequest) -> RpcResult<TokenPair>;

    /// Resolves the identity behind an access token ("who am I").
    async fn get_me(&self, access_token: &str) -> RpcResult<UserProfile>;

    /// Exchanges a refresh token for a new token pair.
    async fn refresh_token(&self, refresh_token: &str) -> RpcResult<TokenPair>;

    /// Opens the presence feed for a user.
    async fn subscribe_presence(
        &self,
        access_token: &str,
        user_id: &UserId,
    ) -> RpcResult<PresenceStream>;

    /// Publishes a presence status.
    async fn update_presence(&self, access_token: &str, event: PresenceEvent) -> RpcResult<()>;

    /// Fetches a user's current status and last status change.
    async fn user_status(&self, access_token: &str, user_id: &UserId) -> RpcResult<UserStatus>;

    /// Fetches the relationship between the caller and a peer.
    async fn relationship_status(
        &self,
        access_token: &str,
        peer: &UserId,
    ) -> RpcResult<RelationshipEdge>;

    /// Applies a relationship action towards a peer.
    async fn update_relationship(
        &self,
        access_token: &str,
        peer: &UserId,
        action: RelationshipAction,
    ) -> RpcResult<()>;

    /// Lists the caller's relationships.
    async fn list_relationships(
        &self,
        access_token: &str,
        query: RelationshipQuery,
    ) -> RpcResult<RelationshipPage>;

    /// Searches users and servers.
    async fn search(&self, access_token: &str, query: SearchQuery) -> RpcResult<SearchResults>;
}
