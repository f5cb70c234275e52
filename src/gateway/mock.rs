//! In-memory backend for tests.
//!
//! [`MockGateway`] simulates the auth, presence, relationship and search
//! services for any number of users, with switches to expire tokens,
//! break feeds and inject failures.
//!
//! This implementation is NOT a server and should only be used in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::mpsc;

use super::{
    PresenceStream, RpcError, RpcGateway, RpcResult, SearchQuery, SearchResults, ServerSummary,
    SignInRequest, SignUpRequest, TokenPair, UserId, UserProfile,
};
use crate::presence::{PresenceEvent, PresenceStatus, UserStatus};
use crate::relationship::{
    RelationshipAction, RelationshipEdge, RelationshipPage, RelationshipQuery, RelationshipState,
};
use crate::session::hash_phone;

struct MockUser {
    profile: UserProfile,
    phone_hash: String,
    password: String,
}

/// Status columns of a user row, stored as the backend stores them.
struct StatusRow {
    status: String,
    last_seen: DateTime<Utc>,
}

#[derive(Default)]
struct MockState {
    users: Vec<MockUser>,
    access_tokens: HashMap<String, UserId>,
    refresh_tokens: HashMap<String, UserId>,
    next_token: u64,
    reject_all_access: bool,
    refresh_delay: Duration,
    presence_open_delay: Duration,
    /// Directed edges: `(a, b)` is the relationship as seen by `a`.
    edges: HashMap<(UserId, UserId), (RelationshipState, bool)>,
    presence: HashMap<UserId, StatusRow>,
    feeds: Vec<mpsc::UnboundedSender<RpcResult<PresenceEvent>>>,
    failing_presence_opens: usize,
    next_mutation_error: Option<RpcError>,
    servers: Vec<ServerSummary>,
}

impl MockState {
    fn user(&self, id: &UserId) -> Option<&MockUser> {
        self.users.iter().find(|user| &user.profile.id == id)
    }

    fn authorize(&self, access_token: &str) -> RpcResult<UserId> {
        if self.reject_all_access {
            return Err(RpcError::Unauthenticated(
                "access token rejected".to_string(),
            ));
        }
        self.access_tokens
            .get(access_token)
            .cloned()
            .ok_or_else(|| RpcError::Unauthenticated("access token expired".to_string()))
    }

    fn issue_tokens(&mut self, user_id: &UserId) -> TokenPair {
        self.next_token += 1;
        let pair = TokenPair {
            access_token: format!("access-{}", self.next_token),
            refresh_token: format!("refresh-{}", self.next_token),
        };
        self.access_tokens
            .insert(pair.access_token.clone(), user_id.clone());
        self.refresh_tokens
            .insert(pair.refresh_token.clone(), user_id.clone());
        pair
    }

    fn edge(&self, from: &UserId, to: &UserId) -> RelationshipEdge {
        let (state, initiated_by_local_user) = self
            .edges
            .get(&(from.clone(), to.clone()))
            .copied()
            .unwrap_or((RelationshipState::None, false));
        RelationshipEdge {
            peer: to.clone(),
            state,
            initiated_by_local_user,
        }
    }

    fn set_pair(&mut self, a: &UserId, b: &UserId, state: RelationshipState, a_initiated: bool) {
        let b_initiated = state != RelationshipState::None && !a_initiated;
        self.edges
            .insert((a.clone(), b.clone()), (state, a_initiated));
        self.edges
            .insert((b.clone(), a.clone()), (state.mirrored(), b_initiated));
    }

    fn stored_status(&self, user_id: &UserId) -> Option<PresenceStatus> {
        self.presence
            .get(user_id)
            .map(|row| PresenceStatus::from_storage(Some(row.status.as_str())))
    }

    fn broadcast(&mut self, item: &RpcResult<PresenceEvent>) {
        self.feeds.retain(|feed| feed.send(item.clone()).is_ok());
    }
}

/// Simulated backend.
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
    total_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    mutation_calls: AtomicUsize,
    presence_opens: AtomicUsize,
}

impl MockGateway {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count(&self) {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
    }

    // ==================== Accounts ====================

    /// Creates an account. Ids are assigned "1", "2", ... in order.
    pub fn register(&self, username: &str, phone: &str, password: &str) -> UserProfile {
        let mut state = self.lock();
        let profile = UserProfile {
            id: UserId::new((state.users.len() + 1).to_string()),
            username: username.to_string(),
            display_name: None,
            email: None,
            status: None,
            created_at: Some(Utc::now()),
        };
        state.users.push(MockUser {
            profile: profile.clone(),
            phone_hash: hash_phone(phone),
            password: password.to_string(),
        });
        profile
    }

    /// Phone hash the backend stored for a user.
    #[must_use]
    pub fn phone_hash_of(&self, user_id: &UserId) -> Option<String> {
        self.lock().user(user_id).map(|user| user.phone_hash.clone())
    }

    /// Issues a fresh token pair for a user without a sign-in call.
    pub fn issue_tokens(&self, user_id: &UserId) -> TokenPair {
        self.lock().issue_tokens(user_id)
    }

    /// Invalidates every access token issued so far.
    pub fn expire_access_tokens(&self) {
        self.lock().access_tokens.clear();
    }

    /// Invalidates every refresh token issued so far.
    pub fn revoke_refresh_tokens(&self) {
        self.lock().refresh_tokens.clear();
    }

    /// Rejects every access token, including ones issued later.
    pub fn reject_all_access_tokens(&self, reject: bool) {
        self.lock().reject_all_access = reject;
    }

    /// Delays every refresh response.
    pub fn set_refresh_delay(&self, delay: Duration) {
        self.lock().refresh_delay = delay;
    }

    // ==================== Presence ====================

    /// Sends an event on every open feed.
    pub fn push_presence(&self, event: PresenceEvent) {
        self.lock().broadcast(&Ok(event));
    }

    /// Fails every open feed with a transport error and drops it.
    pub fn break_presence_streams(&self) {
        let mut state = self.lock();
        state.broadcast(&Err(RpcError::Unavailable("stream reset".to_string())));
        state.feeds.clear();
    }

    /// Ends every open feed as if the server closed it.
    pub fn close_presence_streams(&self) {
        self.lock().feeds.clear();
    }

    /// Delays every feed open.
    pub fn set_presence_open_delay(&self, delay: Duration) {
        self.lock().presence_open_delay = delay;
    }

    /// Makes the next `count` feed opens fail with a transport error.
    pub fn fail_presence_opens(&self, count: usize) {
        self.lock().failing_presence_opens = count;
    }

    /// Number of feeds currently open.
    #[must_use]
    pub fn open_presence_streams(&self) -> usize {
        let mut state = self.lock();
        state.feeds.retain(|feed| !feed.is_closed());
        state.feeds.len()
    }

    /// Last status a user published.
    #[must_use]
    pub fn presence_status(&self, user_id: &UserId) -> Option<PresenceStatus> {
        self.lock().stored_status(user_id)
    }

    // ==================== Relationships ====================

    /// Relationship between `from` and `to`, as seen by `from`.
    #[must_use]
    pub fn edge_state(&self, from: &UserId, to: &UserId) -> RelationshipState {
        self.lock().edge(from, to).state
    }

    /// Forces the relationship between two users, `a` initiating.
    pub fn set_edge(&self, a: &UserId, b: &UserId, state: RelationshipState) {
        self.lock().set_pair(a, b, state, state != RelationshipState::None);
    }

    /// Makes the next relationship mutation fail with `error`.
    pub fn fail_next_mutation(&self, error: RpcError) {
        self.lock().next_mutation_error = Some(error);
    }

    // ==================== Search ====================

    /// Adds a searchable server.
    pub fn add_server(&self, name: &str) -> ServerSummary {
        let mut state = self.lock();
        let server = ServerSummary {
            id: format!("server-{}", state.servers.len() + 1),
            name: name.to_string(),
        };
        state.servers.push(server.clone());
        server
    }

    // ==================== Counters ====================

    /// Number of gateway calls of any kind.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Number of refresh calls.
    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Number of relationship mutation calls.
    #[must_use]
    pub fn mutation_calls(&self) -> usize {
        self.mutation_calls.load(Ordering::SeqCst)
    }

    /// Number of successfully opened presence feeds.
    #[must_use]
    pub fn presence_opens(&self) -> usize {
        self.presence_opens.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MockGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockGateway")
            .field("users", &self.lock().users.len())
            .field("total_calls", &self.total_calls())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RpcGateway for MockGateway {
    async fn sign_up(&self, request: SignUpRequest) -> RpcResult<UserProfile> {
        self.count();
        let mut state = self.lock();
        if state
            .users
            .iter()
            .any(|user| user.profile.username == request.username)
        {
            return Err(RpcError::AlreadyExists(format!(
                "username {} is taken",
                request.username
            )));
        }
        if state
            .users
            .iter()
            .any(|user| user.phone_hash == request.phone_hash)
        {
            return Err(RpcError::AlreadyExists(
                "phone number already registered".to_string(),
            ));
        }

        let profile = UserProfile {
            id: UserId::new((state.users.len() + 1).to_string()),
            username: request.username.clone(),
            display_name: None,
            email: Some(request.email.clone()),
            status: None,
            created_at: Some(Utc::now()),
        };
        state.users.push(MockUser {
            profile: profile.clone(),
            phone_hash: request.phone_hash.clone(),
            password: request.password.clone(),
        });
        Ok(profile)
    }

    async fn sign_in(&self, request: SignInRequest) -> RpcResult<TokenPair> {
        self.count();
        let mut state = self.lock();
        let user_id = state
            .users
            .iter()
            .find(|user| user.phone_hash == request.phone_hash && user.password == request.password)
            .map(|user| user.profile.id.clone())
            .ok_or_else(|| RpcError::Unauthenticated("invalid phone or password".to_string()))?;
        Ok(state.issue_tokens(&user_id))
    }

    async fn get_me(&self, access_token: &str) -> RpcResult<UserProfile> {
        self.count();
        let state = self.lock();
        let user_id = state.authorize(access_token)?;
        let mut profile = state
            .user(&user_id)
            .map(|user| user.profile.clone())
            .ok_or_else(|| RpcError::NotFound(format!("user {user_id}")))?;
        profile.status = state.stored_status(&user_id);
        Ok(profile)
    }

    async fn refresh_token(&self, refresh_token: &str) -> RpcResult<TokenPair> {
        self.count();
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.lock().refresh_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        let user_id = state
            .refresh_tokens
            .remove(refresh_token)
            .ok_or_else(|| RpcError::Unauthenticated("refresh token revoked".to_string()))?;
        Ok(state.issue_tokens(&user_id))
    }

    async fn subscribe_presence(
        &self,
        access_token: &str,
        user_id: &UserId,
    ) -> RpcResult<PresenceStream> {
        self.count();

        let delay = self.lock().presence_open_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        let caller = state.authorize(access_token)?;
        if &caller != user_id {
            return Err(RpcError::PermissionDenied(format!(
                "{caller} cannot subscribe as {user_id}"
            )));
        }
        if state.failing_presence_opens > 0 {
            state.failing_presence_opens -= 1;
            return Err(RpcError::Unavailable("presence service down".to_string()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.feeds.push(sender);
        self.presence_opens.fetch_add(1, Ordering::SeqCst);

        Ok(futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        })
        .boxed())
    }

    async fn update_presence(&self, access_token: &str, event: PresenceEvent) -> RpcResult<()> {
        self.count();
        let mut state = self.lock();
        state.authorize(access_token)?;
        if state.user(&event.user_id).is_none() {
            return Err(RpcError::NotFound(format!("user {}", event.user_id)));
        }
        state.presence.insert(
            event.user_id.clone(),
            StatusRow {
                status: event.status.as_str().to_string(),
                last_seen: Utc::now(),
            },
        );
        state.broadcast(&Ok(event));
        Ok(())
    }

    async fn user_status(&self, access_token: &str, user_id: &UserId) -> RpcResult<UserStatus> {
        self.count();
        let state = self.lock();
        state.authorize(access_token)?;
        if state.user(user_id).is_none() {
            return Err(RpcError::NotFound(format!("user {user_id}")));
        }
        let row = state.presence.get(user_id);
        Ok(UserStatus {
            user_id: user_id.clone(),
            status: PresenceStatus::from_storage(row.map(|row| row.status.as_str())),
            last_seen: row.map(|row| row.last_seen),
        })
    }

    async fn relationship_status(
        &self,
        access_token: &str,
        peer: &UserId,
    ) -> RpcResult<RelationshipEdge> {
        self.count();
        let state = self.lock();
        let me = state.authorize(access_token)?;
        if state.user(peer).is_none() {
            return Err(RpcError::NotFound(format!("user {peer}")));
        }
        Ok(state.edge(&me, peer))
    }

    async fn update_relationship(
        &self,
        access_token: &str,
        peer: &UserId,
        action: RelationshipAction,
    ) -> RpcResult<()> {
        self.count();
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        let me = state.authorize(access_token)?;
        if let Some(error) = state.next_mutation_error.take() {
            return Err(error);
        }
        if state.user(peer).is_none() {
            return Err(RpcError::NotFound(format!("user {peer}")));
        }
        if &me == peer {
            return Err(RpcError::InvalidArgument(
                "cannot befriend yourself".to_string(),
            ));
        }

        let current = state.edge(&me, peer);
        let next = current.after(action).ok_or_else(|| {
            RpcError::FailedPrecondition(format!("cannot {action} while {}", current.state))
        })?;
        state.set_pair(&me, peer, next.state, next.initiated_by_local_user);
        Ok(())
    }

    async fn list_relationships(
        &self,
        access_token: &str,
        query: RelationshipQuery,
    ) -> RpcResult<RelationshipPage> {
        self.count();
        let state = self.lock();
        let me = state.authorize(access_token)?;

        let mut edges: Vec<_> = state
            .edges
            .iter()
            .filter(|((from, _), (edge_state, _))| from == &me && query.filter.matches(*edge_state))
            .map(|((_, to), _)| state.edge(&me, to))
            .collect();
        edges.sort_by(|a, b| a.peer.cmp(&b.peer));

        let total_count = u32::try_from(edges.len()).unwrap_or(u32::MAX);
        let edges = edges
            .into_iter()
            .skip(query.page.offset as usize)
            .take(query.page.limit as usize)
            .collect();
        Ok(RelationshipPage { edges, total_count })
    }

    async fn search(&self, access_token: &str, query: SearchQuery) -> RpcResult<SearchResults> {
        self.count();
        let state = self.lock();
        state.authorize(access_token)?;
        let term = query.term.to_lowercase();

        let users = if query.kind.includes_users() {
            state
                .users
                .iter()
                .filter(|user| user.profile.username.to_lowercase().contains(&term))
                .map(|user| user.profile.clone())
                .collect()
        } else {
            Vec::new()
        };
        let servers = if query.kind.includes_servers() {
            state
                .servers
                .iter()
                .filter(|server| server.name.to_lowercase().contains(&term))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        Ok(SearchResults { users, servers })
    }
}
