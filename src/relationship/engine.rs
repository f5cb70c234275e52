//! Relationship state machine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::Mutex as CommandLock;
use tracing::{debug, info};

use super::error::{RelationshipError, Result};
use super::types::{
    Page, RelationshipAction, RelationshipEdge, RelationshipFilter, RelationshipPage,
    RelationshipQuery, RelationshipState,
};
use crate::gateway::{RpcGateway, UserId};
use crate::session::SessionManager;

/// Local view of the user's relationship edges.
///
/// Every command is validated against the edge before anything is sent.
/// An illegal command fails with [`RelationshipError::IllegalTransition`]
/// and never reaches the backend. A legal one is applied locally only
/// after the backend confirms it.
///
/// Edges are loaded lazily: the first command for an unknown peer fetches
/// its edge.
///
/// Commands for the same peer run one at a time, from the edge lookup to
/// the confirmed write. A second command is validated against the edge the
/// first one left behind.
pub struct RelationshipEngine {
    session: Arc<SessionManager>,
    gateway: Arc<dyn RpcGateway>,
    edges: RwLock<HashMap<UserId, RelationshipEdge>>,
    commands: Mutex<HashMap<UserId, Arc<CommandLock<()>>>>,
}

impl RelationshipEngine {
    /// Creates an engine with no known edges.
    #[must_use]
    pub fn new(session: Arc<SessionManager>, gateway: Arc<dyn RpcGateway>) -> Self {
        Self {
            session,
            gateway,
            edges: RwLock::new(HashMap::new()),
            commands: Mutex::new(HashMap::new()),
        }
    }

    /// Sends a friend request.
    ///
    /// # Errors
    ///
    /// Returns [`RelationshipError::IllegalTransition`] unless the edge is
    /// `None`, or the failure of the backend call.
    pub async fn request(&self, peer: &UserId) -> Result<RelationshipEdge> {
        self.apply(peer, RelationshipAction::Request).await
    }

    /// Accepts a received friend request.
    ///
    /// # Errors
    ///
    /// Returns [`RelationshipError::IllegalTransition`] unless the edge is
    /// `PendingReceived`, or the failure of the backend call.
    pub async fn accept(&self, peer: &UserId) -> Result<RelationshipEdge> {
        self.apply(peer, RelationshipAction::Accept).await
    }

    /// Declines a received friend request.
    ///
    /// # Errors
    ///
    /// Returns [`RelationshipError::IllegalTransition`] unless the edge is
    /// `PendingReceived`, or the failure of the backend call.
    pub async fn decline(&self, peer: &UserId) -> Result<RelationshipEdge> {
        self.apply(peer, RelationshipAction::Decline).await
    }

    /// Withdraws a sent friend request.
    ///
    /// # Errors
    ///
    /// Returns [`RelationshipError::IllegalTransition`] unless the edge is
    /// `PendingSent`, or the failure of the backend call.
    pub async fn cancel(&self, peer: &UserId) -> Result<RelationshipEdge> {
        self.apply(peer, RelationshipAction::Cancel).await
    }

    /// Ends a friendship.
    ///
    /// # Errors
    ///
    /// Returns [`RelationshipError::IllegalTransition`] unless the edge is
    /// `Friends`, or the failure of the backend call.
    pub async fn remove(&self, peer: &UserId) -> Result<RelationshipEdge> {
        self.apply(peer, RelationshipAction::Remove).await
    }

    /// Runs one command against the edge with `peer`.
    ///
    /// # Errors
    ///
    /// See the individual commands.
    pub async fn apply(
        &self,
        peer: &UserId,
        action: RelationshipAction,
    ) -> Result<RelationshipEdge> {
        let command = self.command_lock(peer);
        let _serialized = command.lock().await;

        let edge = self.current(peer).await?;

        let Some(next) = edge.after(action) else {
            debug!(%peer, state = %edge.state, %action, "Rejecting illegal relationship command");
            return Err(RelationshipError::IllegalTransition {
                peer: peer.clone(),
                state: edge.state,
                action,
            });
        };

        let gateway = &self.gateway;
        self.session
            .call_authenticated(move |ctx| async move {
                gateway
                    .update_relationship(ctx.access_token(), peer, action)
                    .await
            })
            .await?;

        info!(%peer, from = %edge.state, to = %next.state, "Relationship updated");
        self.write_edges().insert(peer.clone(), next.clone());
        Ok(next)
    }

    /// Returns the known edge with `peer` without contacting the backend.
    #[must_use]
    pub fn edge(&self, peer: &UserId) -> Option<RelationshipEdge> {
        self.read_edges().get(peer).cloned()
    }

    /// Fetches the edge with `peer` from the backend and caches it.
    ///
    /// # Errors
    ///
    /// Returns the failure of the backend call.
    pub async fn refresh(&self, peer: &UserId) -> Result<RelationshipEdge> {
        let gateway = &self.gateway;
        let edge = self
            .session
            .call_authenticated(move |ctx| async move {
                gateway.relationship_status(ctx.access_token(), peer).await
            })
            .await?;

        debug!(%peer, state = %edge.state, "Fetched relationship");
        self.write_edges().insert(peer.clone(), edge.clone());
        Ok(edge)
    }

    /// Lists edges matching `filter` and merges them into the local view.
    ///
    /// The first page replaces every local edge in the filtered states;
    /// later pages only add or update.
    ///
    /// # Errors
    ///
    /// Returns the failure of the backend call; the local view is then
    /// unchanged.
    pub async fn list(&self, filter: RelationshipFilter, page: Page) -> Result<RelationshipPage> {
        let gateway = &self.gateway;
        let result = self
            .session
            .call_authenticated(move |ctx| async move {
                gateway
                    .list_relationships(ctx.access_token(), RelationshipQuery { filter, page })
                    .await
            })
            .await?;

        let mut edges = self.write_edges();
        if page.is_first() {
            edges.retain(|_, edge| !filter.matches(edge.state));
        }
        for edge in &result.edges {
            edges.insert(edge.peer.clone(), edge.clone());
        }
        debug!(
            ?filter,
            offset = page.offset,
            count = result.edges.len(),
            total = result.total_count,
            "Listed relationships"
        );
        Ok(result)
    }

    /// Known friends, ordered by peer id.
    #[must_use]
    pub fn friends(&self) -> Vec<RelationshipEdge> {
        self.in_state(RelationshipState::Friends)
    }

    /// Requests the local user sent, ordered by peer id.
    #[must_use]
    pub fn pending_sent(&self) -> Vec<RelationshipEdge> {
        self.in_state(RelationshipState::PendingSent)
    }

    /// Requests the local user received, ordered by peer id.
    #[must_use]
    pub fn pending_received(&self) -> Vec<RelationshipEdge> {
        self.in_state(RelationshipState::PendingReceived)
    }

    /// Forgets every edge.
    pub fn clear(&self) {
        self.write_edges().clear();
    }

    async fn current(&self, peer: &UserId) -> Result<RelationshipEdge> {
        match self.edge(peer) {
            Some(edge) => Ok(edge),
            None => self.refresh(peer).await,
        }
    }

    fn command_lock(&self, peer: &UserId) -> Arc<CommandLock<()>> {
        let mut commands = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(commands.entry(peer.clone()).or_default())
    }

    fn in_state(&self, state: RelationshipState) -> Vec<RelationshipEdge> {
        let mut edges: Vec<_> = self
            .read_edges()
            .values()
            .filter(|edge| edge.state == state)
            .cloned()
            .collect();
        edges.sort_by(|a, b| a.peer.cmp(&b.peer));
        edges
    }

    fn read_edges(&self) -> RwLockReadGuard<'_, HashMap<UserId, RelationshipEdge>> {
        self.edges.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_edges(&self) -> RwLockWriteGuard<'_, HashMap<UserId, RelationshipEdge>> {
        self.edges.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RelationshipEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationshipEngine")
            .field("edges", &self.read_edges().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::gateway::mock::MockGateway;
    use crate::gateway::RpcError;
    use crate::session::{MemoryCredentialStore, SessionError};
    use std::time::Duration;

    async fn engine_for(gateway: &Arc<MockGateway>, phone: &str) -> RelationshipEngine {
        let session = Arc::new(SessionManager::new(
            gateway.clone(),
            Arc::new(MemoryCredentialStore::new()),
            SessionConfig::default(),
        ));
        session.sign_in(phone, "pw").await.unwrap();
        RelationshipEngine::new(session, gateway.clone())
    }

    async fn two_users() -> (Arc<MockGateway>, RelationshipEngine, RelationshipEngine) {
        let gateway = Arc::new(MockGateway::new());
        gateway.register("alice", "5550001", "pw");
        gateway.register("bob", "5550002", "pw");
        let alice = engine_for(&gateway, "5550001").await;
        let bob = engine_for(&gateway, "5550002").await;
        (gateway, alice, bob)
    }

    fn id(s: &str) -> UserId {
        UserId::new(s)
    }

    #[tokio::test]
    async fn request_moves_to_pending_sent() {
        let (gateway, alice, _bob) = two_users().await;

        let edge = alice.request(&id("2")).await.unwrap();

        assert_eq!(edge.state, RelationshipState::PendingSent);
        assert!(edge.initiated_by_local_user);
        assert_eq!(alice.edge(&id("2")), Some(edge));
        assert_eq!(
            gateway.edge_state(&id("2"), &id("1")),
            RelationshipState::PendingReceived
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_commands_for_one_peer_are_validated_in_turn() {
        let (gateway, alice, _bob) = two_users().await;
        alice.refresh(&id("2")).await.unwrap();
        gateway.expire_access_tokens();
        gateway.set_refresh_delay(Duration::from_millis(10));
        let mutations = gateway.mutation_calls();

        let (target_a, target_b) = (id("2"), id("2"));
        let (first, second) = tokio::join!(alice.request(&target_a), alice.request(&target_b));

        let (sent, rejected) = if first.is_ok() {
            (first, second)
        } else {
            (second, first)
        };
        assert_eq!(sent.unwrap().state, RelationshipState::PendingSent);
        assert_eq!(
            rejected.unwrap_err(),
            RelationshipError::IllegalTransition {
                peer: id("2"),
                state: RelationshipState::PendingSent,
                action: RelationshipAction::Request,
            }
        );
        // The expired token costs one rejected attempt before the retry.
        assert_eq!(gateway.mutation_calls() - mutations, 2);
        assert_eq!(gateway.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn commands_for_different_peers_do_not_wait_on_each_other() {
        let gateway = Arc::new(MockGateway::new());
        gateway.register("alice", "5550001", "pw");
        gateway.register("bob", "5550002", "pw");
        gateway.register("carol", "5550003", "pw");
        let alice = engine_for(&gateway, "5550001").await;

        let (bob_id, carol_id) = (id("2"), id("3"));
        let (bob, carol) = tokio::join!(alice.request(&bob_id), alice.request(&carol_id));

        assert_eq!(bob.unwrap().state, RelationshipState::PendingSent);
        assert_eq!(carol.unwrap().state, RelationshipState::PendingSent);
        assert_eq!(alice.pending_sent().len(), 2);
    }

    #[tokio::test]
    async fn unknown_edge_is_fetched_once() {
        let (gateway, alice, _bob) = two_users().await;
        assert!(alice.edge(&id("2")).is_none());

        alice.request(&id("2")).await.unwrap();
        let before = gateway.total_calls();
        let err = alice.request(&id("2")).await.unwrap_err();

        assert!(matches!(err, RelationshipError::IllegalTransition { .. }));
        assert_eq!(gateway.total_calls(), before);
    }

    #[tokio::test]
    async fn accept_on_pending_sent_is_illegal() {
        let (gateway, alice, _bob) = two_users().await;
        alice.request(&id("2")).await.unwrap();
        let mutations = gateway.mutation_calls();

        let err = alice.accept(&id("2")).await.unwrap_err();

        assert_eq!(
            err,
            RelationshipError::IllegalTransition {
                peer: id("2"),
                state: RelationshipState::PendingSent,
                action: RelationshipAction::Accept,
            }
        );
        assert_eq!(gateway.mutation_calls(), mutations);
    }

    #[tokio::test]
    async fn backend_failure_leaves_edge_unchanged() {
        let (gateway, alice, _bob) = two_users().await;
        gateway.fail_next_mutation(RpcError::Unavailable("relationship service down".to_string()));

        let err = alice.request(&id("2")).await.unwrap_err();

        assert_eq!(
            err,
            RelationshipError::Session(SessionError::Rpc(RpcError::Unavailable(
                "relationship service down".to_string()
            )))
        );
        assert_eq!(alice.edge(&id("2")).unwrap().state, RelationshipState::None);
        assert_eq!(gateway.edge_state(&id("1"), &id("2")), RelationshipState::None);
    }

    #[tokio::test]
    async fn decline_returns_to_none_and_keeps_edge() {
        let (_gateway, alice, bob) = two_users().await;
        alice.request(&id("2")).await.unwrap();

        let edge = bob.decline(&id("1")).await.unwrap();

        assert_eq!(edge, RelationshipEdge::none(id("1")));
        assert_eq!(bob.edge(&id("1")), Some(RelationshipEdge::none(id("1"))));
    }

    #[tokio::test]
    async fn blocked_peer_rejects_every_command() {
        let (gateway, alice, _bob) = two_users().await;
        gateway.set_edge(&id("1"), &id("2"), RelationshipState::Blocked);
        alice.refresh(&id("2")).await.unwrap();
        let calls = gateway.total_calls();

        for action in RelationshipAction::ALL {
            assert!(alice.apply(&id("2"), action).await.is_err());
        }
        assert_eq!(gateway.total_calls(), calls);
    }

    #[tokio::test]
    async fn list_first_page_replaces_filtered_edges() {
        let (gateway, alice, bob) = two_users().await;
        gateway.register("carol", "5550003", "pw");
        alice.request(&id("2")).await.unwrap();
        alice.request(&id("3")).await.unwrap();
        bob.accept(&id("1")).await.unwrap();

        let page = alice
            .list(RelationshipFilter::Pending, Page::default())
            .await
            .unwrap();

        assert_eq!(page.total_count, 1);
        assert_eq!(page.edges[0].peer, id("3"));
        assert_eq!(alice.pending_sent().len(), 1);
        assert!(alice.edge(&id("2")).is_none());
    }

    #[tokio::test]
    async fn list_later_pages_only_upsert() {
        let (gateway, alice, _bob) = two_users().await;
        gateway.register("carol", "5550003", "pw");
        alice.request(&id("2")).await.unwrap();
        alice.request(&id("3")).await.unwrap();

        let first = alice
            .list(RelationshipFilter::Pending, Page::new(1, 0))
            .await
            .unwrap();
        assert!(first.has_more(Page::new(1, 0)));
        assert_eq!(alice.pending_sent().len(), 1);

        let second = alice
            .list(RelationshipFilter::Pending, Page::new(1, 0).next())
            .await
            .unwrap();
        assert_eq!(second.edges.len(), 1);
        assert_eq!(alice.pending_sent().len(), 2);
    }

    #[tokio::test]
    async fn pending_split_by_direction() {
        let (gateway, alice, bob) = two_users().await;
        gateway.register("carol", "5550003", "pw");
        let carol = engine_for(&gateway, "5550003").await;
        alice.request(&id("2")).await.unwrap();
        carol.request(&id("1")).await.unwrap();

        alice
            .list(RelationshipFilter::Pending, Page::default())
            .await
            .unwrap();

        assert_eq!(alice.pending_sent()[0].peer, id("2"));
        assert_eq!(alice.pending_received()[0].peer, id("3"));
        assert!(!alice.pending_received()[0].initiated_by_local_user);
        assert!(bob.friends().is_empty());
    }

    #[tokio::test]
    async fn clear_forgets_edges() {
        let (_gateway, alice, _bob) = two_users().await;
        alice.request(&id("2")).await.unwrap();

        alice.clear();

        assert!(alice.edge(&id("2")).is_none());
    }
}
