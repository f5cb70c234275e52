//! End-to-end tests for the relationship state machine.
//!
//! Two users (ids "1" and "2") drive their own engines against one
//! simulated backend, so every step can be checked from both sides.

mod helpers;

use std::sync::Arc;

use helpers::{register_users, relationship_engine, signed_in_core, user};
use parley_core::gateway::mock::MockGateway;
use parley_core::gateway::RpcError;
use parley_core::relationship::{
    Page, RelationshipAction, RelationshipError, RelationshipFilter, RelationshipState,
};
use parley_core::session::SessionError;

#[tokio::test]
async fn request_accept_remove_between_two_users() {
    let gateway = Arc::new(MockGateway::new());
    register_users(&gateway, 2);
    let a = relationship_engine(&gateway, 1).await;
    let b = relationship_engine(&gateway, 2).await;

    // A requests B
    let edge = a.request(&user("2")).await.unwrap();
    assert_eq!(edge.state, RelationshipState::PendingSent);
    assert_eq!(
        gateway.edge_state(&user("1"), &user("2")),
        RelationshipState::PendingSent
    );
    assert_eq!(
        gateway.edge_state(&user("2"), &user("1")),
        RelationshipState::PendingReceived
    );

    // B accepts
    let edge = b.accept(&user("1")).await.unwrap();
    assert_eq!(edge.state, RelationshipState::Friends);
    assert_eq!(
        gateway.edge_state(&user("1"), &user("2")),
        RelationshipState::Friends
    );
    assert_eq!(
        gateway.edge_state(&user("2"), &user("1")),
        RelationshipState::Friends
    );

    // A only learns about the acceptance by fetching
    assert_eq!(a.edge(&user("2")).unwrap().state, RelationshipState::PendingSent);
    assert_eq!(a.refresh(&user("2")).await.unwrap().state, RelationshipState::Friends);

    // A removes B
    let edge = a.remove(&user("2")).await.unwrap();
    assert_eq!(edge.state, RelationshipState::None);
    assert_eq!(
        gateway.edge_state(&user("1"), &user("2")),
        RelationshipState::None
    );
    assert_eq!(
        gateway.edge_state(&user("2"), &user("1")),
        RelationshipState::None
    );

    // Accepting a non-existent request is rejected locally
    let calls = gateway.total_calls();
    let err = a.accept(&user("2")).await.unwrap_err();
    assert_eq!(
        err,
        RelationshipError::IllegalTransition {
            peer: user("2"),
            state: RelationshipState::None,
            action: RelationshipAction::Accept,
        }
    );
    assert_eq!(gateway.total_calls(), calls);
}

#[tokio::test]
async fn failed_request_leaves_edge_none() {
    let gateway = Arc::new(MockGateway::new());
    register_users(&gateway, 2);
    let a = relationship_engine(&gateway, 1).await;
    gateway.fail_next_mutation(RpcError::Internal("database unavailable".to_string()));

    let err = a.request(&user("2")).await.unwrap_err();

    assert!(matches!(
        err,
        RelationshipError::Session(SessionError::Rpc(RpcError::Internal(_)))
    ));
    assert_eq!(a.edge(&user("2")).unwrap().state, RelationshipState::None);

    let edge = a.request(&user("2")).await.unwrap();
    assert_eq!(edge.state, RelationshipState::PendingSent);
}

#[tokio::test]
async fn stale_local_edge_is_corrected_by_backend_refusal() {
    let gateway = Arc::new(MockGateway::new());
    register_users(&gateway, 2);
    let a = relationship_engine(&gateway, 1).await;
    let b = relationship_engine(&gateway, 2).await;
    a.request(&user("2")).await.unwrap();
    b.refresh(&user("1")).await.unwrap();

    // A withdraws behind B's back; B's cached edge is now stale
    a.cancel(&user("2")).await.unwrap();
    let err = b.accept(&user("1")).await.unwrap_err();

    assert!(matches!(
        err,
        RelationshipError::Session(SessionError::Rpc(RpcError::FailedPrecondition(_)))
    ));
    assert_eq!(
        b.edge(&user("1")).unwrap().state,
        RelationshipState::PendingReceived
    );
    assert_eq!(b.refresh(&user("1")).await.unwrap().state, RelationshipState::None);
}

#[tokio::test]
async fn request_to_unknown_user_is_not_found() {
    let gateway = Arc::new(MockGateway::new());
    register_users(&gateway, 1);
    let a = relationship_engine(&gateway, 1).await;

    let err = a.request(&user("99")).await.unwrap_err();

    assert!(matches!(
        err,
        RelationshipError::Session(SessionError::Rpc(RpcError::NotFound(_)))
    ));
    assert!(a.edge(&user("99")).is_none());
}

#[tokio::test]
async fn expired_token_is_renewed_during_command() {
    let gateway = Arc::new(MockGateway::new());
    register_users(&gateway, 2);
    let a = relationship_engine(&gateway, 1).await;
    gateway.expire_access_tokens();

    let edge = a.request(&user("2")).await.unwrap();

    assert_eq!(edge.state, RelationshipState::PendingSent);
    assert_eq!(gateway.refresh_calls(), 1);
}

#[tokio::test]
async fn facade_lists_friends_across_pages() {
    let gateway = Arc::new(MockGateway::new());
    register_users(&gateway, 4);
    let core = signed_in_core(&gateway, 1).await;
    for n in 2..=4 {
        let peer = user(&n.to_string());
        core.relationships().request(&peer).await.unwrap();
        let friend = relationship_engine(&gateway, n).await;
        friend.accept(&user("1")).await.unwrap();
    }

    let first = core
        .relationships()
        .list(RelationshipFilter::Friends, Page::new(2, 0))
        .await
        .unwrap();
    assert_eq!(first.total_count, 3);
    assert_eq!(first.edges.len(), 2);
    assert!(first.has_more(Page::new(2, 0)));

    let second = core
        .relationships()
        .list(RelationshipFilter::Friends, Page::new(2, 0).next())
        .await
        .unwrap();
    assert_eq!(second.edges.len(), 1);
    assert!(!second.has_more(Page::new(2, 0).next()));

    let friends: Vec<_> = core
        .relationships()
        .friends()
        .into_iter()
        .map(|edge| edge.peer)
        .collect();
    assert_eq!(friends, vec![user("2"), user("3"), user("4")]);
    assert!(core.relationships().pending_sent().is_empty());
}
