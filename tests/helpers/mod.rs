//! Reusable test helpers for the integration tests.
//!
//! Every test runs against the in-memory `MockGateway` backend. Users are
//! registered in order, so the first one gets id "1", the second "2".

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parley_core::config::{PresenceConfig, SessionConfig};
use parley_core::gateway::mock::MockGateway;
use parley_core::gateway::UserId;
use parley_core::presence::{PresenceSubscriber, SubscriberState};
use parley_core::relationship::RelationshipEngine;
use parley_core::session::{MemoryCredentialStore, SessionManager};
use parley_core::{CoreConfig, ParleyCore};
use tokio::sync::watch;

/// Password shared by every test account.
pub const PASSWORD: &str = "correct horse battery staple";

/// Initial reconnect delay used by presence tests.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Reconnect delay ceiling used by presence tests.
pub const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Phone number of the n-th test user.
pub fn phone(n: u32) -> String {
    format!("+1 555 {n:04}")
}

/// Shorthand for a user id.
pub fn user(id: &str) -> UserId {
    UserId::new(id)
}

/// Presence settings with short, jitter-free delays.
pub fn fast_presence() -> PresenceConfig {
    PresenceConfig::default()
        .with_backoff(INITIAL_BACKOFF, MAX_BACKOFF)
        .with_jitter(0.0)
}

/// Registers `count` users named user1, user2, ...
pub fn register_users(gateway: &MockGateway, count: u32) {
    for n in 1..=count {
        gateway.register(&format!("user{n}"), &phone(n), PASSWORD);
    }
}

/// Signs the n-th user in on a fresh session.
pub async fn signed_in_session(gateway: &Arc<MockGateway>, n: u32) -> Arc<SessionManager> {
    let session = Arc::new(SessionManager::new(
        gateway.clone(),
        Arc::new(MemoryCredentialStore::new()),
        SessionConfig::default(),
    ));
    session
        .sign_in(&phone(n), PASSWORD)
        .await
        .expect("sign in should succeed");
    session
}

/// Relationship engine for the n-th user.
pub async fn relationship_engine(gateway: &Arc<MockGateway>, n: u32) -> RelationshipEngine {
    let session = signed_in_session(gateway, n).await;
    RelationshipEngine::new(session, gateway.clone())
}

/// Presence subscriber for the n-th user with [`fast_presence`] settings.
pub async fn presence_subscriber(
    gateway: &Arc<MockGateway>,
    n: u32,
) -> (Arc<SessionManager>, PresenceSubscriber) {
    let session = signed_in_session(gateway, n).await;
    let subscriber = PresenceSubscriber::new(session.clone(), gateway.clone(), fast_presence());
    (session, subscriber)
}

/// Signed-in facade for the n-th user.
pub async fn signed_in_core(gateway: &Arc<MockGateway>, n: u32) -> ParleyCore {
    let core = ParleyCore::new(
        gateway.clone(),
        Arc::new(MemoryCredentialStore::new()),
        CoreConfig::default().with_presence(fast_presence()),
    )
    .expect("default config is valid");
    core.sign_in(&phone(n), PASSWORD)
        .await
        .expect("sign in should succeed");
    core
}

/// Waits until the subscriber reports `target`.
pub async fn wait_for_state(
    states: &mut watch::Receiver<SubscriberState>,
    target: SubscriberState,
) {
    tokio::time::timeout(Duration::from_secs(60), states.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("subscriber never reached {target:?}"))
        .expect("subscriber dropped");
}
