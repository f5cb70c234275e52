//! Command surface exposed to the presentation layer.

use std::sync::Arc;

use tracing::info;

use crate::config::{ConfigError, CoreConfig};
use crate::gateway::{RpcGateway, SearchKind, SearchQuery, SearchResults, UserId, UserProfile};
use crate::presence::{PresenceListener, PresenceStatus, PresenceSubscriber, UserStatus};
use crate::relationship::RelationshipEngine;
use crate::session::{self, Credential, CredentialStore, SessionIdentity, SessionManager};

/// Core interface for Parley functionality.
///
/// Wires one [`SessionManager`] into the presence subscriber and the
/// relationship engine, and exposes the commands the UI issues.
///
/// # Examples
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use parley_core::gateway::mock::MockGateway;
/// use parley_core::session::MemoryCredentialStore;
/// use parley_core::{CoreConfig, ParleyCore};
///
/// let core = ParleyCore::new(
///     Arc::new(MockGateway::new()),
///     Arc::new(MemoryCredentialStore::new()),
///     CoreConfig::default(),
/// )
/// .unwrap();
/// assert!(!core.is_authenticated());
/// ```
pub struct ParleyCore {
    config: CoreConfig,
    gateway: Arc<dyn RpcGateway>,
    session: Arc<SessionManager>,
    presence: PresenceSubscriber,
    relationships: RelationshipEngine,
}

impl ParleyCore {
    /// Creates the core over a gateway and a credential store.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the configuration is unusable.
    pub fn new(
        gateway: Arc<dyn RpcGateway>,
        store: Arc<dyn CredentialStore>,
        config: CoreConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let session = Arc::new(SessionManager::new(
            Arc::clone(&gateway),
            store,
            config.session.clone(),
        ));
        let presence = PresenceSubscriber::new(
            Arc::clone(&session),
            Arc::clone(&gateway),
            config.presence.clone(),
        );
        let relationships = RelationshipEngine::new(Arc::clone(&session), Arc::clone(&gateway));

        Ok(Self {
            config,
            gateway,
            session,
            presence,
            relationships,
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The shared session manager.
    #[must_use]
    pub const fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// The presence subscriber.
    #[must_use]
    pub const fn presence(&self) -> &PresenceSubscriber {
        &self.presence
    }

    /// Relationship commands: request, accept, decline, cancel, remove
    /// and list.
    #[must_use]
    pub const fn relationships(&self) -> &RelationshipEngine {
        &self.relationships
    }

    /// Returns whether a usable credential is stored.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// Creates an account.
    ///
    /// # Errors
    ///
    /// Returns the backend's failure.
    pub async fn sign_up(
        &self,
        username: &str,
        phone: &str,
        email: &str,
        password: &str,
    ) -> session::Result<UserProfile> {
        self.session.sign_up(username, phone, email, password).await
    }

    /// Signs in and stores the issued credential.
    ///
    /// # Errors
    ///
    /// Returns [`session::SessionError::Unauthenticated`] for wrong
    /// credentials.
    pub async fn sign_in(&self, phone: &str, password: &str) -> session::Result<SessionIdentity> {
        self.session.sign_in(phone, password).await
    }

    /// Resolves the identity behind the current credential.
    ///
    /// # Errors
    ///
    /// Returns [`session::SessionError::Unauthenticated`] if the backend
    /// rejects the token.
    pub async fn get_me(&self) -> session::Result<SessionIdentity> {
        self.session.verify().await
    }

    /// Renews the credential.
    ///
    /// # Errors
    ///
    /// Returns [`session::SessionError::RenewalFailed`] if renewal fails;
    /// the credential is then cleared.
    pub async fn refresh_session(&self) -> session::Result<Credential> {
        self.session.renew().await
    }

    /// Registers a listener and starts the presence feed for `user_id`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe_presence(&self, user_id: UserId) -> PresenceListener {
        let listener = self.presence.listen();
        self.presence.start(user_id);
        listener
    }

    /// Stops the presence feed.
    pub fn stop_presence(&self) {
        self.presence.stop();
    }

    /// Publishes a presence status.
    ///
    /// # Errors
    ///
    /// Returns the failure of the authenticated call.
    pub async fn update_presence(
        &self,
        user_id: &UserId,
        status: PresenceStatus,
    ) -> session::Result<()> {
        self.presence.update_status(user_id, status).await
    }

    /// Fetches a user's status and last status change.
    ///
    /// # Errors
    ///
    /// Returns the failure of the authenticated call.
    pub async fn user_status(&self, user_id: &UserId) -> session::Result<UserStatus> {
        self.presence.fetch_status(user_id).await
    }

    /// Searches users and servers.
    ///
    /// # Errors
    ///
    /// Returns the failure of the authenticated call.
    pub async fn search(
        &self,
        term: &str,
        kind: Option<SearchKind>,
    ) -> session::Result<SearchResults> {
        let query = SearchQuery::new(term).with_kind(kind.unwrap_or_default());
        let gateway = &self.gateway;
        self.session
            .call_authenticated(move |ctx| {
                let query = query.clone();
                async move { gateway.search(ctx.access_token(), query).await }
            })
            .await
    }

    /// Signs out: stops presence, drops cached edges and statuses, and
    /// clears the credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential store cannot be cleared.
    pub fn logout(&self) -> session::Result<()> {
        self.presence.stop();
        self.presence.clear_cache();
        self.relationships.clear();
        self.session.logout()?;
        info!("Parley core signed out");
        Ok(())
    }
}

impl std::fmt::Debug for ParleyCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParleyCore")
            .field("config", &self.config)
            .field("session", &self.session)
            .field("presence", &self.presence)
            .finish_non_exhaustive()
    }
}
