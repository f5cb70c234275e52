//! Session lifecycle and the authenticated-call wrapper.
//!
//! [`SessionManager`] is the only component that reads or writes the
//! credential. Every authenticated backend call in the crate goes through
//! [`SessionManager::call_authenticated`], which renews an expired access
//! token once and retries the call once.
//!
//! # Renewal
//!
//! At most one renewal runs at a time. The first caller that needs one
//! spawns it; everyone else awaits the same shared future. The renewal
//! runs on its own task, so it settles even if every waiter is dropped,
//! and it is bounded by [`SessionConfig::renewal_timeout`].
//!
//! The credential and the in-flight renewal are inspected and replaced
//! under one lock. A caller can therefore never observe a settled
//! renewal whose credential has not been stored yet.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::credential::{Credential, CredentialStore};
use super::error::{Result, SessionError};
use super::types::{AuthContext, SessionIdentity};
use crate::config::SessionConfig;
use crate::gateway::{RpcError, RpcGateway, RpcResult, SignInRequest, SignUpRequest, UserProfile};

type RenewalFuture = Shared<BoxFuture<'static, Result<Credential>>>;

/// In-flight renewal plus a counter bumped on every sign-in and logout.
///
/// A renewal only stores its result if the counter has not moved since
/// it started.
#[derive(Default)]
struct RenewalSlot {
    in_flight: Option<RenewalFuture>,
    generation: u64,
}

/// Owns the credential lifecycle.
///
/// Shared between the presence subscriber, the relationship engine and
/// the facade as an `Arc<SessionManager>`.
pub struct SessionManager {
    gateway: Arc<dyn RpcGateway>,
    store: Arc<dyn CredentialStore>,
    config: SessionConfig,
    renewal: Arc<Mutex<RenewalSlot>>,
    identity: Arc<RwLock<Option<SessionIdentity>>>,
}

impl SessionManager {
    /// Creates a manager over a gateway and a credential store.
    ///
    /// A credential already present in the store is used as is; call
    /// [`resume`](Self::resume) to confirm it.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn RpcGateway>,
        store: Arc<dyn CredentialStore>,
        config: SessionConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            config,
            renewal: Arc::new(Mutex::new(RenewalSlot::default())),
            identity: Arc::new(RwLock::new(None)),
        }
    }

    /// Returns whether a usable access token is stored.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.current_credential().is_ok()
    }

    /// Returns the last verified identity, if any.
    #[must_use]
    pub fn identity(&self) -> Option<SessionIdentity> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Creates an account. Does not sign in.
    ///
    /// The phone number is reduced to its digits and hashed before it is
    /// sent.
    ///
    /// # Errors
    ///
    /// Returns the backend's failure, e.g. [`RpcError::AlreadyExists`].
    pub async fn sign_up(
        &self,
        username: &str,
        phone: &str,
        email: &str,
        password: &str,
    ) -> Result<UserProfile> {
        let request = SignUpRequest {
            username: username.to_string(),
            phone_hash: hash_phone(phone),
            email: email.to_string(),
            password: password.to_string(),
        };

        let profile = self.gateway.sign_up(request).await.map_err(rejected)?;
        info!(user_id = %profile.id, "Account created");
        Ok(profile)
    }

    /// Signs in, stores the issued credential and verifies it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unauthenticated`] for wrong credentials,
    /// or the failure of the follow-up verification.
    pub async fn sign_in(&self, phone: &str, password: &str) -> Result<SessionIdentity> {
        let request = SignInRequest {
            phone_hash: hash_phone(phone),
            password: password.to_string(),
        };
        let pair = self.gateway.sign_in(request).await.map_err(rejected)?;

        {
            let mut slot = self.lock_renewal();
            slot.generation = slot.generation.wrapping_add(1);
            self.store.set(Credential::from(&pair))?;
            set_identity(&self.identity, None);
        }

        let identity = self.verify().await?;
        info!(user_id = %identity.user_id, "Signed in");
        Ok(identity)
    }

    /// Resolves "who am I" with the current access token and caches it.
    ///
    /// Does not renew.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotAuthenticated`] if no credential is stored
    /// - [`SessionError::Unauthenticated`] if the backend rejects the token
    pub async fn verify(&self) -> Result<SessionIdentity> {
        let credential = self.current_credential()?;
        let profile = self
            .gateway
            .get_me(credential.access_token())
            .await
            .map_err(rejected)?;

        let identity = SessionIdentity::from(profile);
        set_identity(&self.identity, Some(identity.clone()));
        Ok(identity)
    }

    /// Confirms a stored session at start-up.
    ///
    /// Like [`verify`](Self::verify), but an expired access token is
    /// renewed once.
    ///
    /// # Errors
    ///
    /// Returns the failure of [`call_authenticated`](Self::call_authenticated).
    pub async fn resume(&self) -> Result<SessionIdentity> {
        let gateway = &self.gateway;
        let profile = self
            .call_authenticated(move |ctx| async move { gateway.get_me(ctx.access_token()).await })
            .await?;

        let identity = SessionIdentity::from(profile);
        set_identity(&self.identity, Some(identity.clone()));
        debug!(user_id = %identity.user_id, "Session resumed");
        Ok(identity)
    }

    /// Exchanges the refresh token for a new credential.
    ///
    /// Joins the renewal in flight if there is one. On failure the
    /// credential is cleared.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotAuthenticated`] if no credential is stored
    /// - [`SessionError::RenewalFailed`] if the backend refuses or the
    ///   renewal times out
    pub async fn renew(&self) -> Result<Credential> {
        let renewal = {
            let mut slot = self.lock_renewal();
            match slot.in_flight.clone() {
                Some(renewal) => renewal,
                None => self.start_renewal(&mut slot)?,
            }
        };
        renewal.await
    }

    /// Runs an authenticated operation.
    ///
    /// `op` is called with the current access token. If the backend
    /// rejects it as unauthenticated the session is renewed (or a renewal
    /// already performed by someone else is picked up) and `op` is called
    /// exactly once more. Every other failure is returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotAuthenticated`] if no credential is stored;
    ///   `op` is not called
    /// - [`SessionError::SessionInvalid`] if renewal fails or the renewed
    ///   token is rejected as well; the credential is cleared
    /// - [`SessionError::Rpc`] for any other failure of `op`
    pub async fn call_authenticated<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(AuthContext) -> Fut,
        Fut: Future<Output = RpcResult<T>>,
    {
        let credential = self.current_credential()?;

        match op(self.context(&credential)).await {
            Err(RpcError::Unauthenticated(reason)) => {
                debug!(%reason, "Access token rejected, renewing session");
            }
            result => return result.map_err(SessionError::from),
        }

        let renewed = self
            .credential_after_rejection(&credential)
            .await
            .map_err(|e| match e {
                SessionError::Storage(_) | SessionError::SessionInvalid(_) => e,
                other => SessionError::SessionInvalid(other.to_string()),
            })?;

        match op(self.context(&renewed)).await {
            Err(RpcError::Unauthenticated(reason)) => {
                warn!(%reason, "Renewed access token rejected, clearing session");
                self.end_session()?;
                Err(SessionError::SessionInvalid(format!(
                    "renewed access token rejected: {reason}"
                )))
            }
            result => result.map_err(SessionError::from),
        }
    }

    /// Clears the credential and the cached identity.
    ///
    /// A renewal still in flight will not store its result.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential store cannot be cleared.
    pub fn logout(&self) -> Result<()> {
        self.end_session()?;
        info!("Logged out");
        Ok(())
    }

    /// Returns the stored credential if it can authenticate calls.
    fn current_credential(&self) -> Result<Credential> {
        self.store
            .get()?
            .filter(Credential::can_authenticate)
            .ok_or(SessionError::NotAuthenticated)
    }

    fn context(&self, credential: &Credential) -> AuthContext {
        AuthContext::new(credential.access_token().to_string(), self.identity())
    }

    /// Finds the credential to retry with after `rejected` was refused.
    async fn credential_after_rejection(&self, rejected: &Credential) -> Result<Credential> {
        let renewal = {
            let mut slot = self.lock_renewal();
            match self.store.get()? {
                None => {
                    return Err(SessionError::SessionInvalid(
                        "credential cleared while the call was in flight".to_string(),
                    ));
                }
                Some(current)
                    if current.can_authenticate()
                        && !current.has_access_token(rejected.access_token()) =>
                {
                    debug!("Credential already renewed, retrying with it");
                    return Ok(current);
                }
                Some(_) => {}
            }

            match slot.in_flight.clone() {
                Some(renewal) => {
                    debug!("Joining renewal in flight");
                    renewal
                }
                None => self.start_renewal(&mut slot)?,
            }
        };
        renewal.await
    }

    /// Spawns a renewal and parks it in the slot. Caller holds the lock.
    fn start_renewal(&self, slot: &mut RenewalSlot) -> Result<RenewalFuture> {
        let credential = self.store.get()?.ok_or(SessionError::NotAuthenticated)?;
        if !credential.can_renew() {
            warn!("No refresh token stored, clearing credential");
            clear_credential(self.store.as_ref(), &self.identity);
            return Err(SessionError::RenewalFailed(
                "no refresh token available".to_string(),
            ));
        }

        let task = RenewalTask {
            gateway: Arc::clone(&self.gateway),
            store: Arc::clone(&self.store),
            slot: Arc::clone(&self.renewal),
            identity: Arc::clone(&self.identity),
            timeout: self.config.renewal_timeout,
            refresh_token: Zeroizing::new(credential.refresh_token().to_string()),
            generation: slot.generation,
        };

        debug!("Starting session renewal");
        let handle = tokio::spawn(task.run());
        let slot_handle = Arc::clone(&self.renewal);
        let renewal = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    lock(&slot_handle).in_flight = None;
                    Err(SessionError::RenewalFailed(format!(
                        "renewal task failed: {e}"
                    )))
                }
            }
        }
        .boxed()
        .shared();

        slot.in_flight = Some(renewal.clone());
        Ok(renewal)
    }

    fn end_session(&self) -> Result<()> {
        let mut slot = self.lock_renewal();
        slot.generation = slot.generation.wrapping_add(1);
        set_identity(&self.identity, None);
        self.store.clear()
    }

    fn lock_renewal(&self) -> MutexGuard<'_, RenewalSlot> {
        lock(&self.renewal)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}

/// A single renewal, run on its own task.
struct RenewalTask {
    gateway: Arc<dyn RpcGateway>,
    store: Arc<dyn CredentialStore>,
    slot: Arc<Mutex<RenewalSlot>>,
    identity: Arc<RwLock<Option<SessionIdentity>>>,
    timeout: Duration,
    refresh_token: Zeroizing<String>,
    generation: u64,
}

impl RenewalTask {
    async fn run(self) -> Result<Credential> {
        let refresh = self.gateway.refresh_token(&self.refresh_token);
        let outcome = match tokio::time::timeout(self.timeout, refresh).await {
            Ok(Ok(pair)) => Ok(Credential::from(&pair)),
            Ok(Err(e)) => Err(SessionError::RenewalFailed(e.to_string())),
            Err(_) => Err(SessionError::RenewalFailed(format!(
                "no response within {:?}",
                self.timeout
            ))),
        };

        let mut slot = lock(&self.slot);
        slot.in_flight = None;

        if slot.generation != self.generation {
            debug!("Session changed during renewal, discarding result");
            return Err(SessionError::SessionInvalid(
                "session changed during renewal".to_string(),
            ));
        }

        match outcome {
            Ok(credential) => {
                self.store.set(credential.clone())?;
                info!("Session renewed");
                Ok(credential)
            }
            Err(e) => {
                warn!(error = %e, "Session renewal failed, clearing credential");
                slot.generation = slot.generation.wrapping_add(1);
                clear_credential(self.store.as_ref(), &self.identity);
                Err(e)
            }
        }
    }
}

/// Normalizes a phone number to its digits and returns its SHA-256 as hex.
#[must_use]
pub fn hash_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    hex::encode(Sha256::digest(digits.as_bytes()))
}

fn lock(slot: &Mutex<RenewalSlot>) -> MutexGuard<'_, RenewalSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_identity(cache: &RwLock<Option<SessionIdentity>>, identity: Option<SessionIdentity>) {
    *cache.write().unwrap_or_else(PoisonError::into_inner) = identity;
}

fn clear_credential(store: &dyn CredentialStore, identity: &RwLock<Option<SessionIdentity>>) {
    set_identity(identity, None);
    if let Err(e) = store.clear() {
        warn!(error = %e, "Failed to clear credential");
    }
}

/// Maps a refused token to the session's own error.
fn rejected(error: RpcError) -> SessionError {
    match error {
        RpcError::Unauthenticated(reason) => SessionError::Unauthenticated(reason),
        other => SessionError::Rpc(other),
    }
}
