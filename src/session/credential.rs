//! Credential storage.
//!
//! The engine keeps exactly one [`Credential`] (access + refresh token)
//! behind the [`CredentialStore`] trait. Two stores ship with the crate:
//!
//! - [`MemoryCredentialStore`]: process-local, for tests and ephemeral
//!   sessions
//! - [`SecureCredentialStore`]: delegates durability to a platform
//!   [`SecureKeyStorage`] (Keychain, Keystore, Secret Service)
//!
//! # Security
//!
//! - Token strings are zeroized when a [`Credential`] is dropped
//! - Debug output never includes token material
//! - Token comparisons are constant-time
//! - `clear()` removes the stored pair completely

use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::error::{Result, SessionError};
use crate::gateway::TokenPair;

/// Storage key for the serialized credential.
pub const CREDENTIAL_STORAGE_KEY: &str = "parley.session.credential";

/// The access/refresh token pair of the signed-in user.
///
/// An empty access token means the session cannot authenticate calls.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    access_token: String,
    refresh_token: String,
}

impl Credential {
    /// Creates a credential from its two tokens.
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Returns the bearer token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Returns the refresh token.
    #[must_use]
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// Returns whether the access token can be sent to the backend.
    #[must_use]
    pub fn can_authenticate(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Returns whether a renewal can be attempted.
    #[must_use]
    pub fn can_renew(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Constant-time check that `token` is this credential's access token.
    #[must_use]
    pub fn has_access_token(&self, token: &str) -> bool {
        self.access_token.as_bytes().ct_eq(token.as_bytes()).into()
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        let access = self.access_token.as_bytes().ct_eq(other.access_token.as_bytes());
        let refresh = self
            .refresh_token
            .as_bytes()
            .ct_eq(other.refresh_token.as_bytes());
        (access & refresh).into()
    }
}

impl Eq for Credential {}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

impl From<&TokenPair> for Credential {
    fn from(pair: &TokenPair) -> Self {
        Self::new(pair.access_token.clone(), pair.refresh_token.clone())
    }
}

/// Holder of the current credential.
///
/// Operations are synchronous and do nothing beyond storing the value;
/// token content is never validated here.
pub trait CredentialStore: Send + Sync {
    /// Returns the stored credential, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get(&self) -> Result<Option<Credential>>;

    /// Replaces the stored credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn set(&self, credential: Credential) -> Result<()>;

    /// Removes the stored credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be cleared.
    fn clear(&self) -> Result<()>;
}

/// Process-local credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credential: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding a credential.
    #[must_use]
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: RwLock::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<Credential>> {
        let guard = self
            .credential
            .read()
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(guard.clone())
    }

    fn set(&self, credential: Credential) -> Result<()> {
        let mut guard = self
            .credential
            .write()
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        *guard = Some(credential);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut guard = self
            .credential
            .write()
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        *guard = None;
        Ok(())
    }
}

/// Platform secure storage for secret bytes.
///
/// Implementations are provided by the host application and must use
/// OS-level protection (iOS Keychain, Android Keystore, Secret Service,
/// Windows Credential Manager).
pub trait SecureKeyStorage: Send + Sync {
    /// Stores secret bytes under the given key.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn store(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieves secret bytes for the given key.
    ///
    /// # Errors
    ///
    /// Returns an error if the retrieval operation fails.
    fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Deletes the secret for the given key. Deleting a missing key
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Credential store backed by platform secure storage.
///
/// The credential is serialized as JSON under [`CREDENTIAL_STORAGE_KEY`].
/// Serialized bytes are zeroized as soon as they have been handed over.
pub struct SecureCredentialStore<S> {
    storage: S,
}

impl<S: SecureKeyStorage> SecureCredentialStore<S> {
    /// Wraps a platform storage.
    #[must_use]
    pub const fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Returns the wrapped platform storage.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }
}

impl<S> fmt::Debug for SecureCredentialStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureCredentialStore")
            .field("key", &CREDENTIAL_STORAGE_KEY)
            .finish_non_exhaustive()
    }
}

impl<S: SecureKeyStorage> CredentialStore for SecureCredentialStore<S> {
    fn get(&self) -> Result<Option<Credential>> {
        let Some(bytes) = self.storage.retrieve(CREDENTIAL_STORAGE_KEY)? else {
            return Ok(None);
        };
        let bytes = Zeroizing::new(bytes);

        let credential = serde_json::from_slice(&bytes)
            .map_err(|e| SessionError::Storage(format!("Corrupt stored credential: {e}")))?;
        Ok(Some(credential))
    }

    fn set(&self, credential: Credential) -> Result<()> {
        let bytes = Zeroizing::new(
            serde_json::to_vec(&credential)
                .map_err(|e| SessionError::Storage(format!("Failed to encode credential: {e}")))?,
        );
        self.storage.store(CREDENTIAL_STORAGE_KEY, &bytes)
    }

    fn clear(&self) -> Result<()> {
        self.storage.delete(CREDENTIAL_STORAGE_KEY)
    }
}
