//! Session management for Parley.
//!
//! This module keeps the signed-in user's credential valid for as long as
//! the client runs.
//!
//! # Overview
//!
//! - [`Credential`]: access/refresh token pair, zeroized on drop
//! - [`CredentialStore`]: where the credential lives
//! - [`SessionManager`]: sign-in, verification, single-flight renewal and
//!   the [`call_authenticated`](SessionManager::call_authenticated) wrapper
//!
//! # Lifecycle
//!
//! ```text
//! LoggedOut ──sign_in──▶ Authenticated ──token rejected──▶ Renewing
//!     ▲                        ▲                              │
//!     │                        └──────────renewed─────────────┤
//!     └──────────────────────renewal failed───────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use parley_core::config::SessionConfig;
//! use parley_core::session::{MemoryCredentialStore, SessionManager};
//!
//! let session = SessionManager::new(gateway, Arc::new(MemoryCredentialStore::new()), SessionConfig::default());
//! let me = session.sign_in("+1 555 0100", "password").await?;
//!
//! let profile = session
//!     .call_authenticated(|ctx| async move { gateway.get_me(ctx.access_token()).await })
//!     .await?;
//! ```

mod credential;
mod error;
mod manager;
mod types;

pub use credential::{
    Credential, CredentialStore, MemoryCredentialStore, SecureCredentialStore, SecureKeyStorage,
    CREDENTIAL_STORAGE_KEY,
};
pub use error::{Result, SessionError};
pub use manager::{hash_phone, SessionManager};
pub use types::{AuthContext, SessionIdentity};
