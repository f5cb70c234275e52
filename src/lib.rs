//! Parley Core Library
//!
//! Session, presence and relationship synchronization for the Parley chat
//! client. This crate keeps the user's session valid across a long-running
//! process, supervises the live presence feed, and enforces the friend
//! request state machine before anything reaches the backend.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

mod api;
pub mod config;
pub mod gateway;
pub mod presence;
pub mod relationship;
pub mod session;

pub use api::ParleyCore;
pub use config::{ConfigError, CoreConfig};
