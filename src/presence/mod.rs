//! Live presence for Parley.
//!
//! [`PresenceSubscriber`] keeps the server-streamed presence feed open for
//! the signed-in user, reconnecting with [`Backoff`] whenever it breaks.
//! Incoming [`PresenceEvent`]s update a latest-value cache and are handed
//! to every registered [`PresenceListener`] in arrival order.
//!
//! # Example
//!
//! ```ignore
//! use futures::StreamExt;
//!
//! let subscriber = PresenceSubscriber::new(session, gateway, PresenceConfig::default());
//! let mut events = subscriber.listen();
//! subscriber.start(me.user_id.clone());
//!
//! while let Some(event) = events.next().await {
//!     println!("{} is {}", event.user_id, event.status.as_str());
//! }
//! ```

mod backoff;
mod subscriber;
mod types;

pub use backoff::Backoff;
pub use subscriber::{ListenerId, PresenceListener, PresenceSubscriber};
pub use types::{PresenceEvent, PresenceStatus, SubscriberState, UserStatus};
