//! Friend relationships for Parley.
//!
//! [`RelationshipEngine`] keeps the local view of relationship edges and
//! mediates every state-changing command. Commands are checked against
//! the transition table in [`RelationshipState::apply`] before they are
//! sent, so an illegal command costs no network round trip.
//!
//! ```text
//!                 request                 accept
//!   None ─────────────────▶ PendingSent   PendingReceived ─────▶ Friends
//!    ▲  ◀───────cancel──────────┘              │                    │
//!    ├──────────────────decline────────────────┘                    │
//!    └──────────────────remove──────────────────────────────────────┘
//! ```

mod engine;
mod error;
mod types;

pub use engine::RelationshipEngine;
pub use error::{RelationshipError, Result};
pub use types::{
    Page, RelationshipAction, RelationshipEdge, RelationshipFilter, RelationshipPage,
    RelationshipQuery, RelationshipState, DEFAULT_PAGE_LIMIT,
};
