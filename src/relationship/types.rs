//! Core types for relationship tracking.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::gateway::UserId;

/// Default number of edges per listed page.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// State of the relationship between the local user and a peer, seen
/// from the local user's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipState {
    /// No relationship.
    #[default]
    None,
    /// The local user sent a friend request.
    PendingSent,
    /// The peer sent a friend request.
    PendingReceived,
    /// Both sides accepted.
    Friends,
    /// One side blocked the other.
    Blocked,
}

impl RelationshipState {
    /// Every state.
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::PendingSent,
        Self::PendingReceived,
        Self::Friends,
        Self::Blocked,
    ];

    /// Converts to string representation for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::PendingSent => "pending_sent",
            Self::PendingReceived => "pending_received",
            Self::Friends => "friends",
            Self::Blocked => "blocked",
        }
    }

    /// Returns the state reached by `action`, or `None` if the
    /// transition is illegal.
    ///
    /// | Current | Action | Next |
    /// |---------|--------|------|
    /// | None | Request | `PendingSent` |
    /// | `PendingSent` | Cancel | None |
    /// | `PendingReceived` | Accept | Friends |
    /// | `PendingReceived` | Decline | None |
    /// | Friends | Remove | None |
    #[must_use]
    pub const fn apply(self, action: RelationshipAction) -> Option<Self> {
        match (self, action) {
            (Self::None, RelationshipAction::Request) => Some(Self::PendingSent),
            (Self::PendingSent, RelationshipAction::Cancel)
            | (Self::PendingReceived, RelationshipAction::Decline)
            | (Self::Friends, RelationshipAction::Remove) => Some(Self::None),
            (Self::PendingReceived, RelationshipAction::Accept) => Some(Self::Friends),
            _ => None,
        }
    }

    /// The same relationship seen from the peer's side.
    #[must_use]
    pub const fn mirrored(self) -> Self {
        match self {
            Self::PendingSent => Self::PendingReceived,
            Self::PendingReceived => Self::PendingSent,
            other => other,
        }
    }

    /// Returns whether a friend request is outstanding.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::PendingSent | Self::PendingReceived)
    }
}

impl fmt::Display for RelationshipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state-changing relationship command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipAction {
    /// Send a friend request.
    Request,
    /// Accept a received request.
    Accept,
    /// Decline a received request.
    Decline,
    /// Withdraw a sent request.
    Cancel,
    /// End a friendship.
    Remove,
}

impl RelationshipAction {
    /// Every action.
    pub const ALL: [Self; 5] = [
        Self::Request,
        Self::Accept,
        Self::Decline,
        Self::Cancel,
        Self::Remove,
    ];

    /// Converts to string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Accept => "accept",
            Self::Decline => "decline",
            Self::Cancel => "cancel",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for RelationshipAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The relationship with one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    /// The other user.
    pub peer: UserId,
    /// Current state.
    pub state: RelationshipState,
    /// Whether the local user started the current request or friendship.
    pub initiated_by_local_user: bool,
}

impl RelationshipEdge {
    /// An edge with no relationship.
    #[must_use]
    pub const fn none(peer: UserId) -> Self {
        Self {
            peer,
            state: RelationshipState::None,
            initiated_by_local_user: false,
        }
    }

    /// Returns the edge after `action`, or `None` if it is illegal.
    #[must_use]
    pub fn after(&self, action: RelationshipAction) -> Option<Self> {
        let state = self.state.apply(action)?;
        let initiated_by_local_user = match state {
            RelationshipState::None => false,
            RelationshipState::PendingSent => true,
            _ => self.initiated_by_local_user,
        };
        Some(Self {
            peer: self.peer.clone(),
            state,
            initiated_by_local_user,
        })
    }
}

/// Subset of relationships to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipFilter {
    /// Accepted friendships.
    Friends,
    /// Requests in either direction.
    Pending,
    /// Blocked users.
    Blocked,
}

impl RelationshipFilter {
    /// Returns whether an edge in `state` belongs to this filter.
    #[must_use]
    pub const fn matches(self, state: RelationshipState) -> bool {
        match self {
            Self::Friends => matches!(state, RelationshipState::Friends),
            Self::Pending => state.is_pending(),
            Self::Blocked => matches!(state, RelationshipState::Blocked),
        }
    }
}

/// Offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Maximum number of edges.
    pub limit: u32,
    /// Number of edges to skip.
    pub offset: u32,
}

impl Page {
    /// Creates a page.
    #[must_use]
    pub const fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }

    /// Returns whether this is the first page.
    #[must_use]
    pub const fn is_first(self) -> bool {
        self.offset == 0
    }

    /// The page following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            limit: self.limit,
            offset: self.offset.saturating_add(self.limit),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_LIMIT, 0)
    }
}

/// A list request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipQuery {
    /// Which edges.
    pub filter: RelationshipFilter,
    /// Which page.
    pub page: Page,
}

/// One page of listed edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipPage {
    /// Edges on this page.
    pub edges: Vec<RelationshipEdge>,
    /// Number of matching edges across all pages.
    pub total_count: u32,
}

impl RelationshipPage {
    /// Returns whether more pages follow `page`.
    #[must_use]
    pub fn has_more(&self, page: Page) -> bool {
        let seen = u64::from(page.offset) + self.edges.len() as u64;
        seen < u64::from(self.total_count)
    }
}
