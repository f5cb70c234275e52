//! Types for presence tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gateway::UserId;

/// Availability of a user.
///
/// The numeric values are the wire encoding used by the status service
/// and must not change. Serde produces the storage strings; the wire
/// value is only reachable through [`as_i32`](Self::as_i32) and
/// [`from_i32`](Self::from_i32).
///
/// | Status | Wire | Storage |
/// |--------|------|---------|
/// | Online | 0 | `online` |
/// | Offline | 1 | `offline` |
/// | Idle | 2 | `idle` |
/// | `DoNotDisturb` | 3 | `do_not_disturb` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// Connected and available.
    Online,
    /// Not connected.
    Offline,
    /// Connected but inactive.
    Idle,
    /// Connected, notifications muted.
    DoNotDisturb,
}

impl PresenceStatus {
    /// Returns the wire value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Online => 0,
            Self::Offline => 1,
            Self::Idle => 2,
            Self::DoNotDisturb => 3,
        }
    }

    /// Parses a wire value.
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Online),
            1 => Some(Self::Offline),
            2 => Some(Self::Idle),
            3 => Some(Self::DoNotDisturb),
            _ => None,
        }
    }

    /// Converts to the backend's string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Idle => "idle",
            Self::DoNotDisturb => "do_not_disturb",
        }
    }

    /// Parses the backend's string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            "idle" => Some(Self::Idle),
            "do_not_disturb" => Some(Self::DoNotDisturb),
            _ => None,
        }
    }

    /// Reads a stored status column. Missing or unknown values count as
    /// offline.
    #[must_use]
    pub fn from_storage(stored: Option<&str>) -> Self {
        stored.and_then(Self::parse).unwrap_or(Self::Offline)
    }
}

/// A presence change for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    /// Whose status changed.
    pub user_id: UserId,
    /// The new status.
    pub status: PresenceStatus,
}

impl PresenceEvent {
    /// Creates a presence event.
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, status: PresenceStatus) -> Self {
        Self {
            user_id: user_id.into(),
            status,
        }
    }
}

/// Status of one user fetched on demand rather than from the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatus {
    /// Whose status this is.
    pub user_id: UserId,
    /// Current status.
    pub status: PresenceStatus,
    /// Last status change, if the user ever published one.
    pub last_seen: Option<DateTime<Utc>>,
}

/// Lifecycle state of the presence subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriberState {
    /// No feed and no reconnect scheduled.
    #[default]
    Disconnected,
    /// Opening the feed.
    Connecting,
    /// Feed open, events flowing.
    Streaming,
    /// Waiting before the next connection attempt.
    Backoff,
}

impl SubscriberState {
    /// Returns whether the subscriber is running (anything but Disconnected).
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}
