//! Engine configuration.
//!
//! All durations are expressed in milliseconds when (de)serialized:
//!
//! ```json
//! {
//!   "session": { "renewal_timeout_ms": 10000 },
//!   "presence": { "initial_backoff_ms": 1000, "max_backoff_ms": 30000 }
//! }
//! ```
//!
//! Missing fields fall back to their defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default bound on a single renewal call.
pub const DEFAULT_RENEWAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default delay before the first presence reconnect.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Default ceiling for presence reconnect delays.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Errors in configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The configuration document could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Session manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on a renewal call. Waiters observe a failure once it
    /// elapses.
    #[serde(rename = "renewal_timeout_ms", with = "duration_ms")]
    pub renewal_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            renewal_timeout: DEFAULT_RENEWAL_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Sets the renewal timeout.
    #[must_use]
    pub const fn with_renewal_timeout(mut self, timeout: Duration) -> Self {
        self.renewal_timeout = timeout;
        self
    }
}

/// Presence subscriber settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Delay before the first reconnect attempt.
    #[serde(rename = "initial_backoff_ms", with = "duration_ms")]
    pub initial_backoff: Duration,
    /// Ceiling for the reconnect delay.
    #[serde(rename = "max_backoff_ms", with = "duration_ms")]
    pub max_backoff: Duration,
    /// Growth factor per consecutive failure.
    pub backoff_multiplier: f64,
    /// Random spread applied to each delay, as a fraction of it.
    pub jitter: f64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl PresenceConfig {
    /// Sets the initial and maximum reconnect delays.
    #[must_use]
    pub const fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Sets the growth factor.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the jitter fraction. Zero makes delays deterministic.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Session manager settings.
    pub session: SessionConfig,
    /// Presence subscriber settings.
    pub presence: PresenceConfig,
}

impl CoreConfig {
    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or a value is out of
    /// range.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the session settings.
    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Sets the presence settings.
    #[must_use]
    pub fn with_presence(mut self, presence: PresenceConfig) -> Self {
        self.presence = presence;
        self
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.renewal_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "renewal timeout must be non-zero".to_string(),
            ));
        }

        let presence = &self.presence;
        if presence.initial_backoff.is_zero() {
            return Err(ConfigError::Invalid(
                "initial backoff must be non-zero".to_string(),
            ));
        }
        if presence.max_backoff < presence.initial_backoff {
            return Err(ConfigError::Invalid(format!(
                "max backoff {:?} is below initial backoff {:?}",
                presence.max_backoff, presence.initial_backoff
            )));
        }
        if !presence.backoff_multiplier.is_finite() || presence.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff multiplier must be at least 1.0, got {}",
                presence.backoff_multiplier
            )));
        }
        if !(0.0..1.0).contains(&presence.jitter) {
            return Err(ConfigError::Invalid(format!(
                "jitter must be in [0, 1), got {}",
                presence.jitter
            )));
        }

        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
