//! Access levels.
//!
//! Every connection carries an integer level. Higher levels include the
//! privileges of every lower level, so checks are plain comparisons.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A connection's privilege tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Level(pub u32);

impl Level {
    pub const ADMIN: Level = Level(9_999_999);
    pub const MODERATOR: Level = Level(999_999);
    pub const CHANNEL_OWNER: Level = Level(99_999);
    pub const CHANNEL_MODERATOR: Level = Level(9_999);
    pub const CHANNEL_TRUSTED: Level = Level(8_999);
    pub const TRUSTED_USER: Level = Level(7_999);
    pub const USER: Level = Level(100);

    /// Raw numeric value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn is_admin(self) -> bool {
        self >= Self::ADMIN
    }

    #[must_use]
    pub fn is_moderator(self) -> bool {
        self >= Self::MODERATOR
    }

    #[must_use]
    pub fn is_channel_owner(self) -> bool {
        self >= Self::CHANNEL_OWNER
    }

    #[must_use]
    pub fn is_channel_moderator(self) -> bool {
        self >= Self::CHANNEL_MODERATOR
    }

    #[must_use]
    pub fn is_channel_trusted(self) -> bool {
        self >= Self::CHANNEL_TRUSTED
    }

    #[must_use]
    pub fn is_trusted_user(self) -> bool {
        self >= Self::TRUSTED_USER
    }
}

impl Default for Level {
    fn default() -> Self {
        Self::USER
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Level> for Value {
    fn from(level: Level) -> Value {
        Value::from(level.0)
    }
}

/// Attribute predicate matching a `level` of at least `min`.
///
/// Intended for [`TargetSpec::matching`](crate::router::TargetSpec::matching).
pub fn at_least(min: Level) -> impl Fn(&Value) -> bool + Send + Sync + 'static {
    move |value| {
        value
            .as_u64()
            .map_or(false, |level| level >= u64::from(min.value()))
    }
}
