//! Session lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the console session.
///
/// `Anonymous` and `Authenticated` are the resting states; the others last
/// only while a login or refresh is in progress, or (for `Expired`) until
/// the first freshness check after start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Anonymous,
    Authenticating,
    Authenticated,
    Refreshing,
    /// A session whose access token is already past expiry. Restored sessions
    /// rest here until refreshed; snapshots report it for a lapsed token.
    Expired,
}

impl SessionState {
    /// Returns true if the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Anonymous, Authenticating)
                | (Anonymous, Authenticated)
                | (Anonymous, Expired)
                | (Authenticating, Authenticated)
                | (Authenticating, Anonymous)
                | (Authenticated, Refreshing)
                | (Authenticated, Anonymous)
                | (Refreshing, Authenticated)
                | (Refreshing, Anonymous)
                | (Expired, Refreshing)
                | (Expired, Anonymous)
        )
    }

    /// Returns true for the states a session rests in between operations.
    #[must_use]
    pub fn is_resting(self) -> bool {
        matches!(self, Self::Anonymous | Self::Authenticated)
    }

    /// Returns the wire name of the state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
