//! Token types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifetime assumed when the token endpoint omits `expiresIn`.
pub(crate) const DEFAULT_EXPIRES_IN_SECONDS: u64 = 3600;

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN_SECONDS
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Token endpoint response.
///
/// The console's identity backend answers in camelCase; standard OAuth
/// servers answer in snake_case. Both are accepted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(alias = "access_token")]
    pub access_token: String,
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "id_token")]
    pub id_token: Option<String>,
    /// Lifetime of the access token in seconds.
    #[serde(default = "default_expires_in", alias = "expires_in")]
    pub expires_in: u64,
    #[serde(default = "default_token_type", alias = "token_type")]
    pub token_type: String,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[redacted]"))
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Tokens of the current session.
///
/// `expires_at` is fixed when the tokens are issued; validity is decided by
/// comparing it against the clock and nothing else.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
}

impl AuthTokens {
    /// Builds session tokens from a token endpoint response received at `now`.
    #[must_use]
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            expires_at: expiry(now, response.expires_in),
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            id_token: response.id_token,
            token_type: response.token_type,
        }
    }

    /// Applies a refresh response.
    ///
    /// A rotated refresh token replaces the current one; if the provider did
    /// not send one, the current refresh token stays valid. The same holds
    /// for the ID token.
    #[must_use]
    pub fn refreshed(self, response: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            expires_at: expiry(now, response.expires_in),
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(self.refresh_token),
            id_token: response.id_token.or(self.id_token),
            token_type: response.token_type,
        }
    }

    /// Returns true if the access token is expired at `now`.
    ///
    /// With a positive `skew` the token counts as expired that much earlier.
    /// A deadline outside the representable range counts as expired.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at
            .checked_sub_signed(skew)
            .is_none_or(|deadline| deadline <= now)
    }
}

impl fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[redacted]"))
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .finish()
    }
}

fn expiry(now: DateTime<Utc>, expires_in: u64) -> DateTime<Utc> {
    let seconds = i64::try_from(expires_in).unwrap_or(i64::MAX);
    Duration::try_seconds(seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
