//! Error types for the session crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `AuthError`: every failure of login, callback, refresh, logout and
//!   token storage
//!
//! Permission checks never produce errors; see `gpu_console_access`.

use std::fmt;

/// Errors from session lifecycle operations.
///
/// The type is `Clone` so that one refresh outcome can be handed to every
/// caller that waited on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The OAuth callback carried no authorization code.
    MissingCode,
    /// The callback `state` did not match the pending login (possible CSRF).
    StateMismatch,
    /// The identity provider reported an error.
    ProviderError { description: String },
    /// The username/password pair was rejected.
    InvalidCredentials,
    /// The session can no longer be renewed; the user must log in again.
    SessionExpired,
    /// The identity or profile backend could not be reached.
    NetworkFailure { details: String },
    /// A provider call did not finish within the configured timeout.
    Timeout { operation: &'static str },
    /// Reading or writing the local session record failed.
    Storage { details: String },
    /// The identity configuration is unusable (e.g. malformed endpoint URL).
    Configuration { details: String },
}

impl AuthError {
    /// Returns a stable machine-readable name for the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCode => "missing_code",
            Self::StateMismatch => "state_mismatch",
            Self::ProviderError { .. } => "provider_error",
            Self::InvalidCredentials => "invalid_credentials",
            Self::SessionExpired => "session_expired",
            Self::NetworkFailure { .. } => "network_failure",
            Self::Timeout { .. } => "timeout",
            Self::Storage { .. } => "storage",
            Self::Configuration { .. } => "configuration",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCode => write!(f, "authorization callback is missing the code parameter"),
            Self::StateMismatch => {
                write!(f, "authorization callback state does not match the pending login")
            }
            Self::ProviderError { description } => {
                write!(f, "identity provider error: {description}")
            }
            Self::InvalidCredentials => write!(f, "invalid username or password"),
            Self::SessionExpired => write!(f, "session has expired"),
            Self::NetworkFailure { details } => write!(f, "network failure: {details}"),
            Self::Timeout { operation } => write!(f, "{operation} timed out"),
            Self::Storage { details } => write!(f, "session storage error: {details}"),
            Self::Configuration { details } => {
                write!(f, "identity configuration error: {details}")
            }
        }
    }
}

impl std::error::Error for AuthError {}
