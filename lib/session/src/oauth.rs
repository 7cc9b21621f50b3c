//! OAuth2 authorization-code flow helpers.
//!
//! Builds the authorization request (CSRF state plus PKCE S256 challenge)
//! with the `oauth2` crate, and models what has to survive the redirect to
//! the provider: the [`PendingLogin`].

use crate::config::IdentityConfig;
use crate::error::AuthError;
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, CsrfToken, PkceCodeChallenge, RedirectUrl, Scope};
use serde::{Deserialize, Serialize};

/// Where to send the browser to start a login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationRequest {
    /// Authorization URL including client ID, redirect URI, scopes, state and PKCE challenge.
    pub url: String,
    /// The CSRF state embedded in `url`.
    pub state: String,
}

/// A started login waiting for its callback.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLogin {
    /// CSRF state the callback must echo.
    pub state: String,
    /// PKCE verifier sent with the code exchange.
    pub pkce_verifier: String,
    /// Console path to return to after login.
    #[serde(default)]
    pub return_to: Option<String>,
    /// When the login was started.
    pub created_at: DateTime<Utc>,
}

impl PendingLogin {
    /// Returns true if `state` matches and the login has not outlived `ttl`.
    #[must_use]
    pub fn accepts(&self, state: Option<&str>, now: DateTime<Utc>, ttl: Duration) -> bool {
        let Some(state) = state else {
            return false;
        };
        let fresh = self
            .created_at
            .checked_add_signed(ttl)
            .is_some_and(|deadline| now < deadline);
        fresh && constant_time_eq(self.state.as_bytes(), state.as_bytes())
    }
}

impl std::fmt::Debug for PendingLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingLogin")
            .field("state", &"[redacted]")
            .field("pkce_verifier", &"[redacted]")
            .field("return_to", &self.return_to)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Query parameters delivered to the OAuth callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Callback parameters of a successful authorization.
    #[must_use]
    pub fn success(code: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            state: Some(state.into()),
            ..Self::default()
        }
    }
}

/// Builds an authorization request and the matching pending login.
///
/// # Errors
///
/// Returns `Configuration` if the authorization endpoint or redirect URI is
/// not a valid URL.
pub fn authorization_request(
    config: &IdentityConfig,
    return_to: Option<String>,
    now: DateTime<Utc>,
) -> Result<(AuthorizationRequest, PendingLogin), AuthError> {
    let auth_url = AuthUrl::new(config.authorization_endpoint().to_string()).map_err(|e| {
        AuthError::Configuration {
            details: format!("invalid authorization endpoint: {e}"),
        }
    })?;
    let redirect_url =
        RedirectUrl::new(config.redirect_uri().to_string()).map_err(|e| {
            AuthError::Configuration {
                details: format!("invalid redirect URI: {e}"),
            }
        })?;

    let client = BasicClient::new(ClientId::new(config.client_id().to_string()))
        .set_auth_uri(auth_url)
        .set_redirect_uri(redirect_url);

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let mut request = client
        .authorize_url(CsrfToken::new_random)
        .set_pkce_challenge(pkce_challenge);
    for scope in config.scopes() {
        request = request.add_scope(Scope::new(scope.to_string()));
    }
    let (url, csrf_token) = request.url();

    let pending = PendingLogin {
        state: csrf_token.secret().clone(),
        pkce_verifier: pkce_verifier.secret().clone(),
        return_to,
        created_at: now,
    };
    let request = AuthorizationRequest {
        url: url.to_string(),
        state: pending.state.clone(),
    };
    Ok((request, pending))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
