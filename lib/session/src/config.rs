//! Identity provider and session configuration.
//!
//! Both types deserialize with defaults for optional fields, so they can be
//! loaded from environment variables through the `config` crate.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the OAuth2/OIDC identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Authorization endpoint the browser is sent to.
    authorization_endpoint: String,
    /// Token endpoint for code, password and refresh grants.
    token_endpoint: String,
    /// Endpoint returning `{user, roles}` for a bearer token.
    profile_endpoint: String,
    /// Token revocation endpoint (RFC 7009); logout skips the remote call if unset.
    #[serde(default)]
    revocation_endpoint: Option<String>,
    /// The OAuth2 client ID registered with the provider.
    client_id: String,
    /// The OAuth2 client secret, for confidential clients.
    #[serde(default)]
    client_secret: Option<String>,
    /// Redirect URI of the OAuth2 callback.
    redirect_uri: String,
    /// OAuth2 scopes to request as a comma-separated string.
    /// Default: "openid,email,profile"
    #[serde(default = "default_scopes")]
    scopes: String,
}

fn default_scopes() -> String {
    "openid,email,profile".to_string()
}

impl IdentityConfig {
    /// Creates a configuration builder from the required endpoints.
    #[must_use]
    pub fn builder(
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        profile_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> IdentityConfigBuilder {
        IdentityConfigBuilder {
            config: Self {
                authorization_endpoint: authorization_endpoint.into(),
                token_endpoint: token_endpoint.into(),
                profile_endpoint: profile_endpoint.into(),
                revocation_endpoint: None,
                client_id: client_id.into(),
                client_secret: None,
                redirect_uri: redirect_uri.into(),
                scopes: default_scopes(),
            },
        }
    }

    /// Returns the authorization endpoint.
    #[must_use]
    pub fn authorization_endpoint(&self) -> &str {
        &self.authorization_endpoint
    }

    /// Returns the token endpoint.
    #[must_use]
    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    /// Returns the profile endpoint.
    #[must_use]
    pub fn profile_endpoint(&self) -> &str {
        &self.profile_endpoint
    }

    /// Returns the revocation endpoint, if configured.
    #[must_use]
    pub fn revocation_endpoint(&self) -> Option<&str> {
        self.revocation_endpoint.as_deref()
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the OAuth2 client secret, if configured.
    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    /// Returns the OAuth2 redirect URI.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Returns the scopes to request, parsed from the comma-separated string.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes
            .split(',')
            .map(str::trim)
            .filter(|scope| !scope.is_empty())
            .collect()
    }
}

/// Builder for `IdentityConfig`.
#[derive(Debug)]
pub struct IdentityConfigBuilder {
    config: IdentityConfig,
}

impl IdentityConfigBuilder {
    /// Sets the revocation endpoint.
    #[must_use]
    pub fn revocation_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.revocation_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the client secret.
    #[must_use]
    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.client_secret = Some(secret.into());
        self
    }

    /// Replaces the requested scopes.
    #[must_use]
    pub fn scopes<S: AsRef<str>>(mut self, scopes: &[S]) -> Self {
        self.config.scopes = scopes
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(",");
        self
    }

    /// Adds a scope unless it is already requested.
    #[must_use]
    pub fn add_scope(mut self, scope: &str) -> Self {
        if !self.config.scopes().contains(&scope) {
            if !self.config.scopes.is_empty() {
                self.config.scopes.push(',');
            }
            self.config.scopes.push_str(scope);
        }
        self
    }

    /// Builds the `IdentityConfig`.
    #[must_use]
    pub fn build(self) -> IdentityConfig {
        self.config
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Upper bound for every identity/profile provider call, in seconds.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Tokens count as expired this many seconds before `expires_at`.
    #[serde(default = "default_expiry_skew_seconds")]
    pub expiry_skew_seconds: i64,

    /// How long a started OAuth login may wait for its callback, in seconds.
    #[serde(default = "default_pending_login_ttl_seconds")]
    pub pending_login_ttl_seconds: i64,

    /// Directory of the on-disk session store; the session lives in memory if unset.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

fn default_request_timeout_seconds() -> u64 {
    10
}

fn default_expiry_skew_seconds() -> i64 {
    30
}

fn default_pending_login_ttl_seconds() -> i64 {
    600
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout_seconds(),
            expiry_skew_seconds: default_expiry_skew_seconds(),
            pending_login_ttl_seconds: default_pending_login_ttl_seconds(),
            storage_dir: None,
        }
    }
}

impl SessionConfig {
    /// Returns the provider call timeout.
    #[must_use]
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_seconds)
    }

    /// Returns the clock-skew allowance applied to token expiry.
    #[must_use]
    pub fn expiry_skew(&self) -> Duration {
        saturating_seconds(self.expiry_skew_seconds)
    }

    /// Returns the lifetime of a pending OAuth login.
    #[must_use]
    pub fn pending_login_ttl(&self) -> Duration {
        saturating_seconds(self.pending_login_ttl_seconds)
    }
}

/// Out-of-range settings clamp to the largest representable duration.
fn saturating_seconds(seconds: i64) -> Duration {
    Duration::try_seconds(seconds).unwrap_or(if seconds < 0 {
        Duration::MIN
    } else {
        Duration::MAX
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> IdentityConfigBuilder {
        IdentityConfig::builder(
            "https://id.example.com/authorize",
            "https://id.example.com/token",
            "https://id.example.com/me",
            "console",
            "https://console.example.com/auth/callback",
        )
    }

    #[test]
    fn builder_has_defaults() {
        let config = builder().build();
        assert_eq!(config.scopes(), vec!["openid", "email", "profile"]);
        assert!(config.client_secret().is_none());
        assert!(config.revocation_endpoint().is_none());
    }

    #[test]
    fn add_scope_does_not_duplicate() {
        let config = builder()
            .add_scope("openid")
            .add_scope("offline_access")
            .build();
        let openid_count = config.scopes().iter().filter(|s| **s == "openid").count();
        assert_eq!(openid_count, 1);
        assert!(config.scopes().contains(&"offline_access"));
    }

    #[test]
    fn identity_config_deserializes_with_defaults() {
        let json = r#"{
            "authorization_endpoint": "https://id.example.com/authorize",
            "token_endpoint": "https://id.example.com/token",
            "profile_endpoint": "https://id.example.com/me",
            "client_id": "console",
            "redirect_uri": "https://console.example.com/auth/callback",
            "scopes": "openid, groups"
        }"#;
        let config: IdentityConfig = serde_json::from_str(json).expect("deserialize");
        assert_eq!(config.scopes(), vec!["openid", "groups"]);
    }

    #[test]
    fn session_config_has_correct_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.request_timeout(), std::time::Duration::from_secs(10));
        assert_eq!(config.expiry_skew(), Duration::seconds(30));
        assert_eq!(config.pending_login_ttl(), Duration::minutes(10));
        assert!(config.storage_dir.is_none());

        let parsed: SessionConfig = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(parsed.request_timeout_seconds, 10);
    }

    #[test]
    fn out_of_range_durations_are_clamped() {
        let config = SessionConfig {
            expiry_skew_seconds: i64::MIN,
            pending_login_ttl_seconds: i64::MAX,
            ..SessionConfig::default()
        };
        assert_eq!(config.expiry_skew(), Duration::MIN);
        assert_eq!(config.pending_login_ttl(), Duration::MAX);
    }
}
