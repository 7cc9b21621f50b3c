//! Scripted identity and profile providers.
//!
//! They answer from memory, count every call and can be told to fail or to
//! stall, which is what session lifecycle tests need to observe.

use crate::error::AuthError;
use crate::provider::{IdentityProvider, ProfileProvider};
use crate::tokens::{AuthTokens, TokenResponse};
use async_trait::async_trait;
use gpu_console_access::User;
use rootcause::prelude::Report;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Username accepted by [`ScriptedIdentityProvider`].
pub const USERNAME: &str = "alice";

/// Password accepted by [`ScriptedIdentityProvider`].
pub const PASSWORD: &str = "correct horse battery staple";

/// Authorization code that [`ScriptedIdentityProvider`] rejects.
pub const REJECTED_CODE: &str = "rejected-code";

#[derive(Debug, Default)]
struct CallCounts {
    exchange_code: AtomicUsize,
    exchange_credentials: AtomicUsize,
    refresh: AtomicUsize,
    revoke: AtomicUsize,
}

/// In-memory identity provider issuing numbered tokens.
///
/// Access tokens are `access-<n>` and refresh tokens `refresh-<n>`; refresh
/// tokens not of that form are rejected as expired.
#[derive(Debug)]
pub struct ScriptedIdentityProvider {
    calls: CallCounts,
    issued: AtomicUsize,
    expires_in: u64,
    delay: Duration,
    refresh_delay: Duration,
    rotate_refresh_tokens: bool,
    refresh_error: Mutex<Option<AuthError>>,
    revoke_error: Mutex<Option<AuthError>>,
}

impl Default for ScriptedIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedIdentityProvider {
    /// Creates a provider issuing one-hour tokens without delay.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: CallCounts::default(),
            issued: AtomicUsize::new(0),
            expires_in: 3600,
            delay: Duration::ZERO,
            refresh_delay: Duration::ZERO,
            rotate_refresh_tokens: false,
            refresh_error: Mutex::new(None),
            revoke_error: Mutex::new(None),
        }
    }

    /// Sets the lifetime of issued access tokens.
    #[must_use]
    pub fn with_expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = seconds;
        self
    }

    /// Makes every call wait before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes refresh calls wait before answering, on top of any [`Self::with_delay`].
    #[must_use]
    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    /// Makes refresh responses carry a new refresh token.
    #[must_use]
    pub fn with_rotating_refresh_tokens(mut self) -> Self {
        self.rotate_refresh_tokens = true;
        self
    }

    /// Makes subsequent refresh calls fail with `error` (or succeed again with `None`).
    pub fn fail_refresh_with(&self, error: Option<AuthError>) {
        *self.refresh_error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    /// Makes subsequent revocation calls fail with `error`.
    pub fn fail_revoke_with(&self, error: Option<AuthError>) {
        *self.revoke_error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    /// Number of code exchanges.
    #[must_use]
    pub fn exchange_code_calls(&self) -> usize {
        self.calls.exchange_code.load(Ordering::SeqCst)
    }

    /// Number of credential exchanges.
    #[must_use]
    pub fn credential_calls(&self) -> usize {
        self.calls.exchange_credentials.load(Ordering::SeqCst)
    }

    /// Number of refresh calls.
    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.calls.refresh.load(Ordering::SeqCst)
    }

    /// Number of revocation calls.
    #[must_use]
    pub fn revoke_calls(&self) -> usize {
        self.calls.revoke.load(Ordering::SeqCst)
    }

    /// Total number of calls of any kind.
    #[must_use]
    pub fn network_calls(&self) -> usize {
        self.exchange_code_calls() + self.credential_calls() + self.refresh_calls() + self.revoke_calls()
    }

    fn issue(&self, with_refresh_token: bool) -> TokenResponse {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        TokenResponse {
            access_token: format!("access-{n}"),
            refresh_token: with_refresh_token.then(|| format!("refresh-{n}")),
            id_token: Some(format!("id-{n}")),
            expires_in: self.expires_in,
            token_type: "Bearer".to_string(),
        }
    }

    async fn stall(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl IdentityProvider for ScriptedIdentityProvider {
    async fn exchange_code(
        &self,
        code: &str,
        _pkce_verifier: &str,
    ) -> Result<TokenResponse, Report<AuthError>> {
        self.calls.exchange_code.fetch_add(1, Ordering::SeqCst);
        self.stall().await;
        if code == REJECTED_CODE {
            return Err(AuthError::ProviderError {
                description: "invalid_grant".to_string(),
            }
            .into());
        }
        Ok(self.issue(true))
    }

    async fn exchange_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenResponse, Report<AuthError>> {
        self.calls.exchange_credentials.fetch_add(1, Ordering::SeqCst);
        self.stall().await;
        if username != USERNAME || password != PASSWORD {
            return Err(AuthError::InvalidCredentials.into());
        }
        Ok(self.issue(true))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, Report<AuthError>> {
        self.calls.refresh.fetch_add(1, Ordering::SeqCst);
        self.stall().await;
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        let scripted = self
            .refresh_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(error) = scripted {
            return Err(error.into());
        }
        if !refresh_token.starts_with("refresh-") {
            return Err(AuthError::SessionExpired.into());
        }
        Ok(self.issue(self.rotate_refresh_tokens))
    }

    async fn revoke(&self, _tokens: &AuthTokens) -> Result<(), Report<AuthError>> {
        self.calls.revoke.fetch_add(1, Ordering::SeqCst);
        self.stall().await;
        let scripted = self
            .revoke_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match scripted {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }
}

/// Profile provider returning a fixed (replaceable) user.
#[derive(Debug)]
pub struct ScriptedProfileProvider {
    user: Mutex<User>,
    calls: AtomicUsize,
}

impl ScriptedProfileProvider {
    /// Creates a provider answering with `user`.
    #[must_use]
    pub fn new(user: User) -> Self {
        Self {
            user: Mutex::new(user),
            calls: AtomicUsize::new(0),
        }
    }

    /// Replaces the user returned by later calls.
    pub fn set_user(&self, user: User) {
        *self.user.lock().unwrap_or_else(PoisonError::into_inner) = user;
    }

    /// Number of profile fetches.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileProvider for ScriptedProfileProvider {
    async fn fetch_profile(&self, _access_token: &str) -> Result<User, Report<AuthError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.user.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }
}
