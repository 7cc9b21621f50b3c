//! Session lifecycle orchestration.
//!
//! [`AuthSessionManager`] owns the session state machine and drives login
//! (OAuth authorization code or direct credentials), refresh and logout.
//! It keeps no copy of the tokens: every read goes through the shared
//! [`TokenStore`].
//!
//! # Single-flight refresh
//!
//! Refreshes run behind one async mutex. A caller notes the refresh
//! generation before queueing on the mutex; if the generation moved while
//! it waited, a refresh finished in the meantime and the caller returns that
//! refresh's outcome instead of starting its own. A caller that gets the
//! mutex without the generation moving re-reads the store first, so a token
//! that is already fresh (or a session that is already gone) is never
//! refreshed again.

use crate::config::{IdentityConfig, SessionConfig};
use crate::error::AuthError;
use crate::oauth::{self, AuthorizationRequest, CallbackParams};
use crate::provider::{IdentityProvider, ProfileProvider};
use crate::state::SessionState;
use crate::store::TokenStore;
use crate::tokens::{AuthTokens, TokenResponse};
use chrono::{DateTime, Duration, Utc};
use gpu_console_access::{AccessGuard, PagePermissionTable, PermissionResolver, User};
use gpu_console_core::SessionId;
use rootcause::prelude::Report;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Immutable view of the session at one instant.
///
/// Carries no token material, so it can be handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session_id: Option<SessionId>,
    pub user: Option<User>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    /// Snapshot of a session nobody is logged into.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            state: SessionState::Anonymous,
            session_id: None,
            user: None,
            expires_at: None,
        }
    }

    /// Returns true if the snapshot carries a usable authenticated user.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated && self.user.is_some()
    }

    /// Resolves the snapshot's permissions.
    ///
    /// Only an authenticated snapshot holds permissions; while a login or
    /// refresh is in progress, or after expiry, every check is denied.
    #[must_use]
    pub fn resolver(&self) -> PermissionResolver {
        if self.is_authenticated() {
            PermissionResolver::for_user(self.user.as_ref())
        } else {
            PermissionResolver::anonymous()
        }
    }

    /// Builds an access guard bound to this snapshot.
    #[must_use]
    pub fn access_guard(&self, pages: Arc<PagePermissionTable>) -> AccessGuard {
        let user_id = self
            .user
            .as_ref()
            .filter(|_| self.is_authenticated())
            .map(|user| user.id().clone());
        AccessGuard::new(self.resolver(), user_id, pages)
    }
}

/// A completed OAuth login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    pub session: SessionSnapshot,
    /// Console path the login was started from.
    pub return_to: Option<String>,
}

#[derive(Debug, Default)]
struct RefreshSlot {
    generation: u64,
    outcome: Option<Result<(), AuthError>>,
}

fn context(report: Report<AuthError>) -> AuthError {
    report.current_context().clone()
}

/// Owns the console session and its lifecycle.
pub struct AuthSessionManager {
    identity_config: IdentityConfig,
    config: SessionConfig,
    identity: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileProvider>,
    store: Arc<TokenStore>,
    pages: Arc<PagePermissionTable>,
    state: RwLock<SessionState>,
    refresh: Mutex<RefreshSlot>,
    refresh_generation: AtomicU64,
}

impl fmt::Debug for AuthSessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSessionManager")
            .field("state", &self.state())
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl AuthSessionManager {
    /// Creates a manager in the `Anonymous` state.
    ///
    /// Call [`Self::restore`] to pick up a session persisted by an earlier run.
    #[must_use]
    pub fn new(
        identity_config: IdentityConfig,
        config: SessionConfig,
        identity: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileProvider>,
        store: Arc<TokenStore>,
    ) -> Self {
        Self {
            identity_config,
            config,
            identity,
            profiles,
            store,
            pages: Arc::new(PagePermissionTable::console_default()),
            state: RwLock::new(SessionState::Anonymous),
            refresh: Mutex::new(RefreshSlot::default()),
            refresh_generation: AtomicU64::new(0),
        }
    }

    /// Uses a different page permission table for [`Self::access_guard`].
    #[must_use]
    pub fn with_pages(mut self, pages: Arc<PagePermissionTable>) -> Self {
        self.pages = pages;
        self
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the token store.
    #[must_use]
    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Returns the page permission table.
    #[must_use]
    pub fn pages(&self) -> &Arc<PagePermissionTable> {
        &self.pages
    }

    /// Starts an OAuth authorization-code login.
    ///
    /// Any current session ends. The returned URL carries a fresh CSRF state
    /// and PKCE challenge; both are kept in the store for the callback.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for unusable endpoint URLs and `Storage` if
    /// the pending login cannot be persisted.
    #[instrument(skip(self))]
    pub fn initiate_login(
        &self,
        return_to: Option<String>,
    ) -> Result<AuthorizationRequest, Report<AuthError>> {
        let (request, pending) =
            oauth::authorization_request(&self.identity_config, return_to, self.now())?;
        self.begin_login().map_err(|e| self.fail_login(e))?;
        self.store
            .put_pending_login(&pending)
            .map_err(|r| self.fail_login(context(r)))?;
        debug!("authorization request issued");
        Ok(request)
    }

    /// Completes an OAuth login from the callback parameters.
    ///
    /// The pending login is consumed whatever the outcome. A provider error,
    /// a missing code or a state that does not match the pending login fails
    /// before any network call.
    ///
    /// # Errors
    ///
    /// `ProviderError`, `MissingCode`, `StateMismatch`, or any error of the
    /// code exchange and profile fetch. A login in progress ends `Anonymous`;
    /// an established session is left as it is.
    #[instrument(skip_all)]
    pub async fn complete_oauth_callback(
        &self,
        params: CallbackParams,
    ) -> Result<LoginOutcome, Report<AuthError>> {
        let pending = self
            .store
            .take_pending_login()
            .map_err(|r| self.fail_login(context(r)))?;

        if let Some(error) = params.error {
            let description = match params.error_description {
                Some(details) => format!("{error}: {details}"),
                None => error,
            };
            return Err(self.fail_login(AuthError::ProviderError { description }));
        }
        let Some(code) = params.code.filter(|code| !code.is_empty()) else {
            return Err(self.fail_login(AuthError::MissingCode));
        };
        let pending = match pending {
            Some(pending)
                if pending.accepts(
                    params.state.as_deref(),
                    self.now(),
                    self.config.pending_login_ttl(),
                ) =>
            {
                pending
            }
            _ => {
                warn!("callback state does not match any pending login");
                return Err(self.fail_login(AuthError::StateMismatch));
            }
        };

        let response = self
            .call(
                "code exchange",
                self.identity.exchange_code(&code, &pending.pkce_verifier),
            )
            .await
            .map_err(|e| self.fail_login(e))?;
        let session = self
            .establish(response)
            .await
            .map_err(|e| self.fail_login(e))?;

        Ok(LoginOutcome {
            session,
            return_to: pending.return_to,
        })
    }

    /// Logs in with a username and password.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` for a rejected pair, or any transport error. The
    /// session is `Anonymous` afterwards.
    #[instrument(skip(self, password))]
    pub async fn login_with_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<SessionSnapshot, Report<AuthError>> {
        self.begin_login().map_err(|e| self.fail_login(e))?;
        let response = self
            .call(
                "credential exchange",
                self.identity.exchange_credentials(username, password),
            )
            .await
            .map_err(|e| self.fail_login(e))?;
        Ok(self
            .establish(response)
            .await
            .map_err(|e| self.fail_login(e))?)
    }

    /// Exchanges the stored refresh token for new tokens.
    ///
    /// Shares the single-flight slot with [`Self::ensure_fresh`], so it never
    /// races an automatic refresh.
    ///
    /// # Errors
    ///
    /// `SessionExpired` if the refresh token is missing or rejected; any
    /// other provider or transport error. Every failure logs the session out.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<SessionSnapshot, Report<AuthError>> {
        self.refresh_single_flight(true).await?;
        Ok(self.snapshot())
    }

    /// Makes sure the access token is usable, refreshing it if expired.
    ///
    /// Concurrent callers share a single refresh and observe its outcome.
    /// An anonymous session is returned as is.
    ///
    /// # Errors
    ///
    /// The refresh error if a refresh was needed and failed; the session is
    /// `Anonymous` afterwards.
    #[instrument(skip(self))]
    pub async fn ensure_fresh(&self) -> Result<SessionSnapshot, Report<AuthError>> {
        let Some(tokens) = self.store.load()? else {
            self.reconcile_missing_record();
            return Ok(self.snapshot());
        };
        if tokens.is_expired_at(self.now(), self.config.expiry_skew()) {
            debug!(expires_at = %tokens.expires_at, "access token expired");
            self.refresh_single_flight(false).await?;
        }
        Ok(self.snapshot())
    }

    /// Ends the session.
    ///
    /// Remote invalidation is best effort; the local record is removed
    /// regardless. Logging out an anonymous session succeeds.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the local record cannot be removed. The session
    /// is `Anonymous` afterwards either way.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), Report<AuthError>> {
        let record = self.store.load_record().unwrap_or_else(|report| {
            warn!(error = %report, "cannot read session record before logout");
            None
        });
        if let Some(record) = &record
            && let Err(err) = self
                .call("revocation", self.identity.revoke(&record.tokens))
                .await
        {
            warn!(session_id = %record.session_id, error = %err, "remote session invalidation failed");
        }
        if let Err(report) = self.store.take_pending_login() {
            warn!(error = %report, "failed to discard pending login");
        }
        self.purge_local()?;
        if let Some(record) = record {
            info!(session_id = %record.session_id, "logged out");
        }
        Ok(())
    }

    /// Picks up the session persisted in the store, if any.
    ///
    /// A stored session whose token is past expiry is restored as `Expired`
    /// and refreshed by the next [`Self::ensure_fresh`].
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store cannot be read.
    #[instrument(skip(self))]
    pub fn restore(&self) -> Result<SessionSnapshot, Report<AuthError>> {
        match self.store.load_record()? {
            Some(record) => {
                let next = if record.tokens.is_expired_at(self.now(), self.config.expiry_skew()) {
                    SessionState::Expired
                } else {
                    SessionState::Authenticated
                };
                self.transition(next);
                info!(session_id = %record.session_id, state = %next, "restored session");
            }
            None => {
                self.transition(SessionState::Anonymous);
            }
        }
        Ok(self.snapshot())
    }

    /// Re-fetches the user (and thereby the roles) from the profile backend.
    ///
    /// # Errors
    ///
    /// `SessionExpired` without a session; any refresh or profile error.
    #[instrument(skip(self))]
    pub async fn reload_profile(&self) -> Result<SessionSnapshot, Report<AuthError>> {
        self.ensure_fresh().await?;
        let Some(record) = self.store.load_record()? else {
            return Err(AuthError::SessionExpired.into());
        };
        let user = self
            .call(
                "profile fetch",
                self.profiles.fetch_profile(&record.tokens.access_token),
            )
            .await?;
        self.store
            .save_session(record.session_id, &record.tokens, &user)?;
        info!(session_id = %record.session_id, roles = ?user.roles().roles(), "profile reloaded");
        Ok(self.snapshot())
    }

    /// Returns the session as it is now, without refreshing.
    ///
    /// An authenticated session whose access token is already past expiry is
    /// reported as [`SessionState::Expired`] and grants nothing until
    /// [`Self::fresh_snapshot`] has refreshed it.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        if matches!(state, SessionState::Anonymous | SessionState::Authenticating) {
            return SessionSnapshot {
                state,
                ..SessionSnapshot::anonymous()
            };
        }
        let record = self.store.load_record().unwrap_or_else(|report| {
            warn!(error = %report, "cannot read session record");
            None
        });
        match record {
            Some(record) => SessionSnapshot {
                state: if state == SessionState::Authenticated
                    && record.tokens.is_expired_at(self.now(), Duration::zero())
                {
                    SessionState::Expired
                } else {
                    state
                },
                session_id: Some(record.session_id),
                user: Some(record.user),
                expires_at: Some(record.tokens.expires_at),
            },
            None => SessionSnapshot {
                state,
                ..SessionSnapshot::anonymous()
            },
        }
    }

    /// Runs [`Self::ensure_fresh`] and returns the resulting snapshot.
    ///
    /// A failed refresh has already logged the session out, so the snapshot
    /// is anonymous in that case.
    pub async fn fresh_snapshot(&self) -> SessionSnapshot {
        match self.ensure_fresh().await {
            Ok(snapshot) => snapshot,
            Err(report) => {
                warn!(error = %report, "session could not be refreshed");
                self.snapshot()
            }
        }
    }

    /// Returns an access guard for the fresh session.
    pub async fn access_guard(&self) -> AccessGuard {
        self.fresh_snapshot()
            .await
            .access_guard(Arc::clone(&self.pages))
    }

    fn now(&self) -> DateTime<Utc> {
        self.store.clock().now()
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let current = *state;
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "rejected session state transition");
            return false;
        }
        info!(from = %current, to = %next, "session state changed");
        *state = next;
        true
    }

    async fn call<T, F>(&self, operation: &'static str, call: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, Report<AuthError>>>,
    {
        match tokio::time::timeout(self.config.request_timeout(), call).await {
            Ok(result) => result.map_err(context),
            Err(_) => {
                warn!(operation, timeout = ?self.config.request_timeout(), "provider call timed out");
                Err(AuthError::Timeout { operation })
            }
        }
    }

    fn begin_login(&self) -> Result<(), AuthError> {
        let current = self.state();
        if !matches!(
            current,
            SessionState::Anonymous | SessionState::Authenticating
        ) {
            info!(state = %current, "new login ends the current session");
            self.purge_local()?;
        }
        self.transition(SessionState::Authenticating);
        Ok(())
    }

    fn fail_login(&self, err: AuthError) -> Report<AuthError> {
        warn!(error = %err, "login failed");
        if self.state() == SessionState::Authenticating {
            self.transition(SessionState::Anonymous);
        }
        err.into()
    }

    async fn establish(&self, response: TokenResponse) -> Result<SessionSnapshot, AuthError> {
        let tokens = AuthTokens::from_response(response, self.now());
        let user = self
            .call(
                "profile fetch",
                self.profiles.fetch_profile(&tokens.access_token),
            )
            .await?;
        let session_id = SessionId::new();
        self.store
            .save_session(session_id, &tokens, &user)
            .map_err(context)?;
        self.transition(SessionState::Authenticated);
        info!(%session_id, user_id = %user.id(), "session established");
        Ok(self.snapshot())
    }

    // A refresh only applies while the session it started from is still the
    // current one. Logout or a new login during the round trip supersedes it.
    fn refresh_is_current(
        &self,
        state: SessionState,
        session_id: SessionId,
    ) -> Result<bool, AuthError> {
        if state != SessionState::Refreshing {
            return Ok(false);
        }
        let record = self.store.load_record().map_err(context)?;
        Ok(record.is_some_and(|record| record.session_id == session_id))
    }

    // Saving and leaving `Refreshing` happen under the state lock, so nobody
    // observes the new token while the state still says `Refreshing`.
    fn commit_refresh(
        &self,
        session_id: SessionId,
        tokens: &AuthTokens,
    ) -> Result<bool, AuthError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !self.refresh_is_current(*state, session_id)? {
            return Ok(false);
        }
        self.store.save(tokens).map_err(context)?;
        info!(from = %*state, to = %SessionState::Authenticated, "session state changed");
        *state = SessionState::Authenticated;
        Ok(true)
    }

    fn abandon_refresh(&self, session_id: SessionId) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Ok(false) = self.refresh_is_current(*state, session_id) {
            debug!(%session_id, "refresh failed after the session was replaced");
            return;
        }
        if let Err(report) = self.store.clear() {
            warn!(error = %report, "failed to clear session record");
        }
        info!(from = %*state, to = %SessionState::Anonymous, "session state changed");
        *state = SessionState::Anonymous;
    }

    fn purge_local(&self) -> Result<(), AuthError> {
        let result = self.store.clear().map_err(context);
        if let Err(err) = &result {
            warn!(error = %err, "failed to clear session record");
        }
        self.transition(SessionState::Anonymous);
        result
    }

    fn reconcile_missing_record(&self) {
        if matches!(
            self.state(),
            SessionState::Authenticated | SessionState::Expired
        ) {
            warn!("session record disappeared from the store");
            self.transition(SessionState::Anonymous);
        }
    }

    async fn refresh_single_flight(&self, force: bool) -> Result<(), AuthError> {
        let observed = self.refresh_generation.load(Ordering::Acquire);
        let mut slot = self.refresh.lock().await;
        if slot.generation != observed
            && let Some(outcome) = &slot.outcome
        {
            debug!("joined a refresh that finished while waiting");
            return outcome.clone();
        }

        if !force {
            match self.store.load().map_err(context)? {
                None => {
                    self.reconcile_missing_record();
                    return Err(AuthError::SessionExpired);
                }
                Some(tokens) if !tokens.is_expired_at(self.now(), self.config.expiry_skew()) => {
                    return Ok(());
                }
                Some(_) => {}
            }
        }

        let outcome = self.run_refresh().await;
        slot.generation += 1;
        slot.outcome = Some(outcome.clone());
        self.refresh_generation
            .store(slot.generation, Ordering::Release);
        outcome
    }

    async fn run_refresh(&self) -> Result<(), AuthError> {
        let Some(record) = self.store.load_record().map_err(context)? else {
            self.reconcile_missing_record();
            return Err(AuthError::SessionExpired);
        };
        self.transition(SessionState::Refreshing);

        let response = match record.tokens.refresh_token.as_deref() {
            Some(refresh_token) => {
                self.call("token refresh", self.identity.refresh(refresh_token))
                    .await
            }
            None => Err(AuthError::SessionExpired),
        };
        let refreshed = response.and_then(|response| {
            let tokens = record.tokens.clone().refreshed(response, self.now());
            self.commit_refresh(record.session_id, &tokens)
                .map(|committed| committed.then_some(tokens.expires_at))
        });

        match refreshed {
            Ok(Some(expires_at)) => {
                info!(session_id = %record.session_id, %expires_at, "session refreshed");
                Ok(())
            }
            Ok(None) => {
                info!(session_id = %record.session_id, "session replaced during refresh; discarding tokens");
                Ok(())
            }
            Err(err) => {
                warn!(session_id = %record.session_id, error = %err, "refresh failed; logging out");
                self.abandon_refresh(record.session_id);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use crate::testing::{
        PASSWORD, REJECTED_CODE, ScriptedIdentityProvider, ScriptedProfileProvider, USERNAME,
    };
    use chrono::TimeZone;
    use futures::future::join_all;
    use gpu_console_access::{Permission, Role, RoleSet};
    use gpu_console_core::ManualClock;

    struct Harness {
        manager: Arc<AuthSessionManager>,
        identity: Arc<ScriptedIdentityProvider>,
        profiles: Arc<ScriptedProfileProvider>,
        store: Arc<TokenStore>,
        clock: ManualClock,
    }

    fn identity_config() -> IdentityConfig {
        IdentityConfig::builder(
            "https://id.example.com/authorize",
            "https://id.example.com/token",
            "https://id.example.com/me",
            "console",
            "https://console.example.com/auth/callback",
        )
        .build()
    }

    fn user() -> User {
        User::new("u-1", USERNAME).with_roles(RoleSet::new([Role::User]))
    }

    fn harness_with(identity: ScriptedIdentityProvider) -> Harness {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let store = Arc::new(TokenStore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(clock.clone()),
        ));
        manager_over(store, clock, identity)
    }

    fn manager_over(
        store: Arc<TokenStore>,
        clock: ManualClock,
        identity: ScriptedIdentityProvider,
    ) -> Harness {
        let identity = Arc::new(identity);
        let profiles = Arc::new(ScriptedProfileProvider::new(user()));
        let manager = Arc::new(AuthSessionManager::new(
            identity_config(),
            SessionConfig::default(),
            identity.clone(),
            profiles.clone(),
            store.clone(),
        ));
        Harness {
            manager,
            identity,
            profiles,
            store,
            clock,
        }
    }

    fn harness() -> Harness {
        harness_with(ScriptedIdentityProvider::new())
    }

    async fn logged_in() -> Harness {
        let h = harness();
        h.manager
            .login_with_credentials(USERNAME, PASSWORD)
            .await
            .expect("login");
        h
    }

    fn expire(h: &Harness) {
        h.clock.advance(Duration::hours(2));
    }

    #[tokio::test]
    async fn credential_login_establishes_session() {
        let h = harness();
        let snapshot = h
            .manager
            .login_with_credentials(USERNAME, PASSWORD)
            .await
            .expect("login");

        assert_eq!(snapshot.state, SessionState::Authenticated);
        assert_eq!(snapshot.user, Some(user()));
        assert!(snapshot.session_id.is_some());
        assert!(snapshot.resolver().has_permission(Permission::ViewDashboard));
        assert_eq!(h.identity.credential_calls(), 1);
        assert_eq!(h.profiles.calls(), 1);
        assert_eq!(
            h.store.load().expect("load").map(|t| t.access_token).as_deref(),
            Some("access-1")
        );
    }

    #[tokio::test]
    async fn rejected_credentials_leave_session_anonymous() {
        let h = harness();
        let err = h
            .manager
            .login_with_credentials(USERNAME, "wrong")
            .await
            .expect_err("rejected");

        assert_eq!(err.current_context(), &AuthError::InvalidCredentials);
        assert_eq!(h.manager.state(), SessionState::Anonymous);
        assert_eq!(h.profiles.calls(), 0);
        assert!(h.store.load().expect("load").is_none());
    }

    #[tokio::test]
    async fn oauth_login_round_trip() {
        let h = harness();
        let request = h
            .manager
            .initiate_login(Some("/instances".to_string()))
            .expect("initiate");
        assert_eq!(h.manager.state(), SessionState::Authenticating);

        let outcome = h
            .manager
            .complete_oauth_callback(CallbackParams::success("code-1", &request.state))
            .await
            .expect("callback");

        assert_eq!(outcome.return_to.as_deref(), Some("/instances"));
        assert!(outcome.session.is_authenticated());
        assert_eq!(h.identity.exchange_code_calls(), 1);
    }

    #[tokio::test]
    async fn mismatched_state_fails_before_any_exchange() {
        let h = harness();
        h.manager.initiate_login(None).expect("initiate");

        let err = h
            .manager
            .complete_oauth_callback(CallbackParams::success("code-1", "forged-state"))
            .await
            .expect_err("mismatch");

        assert_eq!(err.current_context(), &AuthError::StateMismatch);
        assert_eq!(h.identity.exchange_code_calls(), 0);
        assert_eq!(h.identity.network_calls(), 0);
        assert_eq!(h.manager.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn missing_code_fails_without_network_calls() {
        let h = harness();
        let request = h.manager.initiate_login(None).expect("initiate");

        let params = CallbackParams {
            state: Some(request.state),
            ..CallbackParams::default()
        };
        let err = h
            .manager
            .complete_oauth_callback(params)
            .await
            .expect_err("missing code");

        assert_eq!(err.current_context(), &AuthError::MissingCode);
        assert_eq!(h.identity.network_calls(), 0);
        assert_eq!(h.profiles.calls(), 0);
    }

    #[tokio::test]
    async fn provider_error_is_surfaced() {
        let h = harness();
        let request = h.manager.initiate_login(None).expect("initiate");

        let params = CallbackParams {
            state: Some(request.state),
            error: Some("access_denied".to_string()),
            error_description: Some("user cancelled".to_string()),
            ..CallbackParams::default()
        };
        let err = h
            .manager
            .complete_oauth_callback(params)
            .await
            .expect_err("provider error");

        assert_eq!(
            err.current_context(),
            &AuthError::ProviderError {
                description: "access_denied: user cancelled".to_string()
            }
        );
        assert_eq!(h.identity.network_calls(), 0);
    }

    #[tokio::test]
    async fn callback_is_never_processed_twice() {
        let h = harness();
        let request = h.manager.initiate_login(None).expect("initiate");
        let params = CallbackParams::success("code-1", &request.state);

        h.manager
            .complete_oauth_callback(params.clone())
            .await
            .expect("first callback");
        let err = h
            .manager
            .complete_oauth_callback(params)
            .await
            .expect_err("replay");

        assert_eq!(err.current_context(), &AuthError::StateMismatch);
        assert_eq!(h.identity.exchange_code_calls(), 1);
        // A replayed callback does not end the established session.
        assert_eq!(h.manager.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn callback_without_pending_login_is_rejected() {
        let h = harness();
        let err = h
            .manager
            .complete_oauth_callback(CallbackParams::success("code-1", "state"))
            .await
            .expect_err("no pending login");
        assert_eq!(err.current_context(), &AuthError::StateMismatch);
        assert_eq!(h.identity.network_calls(), 0);
    }

    #[tokio::test]
    async fn stale_pending_login_is_rejected() {
        let h = harness();
        let request = h.manager.initiate_login(None).expect("initiate");
        h.clock.advance(Duration::minutes(11));

        let err = h
            .manager
            .complete_oauth_callback(CallbackParams::success("code-1", &request.state))
            .await
            .expect_err("stale");
        assert_eq!(err.current_context(), &AuthError::StateMismatch);
        assert_eq!(h.identity.network_calls(), 0);
    }

    #[tokio::test]
    async fn failed_code_exchange_returns_to_anonymous() {
        let h = harness();
        let request = h.manager.initiate_login(None).expect("initiate");

        let err = h
            .manager
            .complete_oauth_callback(CallbackParams::success(REJECTED_CODE, &request.state))
            .await
            .expect_err("exchange fails");

        assert_eq!(err.current_context().kind(), "provider_error");
        assert_eq!(h.identity.exchange_code_calls(), 1);
        assert_eq!(h.manager.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn new_login_ends_current_session() {
        let h = logged_in().await;
        h.manager.initiate_login(None).expect("initiate");

        assert_eq!(h.manager.state(), SessionState::Authenticating);
        assert!(h.store.load().expect("load").is_none());
        assert!(!h.manager.snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn fresh_session_is_not_refreshed() {
        let h = logged_in().await;
        let snapshot = h.manager.ensure_fresh().await.expect("fresh");

        assert!(snapshot.is_authenticated());
        assert_eq!(h.identity.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn anonymous_session_needs_no_refresh() {
        let h = harness();
        let snapshot = h.manager.ensure_fresh().await.expect("anonymous");
        assert_eq!(snapshot, SessionSnapshot::anonymous());
        assert_eq!(h.identity.network_calls(), 0);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_once_before_permission_checks() {
        let h = logged_in().await;
        expire(&h);

        let guard = h.manager.access_guard().await;

        assert_eq!(h.identity.refresh_calls(), 1);
        assert!(guard.resolver().has_permission(Permission::ViewDashboard));
        assert!(guard.evaluate_resource_named("instances", "u-1"));
        assert_eq!(h.manager.state(), SessionState::Authenticated);

        h.manager.access_guard().await;
        assert_eq!(h.identity.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn refresh_failure_logs_out_and_denies_everything() {
        let h = logged_in().await;
        expire(&h);
        h.identity.fail_refresh_with(Some(AuthError::NetworkFailure {
            details: "connection reset".to_string(),
        }));

        let guard = h.manager.access_guard().await;

        assert_eq!(h.identity.refresh_calls(), 1);
        for permission in Permission::ALL {
            assert!(!guard.resolver().has_permission(*permission));
        }
        assert!(guard.user_id().is_none());
        assert_eq!(h.manager.state(), SessionState::Anonymous);
        assert!(h.store.load().expect("load").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_refresh() {
        let h = harness_with(
            ScriptedIdentityProvider::new().with_delay(std::time::Duration::from_millis(50)),
        );
        h.manager
            .login_with_credentials(USERNAME, PASSWORD)
            .await
            .expect("login");
        expire(&h);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = Arc::clone(&h.manager);
                tokio::spawn(async move {
                    manager
                        .ensure_fresh()
                        .await
                        .map_err(|report| report.current_context().clone())
                })
            })
            .collect();
        let results: Vec<_> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.expect("task"))
            .collect();

        assert_eq!(h.identity.refresh_calls(), 1);
        let first = results[0].clone().expect("refreshed");
        assert!(first.is_authenticated());
        for result in results {
            assert_eq!(result, Ok(first.clone()));
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_failure() {
        let h = harness_with(
            ScriptedIdentityProvider::new().with_delay(std::time::Duration::from_millis(20)),
        );
        h.manager
            .login_with_credentials(USERNAME, PASSWORD)
            .await
            .expect("login");
        expire(&h);
        h.identity.fail_refresh_with(Some(AuthError::SessionExpired));

        let results = join_all((0..8).map(|_| h.manager.ensure_fresh())).await;

        assert_eq!(h.identity.refresh_calls(), 1);
        for result in results {
            let err = result.expect_err("refresh failed");
            assert_eq!(err.current_context(), &AuthError::SessionExpired);
        }
        assert_eq!(h.manager.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn refresh_keeps_or_rotates_refresh_token() {
        let h = logged_in().await;
        h.manager.refresh().await.expect("refresh");
        let tokens = h.store.load().expect("load").expect("tokens");
        assert_eq!(tokens.access_token, "access-2");
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-1"));

        let h = harness_with(ScriptedIdentityProvider::new().with_rotating_refresh_tokens());
        h.manager
            .login_with_credentials(USERNAME, PASSWORD)
            .await
            .expect("login");
        h.manager.refresh().await.expect("refresh");
        let tokens = h.store.load().expect("load").expect("tokens");
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn refresh_keeps_user_untouched() {
        let h = logged_in().await;
        h.profiles
            .set_user(User::new("u-1", USERNAME).with_roles(RoleSet::new([Role::Admin])));

        let snapshot = h.manager.refresh().await.expect("refresh");
        assert_eq!(snapshot.user, Some(user()));
        assert_eq!(h.profiles.calls(), 1);
    }

    #[tokio::test]
    async fn reload_profile_replaces_user() {
        let h = logged_in().await;
        let session_id = h.manager.snapshot().session_id;
        h.profiles
            .set_user(User::new("u-1", USERNAME).with_roles(RoleSet::new([Role::Operator])));

        let snapshot = h.manager.reload_profile().await.expect("reload");

        assert_eq!(snapshot.session_id, session_id);
        assert!(snapshot.resolver().has_permission(Permission::DrainNodes));
        assert_eq!(h.profiles.calls(), 2);
    }

    #[tokio::test]
    async fn refresh_without_session_is_expired() {
        let h = harness();
        let err = h.manager.refresh().await.expect_err("no session");
        assert_eq!(err.current_context(), &AuthError::SessionExpired);
        assert_eq!(h.identity.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn logout_is_best_effort_and_idempotent() {
        let h = logged_in().await;
        h.identity.fail_revoke_with(Some(AuthError::NetworkFailure {
            details: "unreachable".to_string(),
        }));

        h.manager.logout().await.expect("logout");
        assert_eq!(h.identity.revoke_calls(), 1);
        assert_eq!(h.manager.state(), SessionState::Anonymous);
        assert!(h.store.load_record().expect("load").is_none());

        h.manager.logout().await.expect("second logout");
        assert_eq!(h.identity.revoke_calls(), 1);
        assert_eq!(h.manager.snapshot(), SessionSnapshot::anonymous());
    }

    #[tokio::test]
    async fn restore_reads_the_shared_store() {
        let h = logged_in().await;
        let restarted = manager_over(
            Arc::clone(&h.store),
            h.clock.clone(),
            ScriptedIdentityProvider::new(),
        );

        let snapshot = restarted.manager.restore().expect("restore");
        assert_eq!(snapshot.state, SessionState::Authenticated);
        assert_eq!(snapshot.user, Some(user()));
    }

    #[tokio::test]
    async fn restored_stale_session_is_refreshed_on_first_check() {
        let h = logged_in().await;
        expire(&h);
        let restarted = manager_over(
            Arc::clone(&h.store),
            h.clock.clone(),
            ScriptedIdentityProvider::new(),
        );

        let snapshot = restarted.manager.restore().expect("restore");
        assert_eq!(snapshot.state, SessionState::Expired);
        assert!(!snapshot.resolver().has_permission(Permission::ViewDashboard));

        let snapshot = restarted.manager.ensure_fresh().await.expect("refresh");
        assert_eq!(snapshot.state, SessionState::Authenticated);
        assert_eq!(restarted.identity.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn restore_of_empty_store_is_anonymous() {
        let h = harness();
        assert_eq!(h.manager.restore().expect("restore"), SessionSnapshot::anonymous());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let h = harness_with(
            ScriptedIdentityProvider::new().with_delay(std::time::Duration::from_secs(60)),
        );
        let err = h
            .manager
            .login_with_credentials(USERNAME, PASSWORD)
            .await
            .expect_err("timeout");

        assert_eq!(
            err.current_context(),
            &AuthError::Timeout {
                operation: "credential exchange"
            }
        );
        assert_eq!(h.manager.state(), SessionState::Anonymous);
    }

    fn second_user() -> User {
        User::new("u-2", "bob").with_roles(RoleSet::new([Role::Admin]))
    }

    /// Logs in, lets the token lapse and starts a refresh that stalls for
    /// 200ms, returning once the refresh is in flight.
    async fn refresh_in_flight(
        identity: ScriptedIdentityProvider,
    ) -> (Harness, tokio::task::JoinHandle<Result<SessionSnapshot, AuthError>>) {
        let h = harness_with(identity.with_refresh_delay(std::time::Duration::from_millis(200)));
        h.manager
            .login_with_credentials(USERNAME, PASSWORD)
            .await
            .expect("login");
        expire(&h);

        let manager = Arc::clone(&h.manager);
        let refresh = tokio::spawn(async move {
            manager
                .ensure_fresh()
                .await
                .map_err(|report| report.current_context().clone())
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(h.manager.state(), SessionState::Refreshing);
        (h, refresh)
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_finishing_after_new_login_keeps_new_session() {
        let (h, refresh) = refresh_in_flight(ScriptedIdentityProvider::new()).await;

        h.profiles.set_user(second_user());
        let second = h
            .manager
            .login_with_credentials(USERNAME, PASSWORD)
            .await
            .expect("second login");

        let outcome = refresh.await.expect("task").expect("superseded refresh");
        assert_eq!(outcome.session_id, second.session_id);
        assert_eq!(h.identity.refresh_calls(), 1);

        let record = h.store.load_record().expect("load").expect("record");
        assert_eq!(Some(record.session_id), second.session_id);
        assert_eq!(record.user, second_user());
        assert_eq!(record.tokens.access_token, "access-2");
        assert_eq!(record.tokens.refresh_token.as_deref(), Some("refresh-2"));
        assert_eq!(h.manager.state(), SessionState::Authenticated);
        assert!(h.manager.snapshot().is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_failing_after_new_login_keeps_new_session() {
        let (h, refresh) = refresh_in_flight(ScriptedIdentityProvider::new()).await;
        h.identity.fail_refresh_with(Some(AuthError::SessionExpired));

        h.profiles.set_user(second_user());
        h.manager
            .login_with_credentials(USERNAME, PASSWORD)
            .await
            .expect("second login");

        let err = refresh.await.expect("task").expect_err("refresh fails");
        assert_eq!(err, AuthError::SessionExpired);

        let record = h.store.load_record().expect("load").expect("record");
        assert_eq!(record.user, second_user());
        assert_eq!(record.tokens.access_token, "access-2");
        assert_eq!(h.manager.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn lapsed_token_is_not_reported_authenticated() {
        let h = logged_in().await;
        assert!(h.manager.snapshot().is_authenticated());

        expire(&h);
        let snapshot = h.manager.snapshot();
        assert_eq!(snapshot.state, SessionState::Expired);
        assert!(!snapshot.is_authenticated());
        assert!(snapshot.resolver().permissions().is_empty());
        assert_eq!(h.identity.refresh_calls(), 0);

        let snapshot = h.manager.fresh_snapshot().await;
        assert_eq!(snapshot.state, SessionState::Authenticated);
        assert!(snapshot.resolver().has_permission(Permission::ViewDashboard));
    }

    #[test]
    fn non_authenticated_snapshots_hold_no_permissions() {
        let snapshot = SessionSnapshot {
            state: SessionState::Refreshing,
            session_id: Some(SessionId::new()),
            user: Some(User::new("root", "root").with_roles(RoleSet::new([Role::Admin]))),
            expires_at: None,
        };
        assert!(snapshot.resolver().permissions().is_empty());

        let guard = snapshot.access_guard(Arc::new(PagePermissionTable::console_default()));
        assert!(guard.user_id().is_none());
        assert!(!guard.evaluate_page("/dashboard"));
    }
}
