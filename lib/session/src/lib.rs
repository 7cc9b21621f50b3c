//! Authenticated session lifecycle for the GPU console.
//!
//! This crate provides:
//! - `AuthSessionManager`: OAuth authorization-code and credential login,
//!   single-flight token refresh, logout and start-up restore
//! - `TokenStore` over a pluggable `StorageBackend` (in-memory or files)
//! - `IdentityProvider` / `ProfileProvider` seams with HTTP implementations
//! - `SessionSnapshot`: a token-free view of the session that resolves
//!   permissions through `gpu-console-access`
//!
//! Errors are reported as `rootcause::Report<AuthError>`.

mod config;
mod error;
mod manager;
mod oauth;
mod provider;
mod state;
mod store;
mod tokens;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{IdentityConfig, IdentityConfigBuilder, SessionConfig};
pub use error::AuthError;
pub use manager::{AuthSessionManager, LoginOutcome, SessionSnapshot};
pub use oauth::{AuthorizationRequest, CallbackParams, PendingLogin, authorization_request};
pub use provider::{
    HttpIdentityProvider, HttpProfileProvider, IdentityProvider, ProfileProvider,
    ProfileResponse, ProfileUser,
};
pub use state::SessionState;
pub use store::{
    FileBackend, MemoryBackend, PENDING_LOGIN_KEY, SESSION_KEY, SessionRecord, StorageBackend,
    TokenStore,
};
pub use tokens::{AuthTokens, TokenResponse};
