//! Login, logout and access-check routes.

use crate::error::ApiError;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    routing::{get, post},
};
use gpu_console_access::{DenialPolicy, GuardOutcome, Menu, MenuFilter, PageDecision};
use gpu_console_session::{AuthSessionManager, CallbackParams, SessionSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Where unauthenticated visitors of a gated page are sent.
const LOGIN_PATH: &str = "/auth/login";

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// The console session.
    pub manager: Arc<AuthSessionManager>,
    /// Navigation before permission filtering.
    pub menu: Menu,
}

impl AppState {
    /// Creates the state with the console's default navigation.
    pub fn new(manager: Arc<AuthSessionManager>) -> Self {
        Self {
            manager,
            menu: Menu::console_default(),
        }
    }
}

/// Builds the router for all console routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/login", get(login))
        .route("/auth/callback", get(callback))
        .route("/auth/credentials", post(credentials))
        .route("/auth/logout", post(logout))
        .route("/api/session", get(session))
        .route("/api/menu", get(menu))
        .route("/api/access/page", get(page_access))
        .route("/api/access/resource", get(resource_access))
        .with_state(state)
}

/// Only same-origin paths are followed after login.
fn local_path(path: Option<String>) -> Option<String> {
    path.filter(|p| p.starts_with('/') && !p.starts_with("//") && !p.contains('\\'))
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    return_to: Option<String>,
}

/// Redirects the browser to the identity provider.
async fn login(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LoginQuery>,
) -> Result<Redirect, ApiError> {
    let request = state.manager.initiate_login(local_path(query.return_to))?;
    Ok(Redirect::to(&request.url))
}

/// Completes the login the identity provider redirected back from.
async fn callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, ApiError> {
    let outcome = state.manager.complete_oauth_callback(params).await?;
    let target = local_path(outcome.return_to).unwrap_or_else(|| "/".to_string());
    Ok(Redirect::to(&target))
}

#[derive(Deserialize)]
pub struct CredentialsRequest {
    username: String,
    password: String,
}

async fn credentials(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CredentialsRequest>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let snapshot = state
        .manager
        .login_with_credentials(&request.username, &request.password)
        .await?;
    Ok(Json(snapshot))
}

async fn logout(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.manager.logout().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn session(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.manager.fresh_snapshot().await)
}

/// The navigation the current session may see.
async fn menu(State(state): State<Arc<AppState>>) -> Json<Menu> {
    let snapshot = state.manager.fresh_snapshot().await;
    let resolver = snapshot.resolver();
    Json(MenuFilter::new(&resolver).filter(&state.menu))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    path: String,
}

/// A page decision together with what the front end should do about it.
#[derive(Debug, Serialize)]
pub struct PageAccess {
    pub decision: PageDecision,
    pub action: GuardOutcome,
}

async fn page_access(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Json<PageAccess> {
    let snapshot = state.manager.fresh_snapshot().await;
    let guard = snapshot.access_guard(Arc::clone(state.manager.pages()));
    let decision = guard.check_page(&query.path);

    // Anonymous visitors are sent to log in; logged-in users get the fallback.
    let policy = if snapshot.is_authenticated() {
        DenialPolicy::Fallback
    } else {
        DenialPolicy::Redirect(format!(
            "{LOGIN_PATH}?return_to={}",
            urlencoding::encode(&decision.path)
        ))
    };
    let action = decision.apply(&policy);
    Json(PageAccess { decision, action })
}

#[derive(Debug, Deserialize)]
pub struct ResourceQuery {
    #[serde(rename = "type")]
    resource_type: String,
    owner: String,
}

#[derive(Debug, Serialize)]
pub struct ResourceAccess {
    pub allowed: bool,
}

async fn resource_access(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResourceQuery>,
) -> impl IntoResponse {
    let guard = state.manager.access_guard().await;
    let allowed = guard.evaluate_resource_named(&query.resource_type, &query.owner);
    debug!(resource_type = %query.resource_type, owner = %query.owner, allowed, "resource access");
    Json(ResourceAccess { allowed })
}
