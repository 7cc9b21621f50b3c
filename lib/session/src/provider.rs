//! Identity and profile backends.
//!
//! The session manager talks to its collaborators only through
//! [`IdentityProvider`] and [`ProfileProvider`]. The HTTP implementations
//! run the OAuth2 grants through an `oauth2` client and fetch the profile
//! with a bearer token.

use crate::config::IdentityConfig;
use crate::error::AuthError;
use crate::tokens::{AuthTokens, DEFAULT_EXPIRES_IN_SECONDS, TokenResponse};
use async_trait::async_trait;
use gpu_console_access::{Organization, RoleSet, User};
use oauth2::basic::{
    BasicErrorResponse, BasicErrorResponseType, BasicRevocationErrorResponse,
    BasicTokenIntrospectionResponse, BasicTokenType,
};
use oauth2::{
    AccessToken, AuthType, AuthorizationCode, ClientId, ClientSecret, EndpointMaybeSet,
    EndpointNotSet, EndpointSet, ErrorResponse, PkceCodeVerifier, RedirectUrl, RefreshToken,
    RequestTokenError, ResourceOwnerPassword, ResourceOwnerUsername, RevocationUrl, Scope,
    StandardRevocableToken, TokenUrl,
};
use reqwest::StatusCode;
use rootcause::prelude::Report;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, instrument};

/// Exchanges codes, credentials and refresh tokens for tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Redeems an authorization code.
    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<TokenResponse, Report<AuthError>>;

    /// Performs a direct username/password exchange.
    async fn exchange_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenResponse, Report<AuthError>>;

    /// Redeems a refresh token. The response may carry a rotated refresh token.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, Report<AuthError>>;

    /// Invalidates the session at the provider.
    async fn revoke(&self, tokens: &AuthTokens) -> Result<(), Report<AuthError>>;
}

/// Returns the profile of the user an access token belongs to.
#[async_trait]
pub trait ProfileProvider: Send + Sync {
    async fn fetch_profile(&self, access_token: &str) -> Result<User, Report<AuthError>>;
}

/// Profile payload `{user, roles}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileResponse {
    pub user: ProfileUser,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// User part of a profile payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUser {
    pub id: String,
    pub username: String,
    #[serde(default, alias = "display_name")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub organization: Option<Organization>,
}

impl ProfileResponse {
    /// Converts the payload into a `User`. Unknown role names are logged and skipped.
    #[must_use]
    pub fn into_user(self) -> User {
        User::new(self.user.id, self.user.username)
            .with_display_name(self.user.display_name)
            .with_email(self.user.email)
            .with_organization(self.user.organization)
            .with_roles(RoleSet::from_names(&self.roles))
    }
}

/// Token endpoint answer as the OAuth client parses it.
///
/// Accepts the console backend's camelCase as well as standard snake_case,
/// and tolerates a missing `token_type`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleTokenResponse {
    #[serde(alias = "access_token")]
    access_token: AccessToken,
    #[serde(default, alias = "refresh_token", skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshToken>,
    #[serde(default, alias = "id_token", skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
    #[serde(default, alias = "expires_in", skip_serializing_if = "Option::is_none")]
    expires_in: Option<u64>,
    #[serde(
        default = "bearer",
        alias = "token_type",
        deserialize_with = "token_type_any_case"
    )]
    token_type: BasicTokenType,
}

fn bearer() -> BasicTokenType {
    BasicTokenType::Bearer
}

fn token_type_any_case<'de, D>(deserializer: D) -> Result<BasicTokenType, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    Ok(match name.to_ascii_lowercase().as_str() {
        "bearer" => BasicTokenType::Bearer,
        "mac" => BasicTokenType::Mac,
        _ => BasicTokenType::Extension(name),
    })
}

impl std::fmt::Debug for ConsoleTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleTokenResponse")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[redacted]"))
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

impl oauth2::TokenResponse for ConsoleTokenResponse {
    type TokenType = BasicTokenType;

    fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    fn token_type(&self) -> &BasicTokenType {
        &self.token_type
    }

    fn expires_in(&self) -> Option<std::time::Duration> {
        self.expires_in.map(std::time::Duration::from_secs)
    }

    fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    // Granted scopes are not reported by the console backend.
    fn scopes(&self) -> Option<&Vec<Scope>> {
        None
    }
}

impl From<ConsoleTokenResponse> for TokenResponse {
    fn from(response: ConsoleTokenResponse) -> Self {
        let token_type = match &response.token_type {
            BasicTokenType::Bearer => "Bearer".to_string(),
            BasicTokenType::Extension(name) => name.clone(),
            other => format!("{other:?}"),
        };
        Self {
            access_token: response.access_token.secret().clone(),
            refresh_token: response.refresh_token.map(|token| token.secret().clone()),
            id_token: response.id_token,
            expires_in: response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECONDS),
            token_type,
        }
    }
}

/// OAuth client for the console's identity backend.
type ConsoleOAuthClient = oauth2::Client<
    BasicErrorResponse,
    ConsoleTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointMaybeSet,
    EndpointSet,
>;

/// The grant a token request was made with; decides how `invalid_grant` reads.
#[derive(Debug, Clone, Copy)]
enum Grant {
    AuthorizationCode,
    Password,
    RefreshToken,
}

fn transport_error(err: &reqwest::Error, operation: &'static str) -> AuthError {
    if err.is_timeout() {
        AuthError::Timeout { operation }
    } else {
        AuthError::NetworkFailure {
            details: err.to_string(),
        }
    }
}

fn http_client() -> Result<reqwest::Client, AuthError> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| AuthError::Configuration {
            details: format!("failed to create HTTP client: {e}"),
        })
}

fn endpoint<T>(
    what: &str,
    url: &str,
    parse: fn(String) -> Result<T, oauth2::url::ParseError>,
) -> Result<T, AuthError> {
    parse(url.to_string()).map_err(|e| AuthError::Configuration {
        details: format!("invalid {what}: {e}"),
    })
}

/// Identity provider speaking OAuth2 over HTTP.
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    http: reqwest::Client,
    client: ConsoleOAuthClient,
    scopes: Vec<Scope>,
    revocable: bool,
}

impl HttpIdentityProvider {
    /// Creates a provider for the configured endpoints.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if an endpoint is not a valid URL or the HTTP
    /// client cannot be created.
    pub fn new(config: IdentityConfig) -> Result<Self, Report<AuthError>> {
        let token_url = endpoint("token endpoint", config.token_endpoint(), TokenUrl::new)?;
        let redirect_url = endpoint("redirect URI", config.redirect_uri(), RedirectUrl::new)?;
        let revocation_url = config
            .revocation_endpoint()
            .map(|url| endpoint("revocation endpoint", url, RevocationUrl::new))
            .transpose()?;
        let revocable = revocation_url.is_some();

        let client = oauth2::Client::new(ClientId::new(config.client_id().to_string()))
            .set_auth_type(AuthType::RequestBody)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url)
            .set_revocation_url_option(revocation_url);
        let client = match config.client_secret() {
            Some(secret) => client.set_client_secret(ClientSecret::new(secret.to_string())),
            None => client,
        };

        Ok(Self {
            http: http_client()?,
            client,
            scopes: config
                .scopes()
                .into_iter()
                .map(|scope| Scope::new(scope.to_string()))
                .collect(),
            revocable,
        })
    }
}

fn token_error<RE>(grant: Grant, err: RequestTokenError<RE, BasicErrorResponse>) -> AuthError
where
    RE: std::error::Error + 'static,
{
    let RequestTokenError::ServerResponse(response) = err else {
        return request_error(err);
    };
    match (grant, response.error()) {
        (Grant::Password, BasicErrorResponseType::InvalidGrant) => AuthError::InvalidCredentials,
        (Grant::RefreshToken, BasicErrorResponseType::InvalidGrant) => AuthError::SessionExpired,
        (_, error) => AuthError::ProviderError {
            description: response
                .error_description()
                .cloned()
                .unwrap_or_else(|| error.to_string()),
        },
    }
}

fn request_error<RE, TE>(err: RequestTokenError<RE, TE>) -> AuthError
where
    RE: std::error::Error + 'static,
    TE: ErrorResponse + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => AuthError::ProviderError {
            description: response.to_string(),
        },
        RequestTokenError::Request(err) => {
            let mut details = err.to_string();
            let mut source = err.source();
            while let Some(cause) = source {
                details.push_str(": ");
                details.push_str(&cause.to_string());
                source = cause.source();
            }
            AuthError::NetworkFailure { details }
        }
        RequestTokenError::Parse(err, _) => AuthError::ProviderError {
            description: format!("malformed provider response: {err}"),
        },
        other => AuthError::ProviderError {
            description: other.to_string(),
        },
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip_all)]
    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<TokenResponse, Report<AuthError>> {
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| token_error(Grant::AuthorizationCode, e))?;
        Ok(response.into())
    }

    #[instrument(skip(self, password))]
    async fn exchange_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenResponse, Report<AuthError>> {
        let username = ResourceOwnerUsername::new(username.to_string());
        let password = ResourceOwnerPassword::new(password.to_string());
        let response = self
            .client
            .exchange_password(&username, &password)
            .add_scopes(self.scopes.iter().cloned())
            .request_async(&self.http)
            .await
            .map_err(|e| token_error(Grant::Password, e))?;
        Ok(response.into())
    }

    #[instrument(skip_all)]
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, Report<AuthError>> {
        let refresh_token = RefreshToken::new(refresh_token.to_string());
        let response = self
            .client
            .exchange_refresh_token(&refresh_token)
            .request_async(&self.http)
            .await
            .map_err(|e| token_error(Grant::RefreshToken, e))?;
        Ok(response.into())
    }

    /// Revokes the refresh token, or the access token if there is none.
    /// Without a revocation endpoint nothing is sent.
    #[instrument(skip_all)]
    async fn revoke(&self, tokens: &AuthTokens) -> Result<(), Report<AuthError>> {
        if !self.revocable {
            debug!("no revocation endpoint configured; skipping remote logout");
            return Ok(());
        }
        let token = match &tokens.refresh_token {
            Some(refresh_token) => {
                StandardRevocableToken::RefreshToken(RefreshToken::new(refresh_token.clone()))
            }
            None => StandardRevocableToken::AccessToken(AccessToken::new(
                tokens.access_token.clone(),
            )),
        };
        self.client
            .revoke_token(token)
            .map_err(|e| AuthError::Configuration {
                details: format!("cannot revoke: {e}"),
            })?
            .request_async(&self.http)
            .await
            .map_err(request_error)?;
        Ok(())
    }
}

/// Profile backend reached over HTTP with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpProfileProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpProfileProvider {
    /// Creates a provider for the configured profile endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the HTTP client cannot be created.
    pub fn new(config: &IdentityConfig) -> Result<Self, Report<AuthError>> {
        Ok(Self {
            client: http_client()?,
            endpoint: config.profile_endpoint().to_string(),
        })
    }
}

#[async_trait]
impl ProfileProvider for HttpProfileProvider {
    #[instrument(skip_all)]
    async fn fetch_profile(&self, access_token: &str) -> Result<User, Report<AuthError>> {
        let response = self
            .client
            .get(&self.endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error(&e, "profile fetch"))?;

        match response.status() {
            status if status.is_success() => {
                let profile = response.json::<ProfileResponse>().await.map_err(|e| {
                    AuthError::ProviderError {
                        description: format!("malformed profile response: {e}"),
                    }
                })?;
                Ok(profile.into_user())
            }
            StatusCode::UNAUTHORIZED => Err(AuthError::SessionExpired.into()),
            status => Err(AuthError::ProviderError {
                description: format!("profile endpoint returned {status}"),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::post;
    use axum::{Form, Json, Router};
    use gpu_console_access::Role;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn server_error(body: &str) -> RequestTokenError<std::io::Error, BasicErrorResponse> {
        RequestTokenError::ServerResponse(serde_json::from_str(body).expect("error body"))
    }

    #[test]
    fn invalid_grant_depends_on_grant_type() {
        let body = r#"{"error":"invalid_grant","error_description":"bad"}"#;
        assert_eq!(
            token_error(Grant::Password, server_error(body)),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            token_error(Grant::RefreshToken, server_error(body)),
            AuthError::SessionExpired
        );
        assert_eq!(
            token_error(Grant::AuthorizationCode, server_error(body)),
            AuthError::ProviderError {
                description: "bad".to_string()
            }
        );
    }

    #[test]
    fn other_provider_errors_keep_their_description() {
        let err = token_error(Grant::Password, server_error(r#"{"error":"invalid_client"}"#));
        assert_eq!(
            err,
            AuthError::ProviderError {
                description: "invalid_client".to_string()
            }
        );

        let err = token_error(
            Grant::Password,
            RequestTokenError::<std::io::Error, BasicErrorResponse>::Other(
                "unexpected status".to_string(),
            ),
        );
        assert_eq!(err.kind(), "provider_error");

        let err = token_error(
            Grant::RefreshToken,
            RequestTokenError::<_, BasicErrorResponse>::Request(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )),
        );
        assert_eq!(err.kind(), "network_failure");
    }

    #[test]
    fn token_response_accepts_camel_and_snake_case() {
        let camel: ConsoleTokenResponse = serde_json::from_str(
            r#"{"accessToken":"a","refreshToken":"r","idToken":"i","expiresIn":60,"tokenType":"Bearer"}"#,
        )
        .expect("camelCase");
        let snake: ConsoleTokenResponse = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","id_token":"i","expires_in":60,"token_type":"bearer"}"#,
        )
        .expect("snake_case");
        assert_eq!(TokenResponse::from(camel.clone()), TokenResponse::from(snake));

        assert_eq!(oauth2::TokenResponse::token_type(&camel), &BasicTokenType::Bearer);
        assert_eq!(
            oauth2::TokenResponse::expires_in(&camel),
            Some(std::time::Duration::from_secs(60))
        );

        let minimal: ConsoleTokenResponse =
            serde_json::from_str(r#"{"access_token":"a"}"#).expect("minimal");
        let minimal = TokenResponse::from(minimal);
        assert_eq!(minimal.expires_in, DEFAULT_EXPIRES_IN_SECONDS);
        assert_eq!(minimal.token_type, "Bearer");
        assert!(minimal.refresh_token.is_none());
    }

    #[test]
    fn malformed_endpoint_is_a_configuration_error() {
        let config = IdentityConfig::builder(
            "https://id.example.com/authorize",
            "not a url",
            "https://id.example.com/me",
            "console",
            "https://console.example.com/auth/callback",
        )
        .build();
        let err = HttpIdentityProvider::new(config).expect_err("invalid token endpoint");
        assert_eq!(err.current_context().kind(), "configuration");
    }

    type Forms = Arc<Mutex<Vec<HashMap<String, String>>>>;

    /// Serves `/token` on a local port, answering every request with
    /// `status` and `body` and recording the submitted forms.
    async fn token_endpoint(status: HttpStatus, body: serde_json::Value) -> (String, Forms) {
        let forms = Forms::default();
        let recorded = Arc::clone(&forms);
        let app = Router::new().route(
            "/token",
            post(move |Form(form): Form<HashMap<String, String>>| {
                let recorded = Arc::clone(&recorded);
                let body = body.clone();
                async move {
                    recorded.lock().expect("forms").push(form);
                    (status, Json(body))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        (format!("http://{addr}/token"), forms)
    }

    fn provider_for(token_url: &str) -> HttpIdentityProvider {
        let config = IdentityConfig::builder(
            "https://id.example.com/authorize",
            token_url,
            "https://id.example.com/me",
            "console",
            "https://console.example.com/auth/callback",
        )
        .client_secret("s3cret")
        .add_scope("gpu")
        .build();
        HttpIdentityProvider::new(config).expect("provider")
    }

    #[tokio::test]
    async fn password_grant_posts_credentials_and_reads_camel_case_tokens() {
        let (url, forms) = token_endpoint(
            HttpStatus::OK,
            serde_json::json!({
                "accessToken": "access-1",
                "refreshToken": "refresh-1",
                "expiresIn": 900,
                "tokenType": "Bearer"
            }),
        )
        .await;
        let provider = provider_for(&url);

        let tokens = provider
            .exchange_credentials("alice", "hunter2")
            .await
            .expect("tokens");
        assert_eq!(tokens.access_token, "access-1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(tokens.expires_in, 900);

        let forms = forms.lock().expect("forms");
        let form = &forms[0];
        assert_eq!(form["grant_type"], "password");
        assert_eq!(form["username"], "alice");
        assert_eq!(form["password"], "hunter2");
        assert_eq!(form["client_id"], "console");
        assert_eq!(form["client_secret"], "s3cret");
        assert!(form["scope"].split(' ').any(|scope| scope == "gpu"));
    }

    #[tokio::test]
    async fn rejected_refresh_token_reads_as_expired_session() {
        let (url, forms) = token_endpoint(
            HttpStatus::BAD_REQUEST,
            serde_json::json!({ "error": "invalid_grant" }),
        )
        .await;
        let provider = provider_for(&url);

        let err = provider.refresh("refresh-1").await.expect_err("rejected");
        assert_eq!(err.current_context(), &AuthError::SessionExpired);

        let forms = forms.lock().expect("forms");
        assert_eq!(forms[0]["grant_type"], "refresh_token");
        assert_eq!(forms[0]["refresh_token"], "refresh-1");
    }

    #[tokio::test]
    async fn code_exchange_sends_pkce_verifier_and_redirect_uri() {
        let (url, forms) = token_endpoint(
            HttpStatus::OK,
            serde_json::json!({ "access_token": "access-1", "token_type": "bearer" }),
        )
        .await;
        let provider = provider_for(&url);

        provider
            .exchange_code("code-1", "verifier-1")
            .await
            .expect("tokens");

        let forms = forms.lock().expect("forms");
        assert_eq!(forms[0]["grant_type"], "authorization_code");
        assert_eq!(forms[0]["code"], "code-1");
        assert_eq!(forms[0]["code_verifier"], "verifier-1");
        assert_eq!(
            forms[0]["redirect_uri"],
            "https://console.example.com/auth/callback"
        );
    }

    #[tokio::test]
    async fn revocation_is_skipped_without_endpoint() {
        let provider = provider_for("http://127.0.0.1:9/token");
        let tokens = AuthTokens::from_response(
            TokenResponse {
                access_token: "a".to_string(),
                refresh_token: Some("r".to_string()),
                id_token: None,
                expires_in: 60,
                token_type: "Bearer".to_string(),
            },
            chrono::Utc::now(),
        );
        provider.revoke(&tokens).await.expect("nothing to revoke");
    }

    #[test]
    fn profile_payload_maps_to_user() {
        let json = r#"{
            "user": {
                "id": "u-9",
                "username": "carol",
                "displayName": "Carol",
                "email": "carol@example.com",
                "organization": {"id": "org-1", "name": "Research", "department": "Vision"}
            },
            "roles": ["developer", "Operator", "auditor"]
        }"#;
        let user = serde_json::from_str::<ProfileResponse>(json)
            .expect("deserialize")
            .into_user();

        assert_eq!(user.id().as_str(), "u-9");
        assert_eq!(user.display_name(), "Carol");
        assert_eq!(user.roles().roles(), &[Role::Developer, Role::Operator]);
        assert_eq!(user.organization().map(|o| o.name.as_str()), Some("Research"));
    }
}
