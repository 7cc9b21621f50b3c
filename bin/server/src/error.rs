//! HTTP mapping of session errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gpu_console_session::AuthError;
use rootcause::prelude::Report;
use serde_json::json;

/// A session error on its way to the client.
///
/// Responds with `{"error": <kind>, "message": <text>}`. Details of server-side
/// failures are logged, not sent.
#[derive(Debug)]
pub struct ApiError(pub Report<AuthError>);

impl From<Report<AuthError>> for ApiError {
    fn from(report: Report<AuthError>) -> Self {
        Self(report)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err.into())
    }
}

impl ApiError {
    /// Returns the underlying error.
    #[must_use]
    pub fn error(&self) -> &AuthError {
        self.0.current_context()
    }

    /// Returns the HTTP status the error is reported with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self.error() {
            AuthError::MissingCode | AuthError::StateMismatch => StatusCode::BAD_REQUEST,
            AuthError::ProviderError { .. }
            | AuthError::InvalidCredentials
            | AuthError::SessionExpired => StatusCode::UNAUTHORIZED,
            AuthError::NetworkFailure { .. } => StatusCode::BAD_GATEWAY,
            AuthError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AuthError::Storage { .. } | AuthError::Configuration { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.error();
        let message = if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
            match error {
                AuthError::NetworkFailure { .. } => "identity provider unreachable".to_string(),
                AuthError::Timeout { .. } => "identity provider timed out".to_string(),
                _ => "internal server error".to_string(),
            }
        } else {
            error.to_string()
        };

        (
            status,
            Json(json!({ "error": error.kind(), "message": message })),
        )
            .into_response()
    }
}
