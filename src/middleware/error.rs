use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use serde_json::json;

/// Errors raised by the auth routes and the [`AuthContext`](super::AuthContext) extractor.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// OAuth2 flow error (state mismatch, token exchange failure, etc.)
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// The request's host cannot be trusted and no `AUTH_URL` is configured.
    #[error("Untrusted host: set AUTH_URL or AUTH_TRUST_HOST")]
    UntrustedHost,

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::OAuth(ref msg) => {
                let encoded = urlencoding::encode(msg);
                Redirect::to(&format!("/login?error={encoded}")).into_response()
            }
            Self::UntrustedHost | Self::Config(_) => {
                tracing::error!(error = %self, "Auth internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

impl From<crate::error::Error> for AuthError {
    fn from(e: crate::error::Error) -> Self {
        match e {
            crate::error::Error::MissingSecret(_) | crate::error::Error::Config(_) => {
                Self::Config(e.to_string())
            }
            other => Self::OAuth(other.to_string()),
        }
    }
}

/// Rejection from [`require_authenticated_action`](super::require_authenticated_action).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AuthFailure {
    pub status: StatusCode,
    pub message: &'static str,
}

impl AuthFailure {
    pub(super) fn unauthorized(message: &'static str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message,
        }
    }
}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
