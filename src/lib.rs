#![doc = include_str!("../README.md")]

pub mod callbacks;
pub mod config;
pub mod error;
pub mod jwt;
#[cfg(feature = "middleware")]
pub mod middleware;
pub mod oauth;
pub mod pkce;
pub mod refresh;
pub mod resolver;
pub mod session;
pub mod types;

// Re-exports for convenient access
pub use callbacks::{AuthOptions, resolve_redirect_url, resolve_trust_host};
pub use config::AuthEnv;
pub use error::Error;
pub use oauth::{AuthClient, ClientCredentials, OAuthConfig, RefreshOutcome, TokenResponse};
pub use refresh::{
    JwtCallbackParams, REFRESH_SKEW_SECONDS, RefreshContext, SanitizedRefreshError,
    auth_jwt_callback, sanitize_refresh_error,
};
pub use resolver::{
    CarriesAccessToken, RequestCookies, SECURE_SESSION_COOKIE, SESSION_COOKIE, get_server_token,
    resolve_access_token,
};
pub use session::{
    Session, SessionUser, SessionValidation, auth_session_callback, validate_session,
};
pub use types::{Account, GitHubProfile, Login, TokenError, TokenRecord, UserId};

/// Current Unix time in seconds.
pub(crate) fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
