use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// GitHub username (`login`), captured once at sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct Login(pub String);

impl Login {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Login {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Stable provider account identifier (GitHub numeric user id, as a string).
///
/// Exposed to the browser as `session.user.id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Terminal marker on a [`TokenRecord`]: the credential chain is broken and
/// the user must sign in again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[non_exhaustive]
pub enum TokenError {
    RefreshTokenError,
}

/// Authentication state sealed into the session cookie.
///
/// Field names follow the Auth.js JWT payload so cookies stay readable by
/// both sides during a migration.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<Login>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TokenError>,
}

impl TokenRecord {
    /// Mark the record as needing re-authentication.
    ///
    /// The access token is dropped; the refresh token is kept.
    #[must_use]
    pub fn with_refresh_error(mut self) -> Self {
        self.access_token = None;
        self.error = Some(TokenError::RefreshTokenError);
        self
    }

    #[must_use]
    pub fn has_refresh_error(&self) -> bool {
        self.error == Some(TokenError::RefreshTokenError)
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn redact(v: &Option<String>) -> Option<&'static str> {
            v.as_ref().map(|_| "[REDACTED]")
        }
        f.debug_struct("TokenRecord")
            .field("sub", &self.sub)
            .field("login", &self.login)
            .field("access_token", &redact(&self.access_token))
            .field("expires_at", &self.expires_at)
            .field("refresh_token", &redact(&self.refresh_token))
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Provider account payload handed to the JWT callback on initial sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Account {
    pub provider: String,
    pub provider_account_id: String,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl Account {
    /// Create a GitHub account payload with only the required fields.
    #[must_use]
    pub fn github(provider_account_id: impl Into<String>) -> Self {
        Self {
            provider: "github".into(),
            provider_account_id: provider_account_id.into(),
            access_token: None,
            expires_at: None,
            refresh_token: None,
            scope: None,
        }
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>, expires_at: Option<i64>) -> Self {
        self.access_token = Some(token.into());
        self.expires_at = expires_at;
        self
    }

    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }
}

/// GitHub `/user` response, decoded once at the API boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct GitHubProfile {
    pub id: u64,
    pub login: Login,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl GitHubProfile {
    #[must_use]
    pub fn new(id: u64, login: impl Into<Login>) -> Self {
        Self {
            id,
            login: login.into(),
            name: None,
            email: None,
            avatar_url: None,
        }
    }
}
