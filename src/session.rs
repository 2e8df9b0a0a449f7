use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::types::{Login, TokenError, TokenRecord, UserId};

/// Browser-visible session, rebuilt from the token record on every request.
///
/// Never carries the access or refresh token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionUser>,
    /// RFC 3339 timestamp at which the session cookie lapses.
    pub expires: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TokenError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<Login>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Session {
    #[must_use]
    pub fn has_refresh_error(&self) -> bool {
        self.error == Some(TokenError::RefreshTokenError)
    }
}

/// Outcome of [`validate_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionValidation {
    pub is_valid: bool,
    pub has_token: bool,
    pub has_refresh_error: bool,
    pub should_reauth: bool,
}

/// Classify a request's auth state.
///
/// `has_token` says whether a usable access token was resolved independently
/// of the session. A missing session always means "re-authenticate",
/// whatever `has_token` says.
#[must_use]
pub fn validate_session(session: Option<&Session>, has_token: bool) -> SessionValidation {
    let Some(session) = session else {
        return SessionValidation {
            is_valid: false,
            has_token: false,
            has_refresh_error: false,
            should_reauth: true,
        };
    };

    let has_refresh_error = session.has_refresh_error();
    SessionValidation {
        is_valid: has_token && !has_refresh_error,
        has_token,
        has_refresh_error,
        should_reauth: has_refresh_error || !has_token,
    }
}

/// The session the identity layer produces before the app callback runs:
/// display fields from the token plus the cookie expiry.
#[must_use]
pub fn default_session(token: &TokenRecord, max_age: i64) -> Session {
    default_session_at(token, max_age, crate::now_unix())
}

pub(crate) fn default_session_at(token: &TokenRecord, max_age: i64, now: i64) -> Session {
    let expires = OffsetDateTime::from_unix_timestamp(now + max_age)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_default();

    let has_identity = token.name.is_some() || token.email.is_some() || token.picture.is_some();
    Session {
        user: has_identity.then(|| SessionUser {
            name: token.name.clone(),
            email: token.email.clone(),
            image: token.picture.clone(),
            ..SessionUser::default()
        }),
        expires,
        error: None,
    }
}

/// Shape the browser-visible session from the token record.
///
/// Copies only `error` and `user.{id, login}`; credentials never cross over.
#[must_use]
pub fn auth_session_callback(mut session: Session, token: &TokenRecord) -> Session {
    session.error = token.error;

    if token.sub.is_some() || token.login.is_some() {
        let user = session.user.get_or_insert_with(SessionUser::default);
        user.id = token.sub.clone();
        user.login = token.login.clone();
    }
    session
}
