use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::Cookie;
use secrecy::{ExposeSecret, SecretString};

use super::cookies;
use super::error::{AuthError, AuthFailure};
use super::layer::PendingSessionCookies;
use crate::callbacks::AuthOptions;
use crate::jwt;
use crate::refresh::JwtCallbackParams;
use crate::resolver::{self, CarriesAccessToken, RequestCookies, SECURE_SESSION_COOKIE};
use crate::session::{Session, validate_session};
use crate::types::TokenRecord;

/// Per-request auth state: the browser session plus the token record
/// behind it.
///
/// Extraction decodes the session cookie and runs the `jwt` callback, so an
/// access token close to expiry is refreshed before the handler sees it.
/// Under the [`persist_session`](super::persist_session) layer a changed
/// record is written back on the response automatically. Without the layer,
/// pass the response's [`CookieJar`] through [`AuthContext::persist`].
///
/// # Example
///
/// ```rust,ignore
/// async fn profile(auth: AuthContext) -> String {
///     let name = auth.session.as_ref().and_then(|s| s.user.as_ref()).and_then(|u| u.name.clone());
///     format!("Hello, {}", name.unwrap_or_else(|| "guest".into()))
/// }
///
/// let app = Router::new()
///     .route("/me", get(profile))
///     .layer(axum::middleware::from_fn(persist_session))
///     .with_state(options);
/// ```
pub struct AuthContext {
    pub session: Option<Session>,
    token: Option<TokenRecord>,
    cookie_name: Option<&'static str>,
    changed: bool,
    handed_off: bool,
    cookies: RequestCookies,
    options: AuthOptions,
}

impl AuthContext {
    pub(super) async fn resolve(
        options: AuthOptions,
        cookies: RequestCookies,
    ) -> Result<Self, crate::Error> {
        let Some((raw, record)) = resolver::decode_session_token(&cookies, options.env(), None)?
        else {
            return Ok(Self {
                session: None,
                token: None,
                cookie_name: None,
                changed: false,
                handed_off: false,
                cookies,
                options,
            });
        };

        let token = options.jwt(JwtCallbackParams::new(record.clone())).await;
        let changed = token != record;
        let session = options.session(&token);

        Ok(Self {
            session: Some(session),
            token: Some(token),
            cookie_name: Some(raw.cookie_name),
            changed,
            handed_off: false,
            cookies,
            options,
        })
    }

    /// Whether the `jwt` callback changed the record (refresh or refresh failure).
    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// The token record, if the request carried a readable session.
    #[must_use]
    pub fn token(&self) -> Option<&TokenRecord> {
        self.token.as_ref()
    }

    /// Re-seal the session cookie into `jar` when the record changed.
    ///
    /// A no-op when the [`persist_session`](super::persist_session) layer
    /// already holds the cookie for this request.
    #[must_use]
    pub fn persist(&self, jar: CookieJar) -> CookieJar {
        if self.handed_off {
            return jar;
        }
        self.resealed_cookies().into_iter().fold(jar, CookieJar::add)
    }

    fn resealed_cookies(&self) -> Vec<Cookie<'static>> {
        let (true, Some(name), Some(token)) = (self.changed, self.cookie_name, &self.token) else {
            return Vec::new();
        };
        let Ok(Some(secret)) = resolver::resolve_secret(self.options.env(), None) else {
            return Vec::new();
        };

        let max_age = self.options.max_age();
        match jwt::encode(token, &secret, name, max_age) {
            Ok(value) => cookies::session_cookies(
                name,
                &value,
                max_age,
                name == SECURE_SESSION_COOKIE,
                &self.cookies,
            ),
            Err(e) => {
                tracing::error!(error = %e, "failed to re-seal session cookie");
                Vec::new()
            }
        }
    }
}

impl CarriesAccessToken for AuthContext {
    fn access_token(&self) -> Option<&str> {
        self.token.as_ref().and_then(|t| t.access_token.as_deref())
    }
}

impl<S> FromRequestParts<S> for AuthContext
where
    AuthOptions: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let options = AuthOptions::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        let mut ctx = Self::resolve(options, RequestCookies::from(&jar))
            .await
            .map_err(AuthError::from)?;

        if ctx.changed
            && let Some(pending) = parts.extensions.get::<PendingSessionCookies>()
        {
            pending.set(ctx.resealed_cookies());
            ctx.handed_off = true;
        }
        Ok(ctx)
    }
}

/// Session and access token of a request allowed to mutate on the user's behalf.
#[derive(Debug)]
pub struct AuthenticatedAction {
    pub session: Session,
    pub access_token: SecretString,
}

impl CarriesAccessToken for AuthenticatedAction {
    fn access_token(&self) -> Option<&str> {
        Some(self.access_token.expose_secret())
    }
}

/// Gate a mutating handler on a usable session.
///
/// # Errors
///
/// Returns a 401 [`AuthFailure`] when there is no session, no access token,
/// or the last refresh failed.
pub fn require_authenticated_action(ctx: AuthContext) -> Result<AuthenticatedAction, AuthFailure> {
    let access_token = ctx.token.and_then(|t| t.access_token);
    let validation = validate_session(ctx.session.as_ref(), access_token.is_some());

    if validation.has_refresh_error {
        return Err(AuthFailure::unauthorized(
            "Session expired, please sign in again",
        ));
    }
    match (ctx.session, access_token) {
        (Some(session), Some(token)) if validation.is_valid => Ok(AuthenticatedAction {
            session,
            access_token: SecretString::from(token),
        }),
        _ => Err(AuthFailure::unauthorized("Authentication required")),
    }
}

/// `true` when `result` is the failure shape of [`require_authenticated_action`].
pub fn is_auth_failure<T>(result: &Result<T, AuthFailure>) -> bool {
    result.is_err()
}
