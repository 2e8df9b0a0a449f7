use axum_extra::extract::cookie::Key;

use super::error::AuthError;
use crate::callbacks::AuthOptions;
use crate::config::AuthEnv;

/// Route-level settings, shared by the config builder and the runtime state.
#[derive(Clone)]
pub(crate) struct AuthSettings {
    pub(crate) cookie_key: Key,
    pub(crate) auth_path: String,
    pub(crate) login_redirect: String,
    pub(crate) logout_redirect: String,
    pub(crate) error_redirect: String,
}

impl AuthSettings {
    fn defaults() -> Self {
        Self {
            cookie_key: Key::generate(),
            auth_path: "/auth".into(),
            login_redirect: "/".into(),
            logout_redirect: "/".into(),
            error_redirect: "/login".into(),
        }
    }
}

/// Configuration for [`auth_routes`](super::auth_routes).
///
/// The handshake cookies (PKCE verifier, `state`, landing URL) are private
/// cookies under `cookie_key`. Without `COOKIE_KEY` a random key is used,
/// which only works while a single process serves both legs of a sign-in.
pub struct AuthRoutesConfig {
    pub(super) options: AuthOptions,
    pub(super) settings: AuthSettings,
}

impl AuthRoutesConfig {
    #[must_use]
    pub fn new(options: AuthOptions) -> Self {
        Self {
            options,
            settings: AuthSettings::defaults(),
        }
    }

    /// Build from the process environment.
    ///
    /// Reads everything [`AuthEnv::from_env`] reads, plus `COOKIE_KEY`
    /// (at least 64 bytes) for the handshake cookies.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if `AUTH_URL` or `COOKIE_KEY` is invalid.
    pub fn from_env() -> Result<Self, AuthError> {
        let options = AuthOptions::from_env(AuthEnv::from_env(), reqwest::Client::new())?;

        let cookie_key = match std::env::var("COOKIE_KEY") {
            Ok(k) => Key::try_from(k.as_bytes()).map_err(|_| {
                AuthError::Config(
                    "COOKIE_KEY is set but invalid (must be at least 64 bytes). \
                     Remove the env var to use an ephemeral key, or provide a valid key."
                        .into(),
                )
            })?,
            Err(_) => Key::generate(),
        };

        Ok(Self::new(options).with_cookie_key(cookie_key))
    }

    #[must_use]
    pub fn options(&self) -> &AuthOptions {
        &self.options
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.settings.cookie_key = key;
        self
    }

    /// Mount point of the auth routes (default `/auth`).
    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.settings.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_login_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.login_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_logout_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.logout_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_error_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.error_redirect = path.into();
        self
    }
}

impl From<AuthOptions> for AuthRoutesConfig {
    fn from(options: AuthOptions) -> Self {
        Self::new(options)
    }
}
