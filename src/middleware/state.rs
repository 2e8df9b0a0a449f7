use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use super::config::AuthSettings;
use crate::callbacks::AuthOptions;

/// Shared state for auth route handlers.
#[derive(Clone)]
pub(super) struct AuthState {
    pub(super) options: AuthOptions,
    pub(super) settings: AuthSettings,
}

// PrivateCookieJar requires Key to be extractable from state
impl FromRef<AuthState> for Key {
    fn from_ref(state: &AuthState) -> Self {
        state.settings.cookie_key.clone()
    }
}

// Lets the AuthContext extractor run inside the auth router.
impl FromRef<AuthState> for AuthOptions {
    fn from_ref(state: &AuthState) -> Self {
        state.options.clone()
    }
}
