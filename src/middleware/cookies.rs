use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

use crate::resolver::{self, MAX_CHUNK_INDEX, RequestCookies, SESSION_COOKIE_NAMES};

/// Largest session cookie value written as a single cookie. Auth.js uses
/// the same limit so both stacks agree on when to chunk.
pub(super) const CHUNK_SIZE: usize = 4096 - 163;

const PKCE_COOKIE_NAME: &str = "authjs.pkce.code_verifier";
const STATE_COOKIE_NAME: &str = "authjs.state";
const CALLBACK_COOKIE_NAME: &str = "authjs.callback-url";

const HANDSHAKE_TTL: Duration = Duration::minutes(15);

fn prefixed(name: &str, secure: bool) -> String {
    if secure {
        format!("__Secure-{name}")
    } else {
        name.to_string()
    }
}

/// Session cookie name for an origin.
pub(super) fn session_cookie_name(secure: bool) -> &'static str {
    if secure {
        resolver::SECURE_SESSION_COOKIE
    } else {
        resolver::SESSION_COOKIE
    }
}

fn handshake_cookie(name: String, value: String, secure: bool, auth_path: &str) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path(auth_path.to_string())
        .max_age(HANDSHAKE_TTL)
        .build()
}

/// PKCE verifier, `state` and landing URL cookies for the authorization request.
pub(super) fn handshake_cookies(
    code_verifier: &str,
    state: &str,
    callback_url: &str,
    secure: bool,
    auth_path: &str,
) -> [Cookie<'static>; 3] {
    [
        handshake_cookie(
            prefixed(PKCE_COOKIE_NAME, secure),
            code_verifier.to_string(),
            secure,
            auth_path,
        ),
        handshake_cookie(
            prefixed(STATE_COOKIE_NAME, secure),
            state.to_string(),
            secure,
            auth_path,
        ),
        handshake_cookie(
            prefixed(CALLBACK_COOKIE_NAME, secure),
            callback_url.to_string(),
            secure,
            auth_path,
        ),
    ]
}

/// Removal cookies for the handshake values.
pub(super) fn clear_handshake_cookies(secure: bool, auth_path: &str) -> [Cookie<'static>; 3] {
    [PKCE_COOKIE_NAME, STATE_COOKIE_NAME, CALLBACK_COOKIE_NAME].map(|name| {
        Cookie::build((prefixed(name, secure), ""))
            .path(auth_path.to_string())
            .max_age(Duration::ZERO)
            .build()
    })
}

/// Values stored by [`handshake_cookies`], read back in the callback.
pub(super) struct Handshake {
    pub(super) code_verifier: Option<String>,
    pub(super) state: Option<String>,
    pub(super) callback_url: Option<String>,
}

pub(super) fn get_handshake(jar: &axum_extra::extract::PrivateCookieJar, secure: bool) -> Handshake {
    let get = |name: &str| {
        jar.get(&prefixed(name, secure))
            .map(|c| c.value().to_string())
    };
    Handshake {
        code_verifier: get(PKCE_COOKIE_NAME),
        state: get(STATE_COOKIE_NAME),
        callback_url: get(CALLBACK_COOKIE_NAME),
    }
}

fn session_cookie(name: String, value: String, max_age: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(Duration::seconds(max_age))
        .build()
}

fn removal(name: String) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/".to_string())
        .max_age(Duration::ZERO)
        .build()
}

/// Cookies that store `value` under `name`, chunked when it is too large,
/// plus removals for any stale pieces the request still carries.
pub(super) fn session_cookies(
    name: &str,
    value: &str,
    max_age: i64,
    secure: bool,
    previous: &RequestCookies,
) -> Vec<Cookie<'static>> {
    let mut cookies = Vec::new();
    let written_chunks = if value.len() <= CHUNK_SIZE {
        cookies.push(session_cookie(name.to_string(), value.to_string(), max_age, secure));
        0
    } else {
        // JWE compact serialization is ASCII, so byte chunks are char-aligned.
        let chunks: Vec<&str> = value
            .as_bytes()
            .chunks(CHUNK_SIZE)
            .map(|c| std::str::from_utf8(c).unwrap_or_default())
            .collect();
        for (i, chunk) in chunks.iter().enumerate() {
            cookies.push(session_cookie(
                format!("{name}.{i}"),
                (*chunk).to_string(),
                max_age,
                secure,
            ));
        }
        if previous.get(name).is_some() {
            cookies.push(removal(name.to_string()));
        }
        chunks.len()
    };

    for (cookie_name, _) in previous.iter() {
        if let Some(idx) = resolver::chunk_index(cookie_name, name)
            && idx >= written_chunks
            && idx <= MAX_CHUNK_INDEX
        {
            cookies.push(removal(cookie_name.to_string()));
        }
    }
    cookies
}

/// Removals for every session cookie and chunk present in the request.
pub(super) fn clear_session_cookies(previous: &RequestCookies) -> Vec<Cookie<'static>> {
    previous
        .iter()
        .filter(|(cookie_name, _)| {
            SESSION_COOKIE_NAMES.iter().any(|name| {
                cookie_name == name || resolver::chunk_index(cookie_name, name).is_some()
            })
        })
        .map(|(cookie_name, _)| removal(cookie_name.to_string()))
        .collect()
}
