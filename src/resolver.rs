use std::collections::BTreeMap;

use cookie::Cookie;
use secrecy::SecretString;

use crate::config::AuthEnv;
use crate::error::Error;
use crate::types::TokenRecord;

/// Session cookie on plain-HTTP origins.
pub const SESSION_COOKIE: &str = "authjs.session-token";
/// Session cookie on HTTPS origins.
pub const SECURE_SESSION_COOKIE: &str = "__Secure-authjs.session-token";

/// Lookup order for the session cookie.
pub const SESSION_COOKIE_NAMES: [&str; 2] = [SESSION_COOKIE, SECURE_SESSION_COOKIE];

// Bound chunk indices so a crafted header cannot force a huge reassembly.
pub(crate) const MAX_CHUNK_INDEX: usize = 63;

/// Cookies sent with one request, in the order the client sent them.
#[derive(Debug, Clone, Default)]
pub struct RequestCookies {
    pairs: Vec<(String, String)>,
}

impl RequestCookies {
    /// Parse a `Cookie` request header. Malformed pairs are skipped.
    #[must_use]
    pub fn from_header(header: &str) -> Self {
        Cookie::split_parse(header)
            .filter_map(|cookie| match cookie {
                Ok(c) => Some((c.name().to_owned(), c.value().to_owned())),
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring malformed cookie");
                    None
                }
            })
            .collect()
    }

    /// First non-empty value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, v)| n == name && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestCookies {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(feature = "middleware")]
impl From<&axum_extra::extract::CookieJar> for RequestCookies {
    fn from(jar: &axum_extra::extract::CookieJar) -> Self {
        jar.iter()
            .map(|c| (c.name().to_owned(), c.value().to_owned()))
            .collect()
    }
}

/// Why a set of chunk cookies was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk {0} appears more than once")]
    Duplicate(usize),
    #[error("chunk {0} is missing")]
    Gap(usize),
    #[error("chunk index {0} exceeds the supported maximum")]
    OutOfRange(usize),
}

/// Numbered chunk cookies (`<name>.0`, `<name>.1`, …) of one logical value.
///
/// Indices are contiguous from zero by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieChunks(BTreeMap<usize, String>);

impl CookieChunks {
    /// Collect the chunks of `name`. `Ok(None)` when there are none.
    ///
    /// # Errors
    ///
    /// Returns a [`ChunkError`] for duplicate, out-of-range or non-contiguous
    /// indices.
    pub fn collect(cookies: &RequestCookies, name: &str) -> Result<Option<Self>, ChunkError> {
        let mut chunks = BTreeMap::new();
        for (cookie_name, value) in cookies.iter() {
            let Some(idx) = chunk_index(cookie_name, name) else {
                continue;
            };
            if idx > MAX_CHUNK_INDEX {
                return Err(ChunkError::OutOfRange(idx));
            }
            if chunks.insert(idx, value.to_owned()).is_some() {
                return Err(ChunkError::Duplicate(idx));
            }
        }

        if chunks.is_empty() {
            return Ok(None);
        }
        if let Some(gap) = (0..chunks.len()).find(|i| !chunks.contains_key(i)) {
            return Err(ChunkError::Gap(gap));
        }
        Ok(Some(Self(chunks)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Concatenate in ascending index order.
    #[must_use]
    pub fn join(self) -> String {
        self.0.into_values().collect()
    }
}

/// `"<name>.<n>"` → `Some(n)`.
pub(crate) fn chunk_index(cookie_name: &str, name: &str) -> Option<usize> {
    let suffix = cookie_name.strip_prefix(name)?.strip_prefix('.')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Encoded session token found in the request, with the cookie name it came
/// from (the name doubles as the decryption salt).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSessionToken {
    pub cookie_name: &'static str,
    pub value: String,
}

/// Locate the encoded session token: a whole cookie first, then chunks.
#[must_use]
pub fn session_token_from_cookies(cookies: &RequestCookies) -> Option<RawSessionToken> {
    for name in SESSION_COOKIE_NAMES {
        if let Some(value) = cookies.get(name) {
            return Some(RawSessionToken {
                cookie_name: name,
                value: value.to_owned(),
            });
        }
    }

    for name in SESSION_COOKIE_NAMES {
        match CookieChunks::collect(cookies, name) {
            Ok(Some(chunks)) => {
                return Some(RawSessionToken {
                    cookie_name: name,
                    value: chunks.join(),
                });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(cookie = name, error = %e, "discarding chunked session cookie");
            }
        }
    }
    None
}

/// Pick the decryption secret: explicit override, else the configured one.
///
/// # Errors
///
/// Returns [`Error::MissingSecret`] only in production. Elsewhere a missing
/// secret yields `Ok(None)`.
pub(crate) fn resolve_secret(
    env: &AuthEnv,
    secret_override: Option<&SecretString>,
) -> Result<Option<SecretString>, Error> {
    if let Some(secret) = secret_override.or(env.secret.as_ref()) {
        return Ok(Some(secret.clone()));
    }
    if env.is_production() {
        tracing::error!("AUTH_SECRET is not configured; sessions cannot be decoded");
        return Err(Error::MissingSecret(crate::config::vars::AUTH_SECRET));
    }
    Ok(None)
}

/// Decode the whole token record carried by the request's session cookie.
///
/// Absent, undecodable or unreadable-without-secret tokens all yield
/// `Ok(None)`.
///
/// # Errors
///
/// Returns [`Error::MissingSecret`] when a token is present, no secret is
/// configured and the process runs in production.
pub fn decode_session_token(
    cookies: &RequestCookies,
    env: &AuthEnv,
    secret_override: Option<&SecretString>,
) -> Result<Option<(RawSessionToken, TokenRecord)>, Error> {
    let Some(raw) = session_token_from_cookies(cookies) else {
        return Ok(None);
    };
    let Some(secret) = resolve_secret(env, secret_override)? else {
        return Ok(None);
    };

    match crate::jwt::decode(&raw.value, &secret, raw.cookie_name) {
        Ok(record) => Ok(Some((raw, record))),
        Err(e) => {
            tracing::debug!(cookie = raw.cookie_name, error = %e, "session token rejected");
            Ok(None)
        }
    }
}

/// Resolve the upstream access token from the request's session cookie.
///
/// # Errors
///
/// See [`decode_session_token`].
pub async fn get_server_token(
    cookies: &RequestCookies,
    env: &AuthEnv,
    secret_override: Option<&SecretString>,
) -> Result<Option<SecretString>, Error> {
    Ok(decode_session_token(cookies, env, secret_override)?
        .and_then(|(_, record)| record.access_token)
        .map(SecretString::from))
}

/// Anything that may already hold a resolved access token for this request.
pub trait CarriesAccessToken {
    fn access_token(&self) -> Option<&str>;
}

impl CarriesAccessToken for TokenRecord {
    fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }
}

/// Like [`get_server_token`], but a session that already carries an access
/// token wins and the cookies are not read.
///
/// # Errors
///
/// See [`decode_session_token`].
pub async fn resolve_access_token(
    cookies: &RequestCookies,
    session: Option<&dyn CarriesAccessToken>,
    env: &AuthEnv,
    secret_override: Option<&SecretString>,
) -> Result<Option<SecretString>, Error> {
    if let Some(token) = session.and_then(|s| s.access_token()) {
        return Ok(Some(SecretString::from(token.to_owned())));
    }
    get_server_token(cookies, env, secret_override).await
}
