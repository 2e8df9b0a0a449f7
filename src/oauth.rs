use reqwest::header::{ACCEPT, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use url::Url;

use crate::error::Error;
use crate::pkce::{PkcePair, generate_state};
use crate::refresh::{SanitizedRefreshError, sanitize_refresh_error};
use crate::types::GitHubProfile;

const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const CLIENT_USER_AGENT: &str = concat!("registry-auth/", env!("CARGO_PKG_VERSION"));

/// OAuth app credentials (`AUTH_GITHUB_ID` / `AUTH_GITHUB_SECRET`).
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

impl ClientCredentials {
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
        }
    }
}

/// GitHub OAuth endpoint configuration.
///
/// Defaults point at github.com; the `with_*` overrides exist for GitHub
/// Enterprise and for tests.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OAuthConfig {
    pub(crate) auth_url: Url,
    pub(crate) token_url: Url,
    pub(crate) userinfo_url: Url,
    pub(crate) scopes: Vec<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self::github()
    }
}

impl OAuthConfig {
    #[must_use]
    pub fn github() -> Self {
        Self {
            auth_url: GITHUB_AUTHORIZE_URL.parse().expect("valid default URL"),
            token_url: GITHUB_TOKEN_URL.parse().expect("valid default URL"),
            userinfo_url: GITHUB_USER_URL.parse().expect("valid default URL"),
            scopes: vec!["read:user".into(), "user:email".into()],
        }
    }

    #[must_use]
    pub fn with_auth_url(mut self, url: Url) -> Self {
        self.auth_url = url;
        self
    }

    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    #[must_use]
    pub fn with_userinfo_url(mut self, url: Url) -> Self {
        self.userinfo_url = url;
        self
    }

    /// Override the OAuth2 scopes (default: `["read:user", "user:email"]`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    #[must_use]
    pub fn userinfo_url(&self) -> &Url {
        &self.userinfo_url
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

/// Authorization redirect plus the values that must survive until the callback.
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: String,
}

/// Successful token endpoint response.
#[derive(Clone, Deserialize)]
#[non_exhaustive]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Seconds until `access_token` expires. Absent for non-expiring tokens.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: Some("bearer".into()),
            scope: None,
            expires_in: None,
            refresh_token: None,
        }
    }
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Result of a refresh grant that reached the provider.
#[derive(Debug)]
pub enum RefreshOutcome {
    Refreshed(TokenResponse),
    /// The provider answered but refused; only the sanitized error is kept.
    Rejected {
        status: u16,
        error: SanitizedRefreshError,
    },
}

/// GitHub OAuth client.
#[derive(Clone)]
pub struct AuthClient {
    config: OAuthConfig,
    http: reqwest::Client,
}

impl AuthClient {
    #[must_use]
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (connection pool reuse, proxies, tests).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the GitHub authorization redirect with fresh `state` and PKCE values.
    #[must_use]
    pub fn authorization_url(&self, client_id: &str, redirect_uri: &Url) -> AuthorizationRequest {
        let state = generate_state();
        let pkce = PkcePair::generate();
        let scope = self.config.scopes.join(" ");

        let mut url = self.config.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("scope", &scope);

        AuthorizationRequest {
            url: url.into(),
            state,
            code_verifier: pkce.verifier,
        }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or [`Error::OAuth`] if the
    /// provider refuses the code (the detail carries only the sanitized error).
    pub async fn exchange_code(
        &self,
        credentials: &ClientCredentials,
        code: &str,
        code_verifier: &str,
        redirect_uri: &Url,
    ) -> Result<TokenResponse, Error> {
        let params = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose_secret()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ];

        match self.post_token_form(&params).await? {
            RefreshOutcome::Refreshed(tokens) => Ok(tokens),
            RefreshOutcome::Rejected { status, error } => Err(Error::OAuth {
                operation: "token exchange",
                status: Some(status),
                detail: error.to_string(),
            }),
        }
    }

    /// Run the `refresh_token` grant.
    ///
    /// A provider refusal is returned as [`RefreshOutcome::Rejected`], not as
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure or an unreadable body.
    pub async fn refresh_access_token(
        &self,
        credentials: &ClientCredentials,
        refresh_token: &str,
    ) -> Result<RefreshOutcome, Error> {
        let params = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose_secret()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.post_token_form(&params).await
    }

    /// Fetch the signed-in user's GitHub profile.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or [`Error::OAuth`] on a
    /// non-2xx response.
    pub async fn get_user(&self, access_token: &str) -> Result<GitHubProfile, Error> {
        let response = self
            .http
            .get(self.config.userinfo_url.clone())
            .bearer_auth(access_token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::OAuth {
                operation: "user lookup",
                status: Some(status.as_u16()),
                detail: status.canonical_reason().unwrap_or("request failed").into(),
            });
        }
        response.json::<GitHubProfile>().await.map_err(Into::into)
    }

    /// POST a form to the token endpoint and classify the answer.
    ///
    /// GitHub reports grant failures as `200` with an `error` body, so the
    /// body is inspected regardless of status.
    async fn post_token_form(&self, params: &[(&str, &str)]) -> Result<RefreshOutcome, Error> {
        let response = self
            .http
            .post(self.config.token_url.clone())
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .form(params)
            .send()
            .await?;

        let status = response.status();
        let body: JsonValue = if status.is_success() {
            response.json().await?
        } else {
            // Error bodies are not guaranteed to be JSON.
            response.json().await.unwrap_or(JsonValue::Null)
        };

        if !status.is_success() || body.get("error").is_some() {
            return Ok(RefreshOutcome::Rejected {
                status: status.as_u16(),
                error: sanitize_refresh_error(&body),
            });
        }

        serde_json::from_value::<TokenResponse>(body)
            .map(RefreshOutcome::Refreshed)
            .map_err(|e| Error::OAuth {
                operation: "token endpoint",
                status: Some(status.as_u16()),
                detail: format!("malformed token response: {e}"),
            })
    }
}
