use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::config::AuthEnv;
use crate::oauth::{AuthClient, ClientCredentials, RefreshOutcome};
use crate::types::{Account, GitHubProfile, TokenRecord, UserId};

/// Refresh this many seconds before the access token actually expires.
pub const REFRESH_SKEW_SECONDS: i64 = 5 * 60;

/// Inputs to [`auth_jwt_callback`]. `account` and `profile` are present only
/// on the request that completes sign-in.
#[derive(Debug, Clone, Default)]
pub struct JwtCallbackParams {
    pub token: TokenRecord,
    pub account: Option<Account>,
    pub profile: Option<GitHubProfile>,
}

impl JwtCallbackParams {
    #[must_use]
    pub fn new(token: TokenRecord) -> Self {
        Self {
            token,
            account: None,
            profile: None,
        }
    }

    #[must_use]
    pub fn sign_in(account: Account, profile: GitHubProfile) -> Self {
        Self {
            token: TokenRecord::default(),
            account: Some(account),
            profile: Some(profile),
        }
    }
}

/// What a refresh exchange needs: the OAuth client and, if known, the app
/// credentials.
#[derive(Clone)]
pub struct RefreshContext {
    client: AuthClient,
    credentials: Option<ClientCredentials>,
}

impl RefreshContext {
    /// Credentials come from `AUTH_GITHUB_ID` / `AUTH_GITHUB_SECRET` when both
    /// are set.
    #[must_use]
    pub fn new(client: AuthClient, env: &AuthEnv) -> Self {
        let credentials = match (&env.github_id, &env.github_secret) {
            (Some(id), Some(secret)) => Some(ClientCredentials {
                client_id: id.clone(),
                client_secret: secret.clone(),
            }),
            _ => None,
        };
        Self {
            client,
            credentials,
        }
    }

    /// Explicit credentials, taking precedence over the environment.
    #[must_use]
    pub fn with_credentials(mut self, credentials: ClientCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn client(&self) -> &AuthClient {
        &self.client
    }

    #[must_use]
    pub fn credentials(&self) -> Option<&ClientCredentials> {
        self.credentials.as_ref()
    }
}

/// The only shape of a token-endpoint failure that may be logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanitizedRefreshError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl std::fmt::Display for SanitizedRefreshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_description {
            Some(desc) => write!(f, "{}: {desc}", self.error),
            None => f.write_str(&self.error),
        }
    }
}

/// Reduce an arbitrary token-endpoint body to `{error, error_description}`.
///
/// `error` defaults to `"unknown"`. Nothing else from the body survives, so
/// echoed token material never reaches a log sink.
#[must_use]
pub fn sanitize_refresh_error(body: &JsonValue) -> SanitizedRefreshError {
    let field = |key: &str| body.get(key).and_then(JsonValue::as_str).map(str::to_owned);
    SanitizedRefreshError {
        error: field("error").unwrap_or_else(|| "unknown".into()),
        error_description: field("error_description"),
    }
}

/// JWT callback: keep the token record current.
///
/// Branches, in order:
/// 1. sign-in (`account` present): build a fresh record;
/// 2. more than [`REFRESH_SKEW_SECONDS`] before expiry: unchanged;
/// 3. inside the skew window with a refresh token: refresh;
/// 4. inside the skew window without one: errored, no network call;
/// 5. no expiry tracked: unchanged.
///
/// Never fails: every refresh failure becomes
/// [`TokenError::RefreshTokenError`](crate::types::TokenError) on the record.
pub async fn auth_jwt_callback(params: JwtCallbackParams, ctx: &RefreshContext) -> TokenRecord {
    jwt_callback_at(params, ctx, crate::now_unix()).await
}

pub(crate) async fn jwt_callback_at(
    params: JwtCallbackParams,
    ctx: &RefreshContext,
    now: i64,
) -> TokenRecord {
    let JwtCallbackParams {
        token,
        account,
        profile,
    } = params;

    if let Some(account) = account {
        return sign_in_record(token, account, profile);
    }

    let Some(expires_at) = token.expires_at else {
        return token;
    };

    if now < expires_at - REFRESH_SKEW_SECONDS {
        return token;
    }

    if token.refresh_token.is_none() {
        tracing::debug!(login = ?token.login, "access token expired without a refresh token");
        return token.with_refresh_error();
    }

    refresh_access_token(token, ctx, now).await
}

fn sign_in_record(
    previous: TokenRecord,
    account: Account,
    profile: Option<GitHubProfile>,
) -> TokenRecord {
    let (login, name, email, picture) = match profile {
        Some(p) => (Some(p.login), p.name, p.email, p.avatar_url),
        None => (previous.login, previous.name, previous.email, previous.picture),
    };

    TokenRecord {
        sub: Some(UserId::from(account.provider_account_id)),
        name,
        email,
        picture,
        access_token: account.access_token,
        expires_at: account.expires_at,
        refresh_token: account.refresh_token,
        login,
        error: None,
    }
}

async fn refresh_access_token(token: TokenRecord, ctx: &RefreshContext, now: i64) -> TokenRecord {
    let Some(credentials) = ctx.credentials() else {
        tracing::error!(
            "cannot refresh access token: AUTH_GITHUB_ID or AUTH_GITHUB_SECRET is not configured"
        );
        return token.with_refresh_error();
    };
    let Some(refresh_token) = token.refresh_token.as_deref() else {
        return token.with_refresh_error();
    };

    match ctx
        .client()
        .refresh_access_token(credentials, refresh_token)
        .await
    {
        Ok(RefreshOutcome::Refreshed(tokens)) => {
            tracing::debug!(login = ?token.login, "access token refreshed");
            TokenRecord {
                access_token: Some(tokens.access_token),
                expires_at: tokens.expires_in.map(|secs| now + secs),
                refresh_token: tokens.refresh_token.or(token.refresh_token),
                error: None,
                ..token
            }
        }
        Ok(RefreshOutcome::Rejected { status, error }) => {
            tracing::error!(
                status,
                error = %error.error,
                error_description = error.error_description.as_deref().unwrap_or(""),
                "access token refresh rejected"
            );
            token.with_refresh_error()
        }
        Err(e) => {
            tracing::error!(error = %e, "access token refresh failed");
            token.with_refresh_error()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::oauth::OAuthConfig;
    use crate::types::TokenError;

    const NOW: i64 = 1_700_000_000;
    const TOKEN_PATH: &str = "/login/oauth/access_token";

    fn context(server: &MockServer) -> RefreshContext {
        let config = OAuthConfig::github()
            .with_token_url(format!("{}{TOKEN_PATH}", server.uri()).parse().unwrap());
        let env = AuthEnv::default().with_github_credentials("Iv1.client", "client-secret");
        RefreshContext::new(AuthClient::new(config), &env)
    }

    fn expiring(expires_at: i64, refresh_token: Option<&str>) -> TokenRecord {
        TokenRecord {
            access_token: Some("old".into()),
            expires_at: Some(expires_at),
            refresh_token: refresh_token.map(str::to_owned),
            login: Some("octocat".into()),
            ..TokenRecord::default()
        }
    }

    async fn no_calls_expected(server: &MockServer) {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn token_without_expiry_is_unchanged() {
        let server = MockServer::start().await;
        no_calls_expected(&server).await;
        let token = TokenRecord {
            access_token: Some("classic".into()),
            refresh_token: Some("r".into()),
            ..TokenRecord::default()
        };
        let out = jwt_callback_at(JwtCallbackParams::new(token.clone()), &context(&server), NOW).await;
        assert_eq!(out, token);
    }

    #[tokio::test]
    async fn token_outside_skew_window_is_unchanged() {
        let server = MockServer::start().await;
        no_calls_expected(&server).await;
        let token = expiring(NOW + REFRESH_SKEW_SECONDS + 1, Some("r"));
        let out = jwt_callback_at(JwtCallbackParams::new(token.clone()), &context(&server), NOW).await;
        assert_eq!(out, token);
    }

    #[tokio::test]
    async fn expired_token_without_refresh_token_is_errored_offline() {
        let server = MockServer::start().await;
        no_calls_expected(&server).await;
        let out = jwt_callback_at(
            JwtCallbackParams::new(expiring(NOW - 100, None)),
            &context(&server),
            NOW,
        )
        .await;
        assert_eq!(out.error, Some(TokenError::RefreshTokenError));
        assert_eq!(out.access_token, None);
    }

    #[tokio::test]
    async fn refresh_success_rolls_token_forward() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("refresh_token=r"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = jwt_callback_at(
            JwtCallbackParams::new(expiring(NOW - 100, Some("r"))),
            &context(&server),
            NOW,
        )
        .await;

        assert_eq!(out.access_token.as_deref(), Some("new"));
        assert_eq!(out.expires_at, Some(NOW + 3600));
        assert_eq!(out.refresh_token.as_deref(), Some("r"));
        assert_eq!(out.error, None);
        assert_eq!(out.login.as_ref().map(|l| l.as_str()), Some("octocat"));
    }

    #[tokio::test]
    async fn refresh_inside_skew_window_uses_rotated_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new",
                "expires_in": 28800,
                "refresh_token": "rotated"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = jwt_callback_at(
            JwtCallbackParams::new(expiring(NOW + 60, Some("r"))),
            &context(&server),
            NOW,
        )
        .await;
        assert_eq!(out.refresh_token.as_deref(), Some("rotated"));
        assert_eq!(out.expires_at, Some(NOW + 28800));
    }

    #[tokio::test]
    async fn rejected_refresh_is_errored_and_keeps_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "bad_refresh_token",
                "refresh_token": "echoed"
            })))
            .mount(&server)
            .await;

        let out = jwt_callback_at(
            JwtCallbackParams::new(expiring(NOW - 100, Some("r"))),
            &context(&server),
            NOW,
        )
        .await;
        assert!(out.has_refresh_error());
        assert_eq!(out.access_token, None);
        assert_eq!(out.refresh_token.as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn transport_failure_is_errored() {
        let config = OAuthConfig::github()
            .with_token_url("http://127.0.0.1:9/login/oauth/access_token".parse().unwrap());
        let env = AuthEnv::default().with_github_credentials("id", "secret");
        let ctx = RefreshContext::new(AuthClient::new(config), &env);

        let out = jwt_callback_at(JwtCallbackParams::new(expiring(NOW - 100, Some("r"))), &ctx, NOW).await;
        assert!(out.has_refresh_error());
        assert_eq!(out.access_token, None);
    }

    #[tokio::test]
    async fn missing_credentials_skip_the_exchange() {
        let server = MockServer::start().await;
        no_calls_expected(&server).await;
        let config = OAuthConfig::github()
            .with_token_url(format!("{}{TOKEN_PATH}", server.uri()).parse().unwrap());
        let ctx = RefreshContext::new(AuthClient::new(config), &AuthEnv::default());

        let out = jwt_callback_at(JwtCallbackParams::new(expiring(NOW - 100, Some("r"))), &ctx, NOW).await;
        assert!(out.has_refresh_error());
        assert_eq!(out.refresh_token.as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn explicit_credentials_override_environment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("client_id=override"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new",
                "expires_in": 60
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = context(&server).with_credentials(ClientCredentials::new("override", "s"));
        let out = jwt_callback_at(JwtCallbackParams::new(expiring(NOW, Some("r"))), &ctx, NOW).await;
        assert_eq!(out.access_token.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn sign_in_wins_over_expiry_and_clears_error() {
        let server = MockServer::start().await;
        no_calls_expected(&server).await;

        let mut profile = GitHubProfile::new(583_231, "octocat");
        profile.name = Some("The Octocat".into());
        let account = Account::github("583231")
            .with_access_token("gho_fresh", Some(NOW + 28800))
            .with_refresh_token("ghr_fresh");
        let params = JwtCallbackParams {
            token: expiring(NOW - 100, None).with_refresh_error(),
            account: Some(account),
            profile: Some(profile),
        };

        let out = jwt_callback_at(params, &context(&server), NOW).await;
        assert_eq!(out.access_token.as_deref(), Some("gho_fresh"));
        assert_eq!(out.expires_at, Some(NOW + 28800));
        assert_eq!(out.refresh_token.as_deref(), Some("ghr_fresh"));
        assert_eq!(out.login.as_ref().map(|l| l.as_str()), Some("octocat"));
        assert_eq!(out.name.as_deref(), Some("The Octocat"));
        assert_eq!(out.sub.as_ref().map(ToString::to_string).as_deref(), Some("583231"));
        assert_eq!(out.error, None);
    }

    #[test]
    fn sanitizer_keeps_only_error_fields() {
        let body = json!({
            "error": "bad_refresh_token",
            "error_description": "expired",
            "access_token": "gho_leak",
            "refresh_token": "ghr_leak"
        });
        let sanitized = sanitize_refresh_error(&body);
        assert_eq!(sanitized.error, "bad_refresh_token");
        assert_eq!(sanitized.error_description.as_deref(), Some("expired"));

        let json = serde_json::to_value(&sanitized).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 2);
        assert!(!json.to_string().contains("leak"));
    }

    #[test]
    fn sanitizer_defaults_error_to_unknown() {
        for body in [json!({}), json!(null), json!("text"), json!({"access_token": "x"})] {
            let sanitized = sanitize_refresh_error(&body);
            assert_eq!(sanitized.error, "unknown");
            assert_eq!(sanitized.error_description, None);
        }
    }
}
