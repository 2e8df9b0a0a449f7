use secrecy::SecretString;
use url::Url;

use crate::config::AuthEnv;
use crate::error::Error;
use crate::jwt::DEFAULT_MAX_AGE;
use crate::oauth::{AuthClient, ClientCredentials, OAuthConfig};
use crate::refresh::{JwtCallbackParams, RefreshContext, auth_jwt_callback};
use crate::session::{Session, auth_session_callback, default_session};
use crate::types::TokenRecord;

/// Decide whether the `Host` header may be trusted when building callback
/// and redirect URLs.
///
/// Trusted outside production, when `AUTH_TRUST_HOST` is `"true"` or unset,
/// or when running on Cloudflare Pages / Vercel. An explicit non-`"true"`
/// flag in production, off those platforms, disables it.
#[must_use]
pub fn resolve_trust_host(
    node_env: Option<&str>,
    trust_host: Option<&str>,
    cf_pages: Option<&str>,
    vercel: Option<&str>,
) -> bool {
    let on_platform = [cf_pages, vercel]
        .into_iter()
        .any(|flag| flag.is_some_and(|v| !v.is_empty()));

    node_env != Some("production") || trust_host.is_none_or(|v| v == "true") || on_platform
}

/// Post-auth landing URL guard.
///
/// Origin-relative paths are joined to `base_url`; absolute URLs survive only
/// when their origin matches `base_url`. Everything else lands on `base_url`.
#[must_use]
pub fn resolve_redirect_url(url: &str, base_url: &str) -> String {
    if url.starts_with('/') {
        return format!("{}{url}", base_url.trim_end_matches('/'));
    }

    let same_origin = match (Url::parse(url), Url::parse(base_url)) {
        (Ok(target), Ok(base)) => target.origin() == base.origin(),
        _ => false,
    };
    if same_origin {
        url.to_owned()
    } else {
        base_url.to_owned()
    }
}

/// Per-deployment auth configuration: the values the identity layer needs on
/// each request, resolved from the environment once.
#[derive(Clone)]
pub struct AuthOptions {
    pub(crate) env: AuthEnv,
    pub(crate) trust_host: bool,
    pub(crate) base_url: Option<Url>,
    pub(crate) max_age: i64,
    pub(crate) refresh: RefreshContext,
}

impl AuthOptions {
    /// Build options from an [`AuthEnv`], sharing `http` for every provider call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `AUTH_URL` is set but is not an absolute URL.
    pub fn from_env(env: AuthEnv, http: reqwest::Client) -> Result<Self, Error> {
        let base_url = env
            .auth_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw).map_err(|e| Error::Config(format!("AUTH_URL: {e}")))
            })
            .transpose()?;

        let client = AuthClient::new(OAuthConfig::github()).with_http_client(http);
        let refresh = RefreshContext::new(client, &env);

        tracing::debug!(
            trust_host = env.trust_host(),
            production = env.is_production(),
            has_secret = env.secret.is_some(),
            has_github_credentials = refresh.credentials().is_some(),
            "auth options resolved"
        );

        Ok(Self {
            trust_host: env.trust_host(),
            base_url,
            max_age: DEFAULT_MAX_AGE,
            refresh,
            env,
        })
    }

    /// Override the GitHub endpoints (GitHub Enterprise, tests).
    #[must_use]
    pub fn with_oauth_config(mut self, config: OAuthConfig, http: reqwest::Client) -> Self {
        let client = AuthClient::new(config).with_http_client(http);
        let credentials = self.refresh.credentials().cloned();
        self.refresh = RefreshContext::new(client, &self.env);
        if let Some(credentials) = credentials {
            self.refresh = self.refresh.with_credentials(credentials);
        }
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: ClientCredentials) -> Self {
        self.refresh = self.refresh.with_credentials(credentials);
        self
    }

    /// Session cookie lifetime in seconds (default 30 days).
    #[must_use]
    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = seconds;
        self
    }

    #[must_use]
    pub fn with_trust_host(mut self, trust: bool) -> Self {
        self.trust_host = trust;
        self
    }

    #[must_use]
    pub fn env(&self) -> &AuthEnv {
        &self.env
    }

    #[must_use]
    pub fn secret(&self) -> Option<&SecretString> {
        self.env.secret.as_ref()
    }

    #[must_use]
    pub fn trust_host(&self) -> bool {
        self.trust_host
    }

    #[must_use]
    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    #[must_use]
    pub fn max_age(&self) -> i64 {
        self.max_age
    }

    #[must_use]
    pub fn refresh_context(&self) -> &RefreshContext {
        &self.refresh
    }

    /// `jwt` callback hook.
    pub async fn jwt(&self, params: JwtCallbackParams) -> TokenRecord {
        auth_jwt_callback(params, &self.refresh).await
    }

    /// `session` callback hook.
    #[must_use]
    pub fn session(&self, token: &TokenRecord) -> Session {
        auth_session_callback(default_session(token, self.max_age), token)
    }

    /// `redirect` callback hook.
    #[must_use]
    pub fn redirect(&self, url: &str, base_url: &str) -> String {
        resolve_redirect_url(url, base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_host_outside_production() {
        assert!(resolve_trust_host(Some("development"), None, None, None));
        assert!(resolve_trust_host(None, Some("false"), None, None));
        assert!(resolve_trust_host(Some("test"), Some("false"), None, None));
    }

    #[test]
    fn trust_host_in_production() {
        assert!(resolve_trust_host(Some("production"), None, None, None));
        assert!(resolve_trust_host(Some("production"), Some("true"), None, None));
        assert!(!resolve_trust_host(Some("production"), Some("false"), None, None));
        assert!(!resolve_trust_host(Some("production"), Some("1"), None, None));
    }

    #[test]
    fn trust_host_on_hosting_platforms() {
        assert!(resolve_trust_host(Some("production"), Some("false"), Some("1"), None));
        assert!(resolve_trust_host(Some("production"), Some("false"), None, Some("1")));
        assert!(!resolve_trust_host(Some("production"), Some("false"), Some(""), None));
    }

    #[test]
    fn relative_redirect_joins_base() {
        assert_eq!(
            resolve_redirect_url("/modules?sort=new", "https://example.com"),
            "https://example.com/modules?sort=new"
        );
        assert_eq!(
            resolve_redirect_url("/me", "https://example.com/"),
            "https://example.com/me"
        );
    }

    #[test]
    fn foreign_origin_falls_back_to_base() {
        assert_eq!(
            resolve_redirect_url("https://evil.example", "https://example.com"),
            "https://example.com"
        );
        assert_eq!(
            resolve_redirect_url("http://example.com/x", "https://example.com"),
            "https://example.com"
        );
        assert_eq!(
            resolve_redirect_url("https://example.com:8443/x", "https://example.com"),
            "https://example.com"
        );
    }

    #[test]
    fn same_origin_absolute_url_is_kept() {
        assert_eq!(
            resolve_redirect_url("https://example.com/modules/foo", "https://example.com"),
            "https://example.com/modules/foo"
        );
    }

    #[test]
    fn unparseable_url_falls_back_to_base() {
        assert_eq!(
            resolve_redirect_url("not a url", "https://example.com"),
            "https://example.com"
        );
        assert_eq!(
            resolve_redirect_url("javascript:alert(1)", "https://example.com"),
            "https://example.com"
        );
    }

    #[test]
    fn options_reject_invalid_auth_url() {
        let env = AuthEnv::default().with_auth_url("not a url");
        assert!(matches!(
            AuthOptions::from_env(env, reqwest::Client::new()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn options_follow_environment() {
        let env = AuthEnv::default()
            .with_secret("s")
            .with_node_env("production")
            .with_trust_host("false")
            .with_auth_url("https://registry.example")
            .with_github_credentials("id", "secret");
        let options = AuthOptions::from_env(env, reqwest::Client::new()).unwrap();
        assert!(!options.trust_host());
        assert_eq!(options.base_url().unwrap().as_str(), "https://registry.example/");
        assert!(options.refresh_context().credentials().is_some());
        assert_eq!(options.max_age(), DEFAULT_MAX_AGE);
    }

    #[test]
    fn session_hook_strips_credentials() {
        let options = AuthOptions::from_env(AuthEnv::default(), reqwest::Client::new()).unwrap();
        let token = TokenRecord {
            access_token: Some("gho_x".into()),
            login: Some("octocat".into()),
            ..TokenRecord::default()
        };
        let json = serde_json::to_string(&options.session(&token)).unwrap();
        assert!(!json.contains("gho_x"));
        assert!(json.contains("octocat"));
    }
}
