use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::http::header::HOST;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum_extra::extract::{CookieJar, PrivateCookieJar};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::config::AuthRoutesConfig;
use super::cookies;
use super::error::AuthError;
use super::extractor::AuthContext;
use super::state::AuthState;
use crate::callbacks::AuthOptions;
use crate::jwt;
use crate::refresh::JwtCallbackParams;
use crate::resolver::{self, RequestCookies};
use crate::types::Account;

/// Create the auth router: sign-in, OAuth callback, sign-out and session.
pub fn auth_routes<S>(config: impl Into<AuthRoutesConfig>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let config = config.into();
    let auth_path = config.settings.auth_path.clone();

    let state = AuthState {
        options: config.options,
        settings: config.settings,
    };

    Router::new()
        .route(&format!("{auth_path}/signin/github"), get(signin))
        .route(&format!("{auth_path}/callback/github"), get(callback))
        .route(&format!("{auth_path}/signout"), post(signout))
        .route(&format!("{auth_path}/session"), get(session))
        .with_state(state)
}

// ── Sign-in ────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SigninParams {
    callback_url: Option<String>,
}

async fn signin(
    State(state): State<AuthState>,
    jar: PrivateCookieJar,
    Query(params): Query<SigninParams>,
    headers: HeaderMap,
) -> Result<(PrivateCookieJar, Redirect), AuthError> {
    let origin = request_origin(&state.options, &headers)?;
    let secure = origin.starts_with("https://");
    let redirect_uri = callback_uri(&origin, &state.settings.auth_path)?;

    let credentials = state
        .options
        .refresh_context()
        .credentials()
        .ok_or_else(|| AuthError::Config("AUTH_GITHUB_ID and AUTH_GITHUB_SECRET are required".into()))?;

    let auth_req = state
        .options
        .refresh_context()
        .client()
        .authorization_url(&credentials.client_id, &redirect_uri);

    let landing = params
        .callback_url
        .as_deref()
        .unwrap_or(&state.settings.login_redirect);
    let landing = state.options.redirect(landing, &origin);

    let jar = cookies::handshake_cookies(
        &auth_req.code_verifier,
        &auth_req.state,
        &landing,
        secure,
        &state.settings.auth_path,
    )
    .into_iter()
    .fold(jar, PrivateCookieJar::add);

    Ok((jar, Redirect::to(&auth_req.url)))
}

// ── Callback ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn callback(
    State(state): State<AuthState>,
    jar: PrivateCookieJar,
    session_jar: CookieJar,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> Result<(PrivateCookieJar, CookieJar, Redirect), Response> {
    let error_redirect = state.settings.error_redirect.as_str();

    if let Some(error) = &params.error {
        let desc = params.error_description.as_deref().unwrap_or("Unknown error");
        tracing::warn!(error = %error, description = %desc, "OAuth2 error from GitHub");
        return Err(login_error(error_redirect, "access_denied"));
    }

    let origin = request_origin(&state.options, &headers).map_err(IntoResponse::into_response)?;
    let secure = origin.starts_with("https://");
    let redirect_uri =
        callback_uri(&origin, &state.settings.auth_path).map_err(IntoResponse::into_response)?;

    let code = params
        .code
        .ok_or_else(|| login_error(error_redirect, "missing_code"))?;

    let handshake = cookies::get_handshake(&jar, secure);

    let received_state = params
        .state
        .ok_or_else(|| login_error(error_redirect, "state_mismatch"))?;
    let stored_state = handshake
        .state
        .ok_or_else(|| login_error(error_redirect, "state_mismatch"))?;
    if received_state != stored_state {
        tracing::warn!("OAuth state mismatch");
        return Err(login_error(error_redirect, "state_mismatch"));
    }

    let code_verifier = handshake
        .code_verifier
        .ok_or_else(|| login_error(error_redirect, "missing_verifier"))?;

    let ctx = state.options.refresh_context();
    let credentials = ctx.credentials().ok_or_else(|| {
        tracing::error!("GitHub client credentials are not configured");
        login_error(error_redirect, "configuration")
    })?;

    let tokens = ctx
        .client()
        .exchange_code(credentials, &code, &code_verifier, &redirect_uri)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Token exchange failed");
            login_error(error_redirect, "token_exchange_failed")
        })?;

    let profile = ctx.client().get_user(&tokens.access_token).await.map_err(|e| {
        tracing::error!(error = %e, "GitHub user lookup failed");
        login_error(error_redirect, "userinfo_failed")
    })?;

    let mut account = Account::github(profile.id.to_string()).with_access_token(
        tokens.access_token.clone(),
        tokens.expires_in.map(|secs| crate::now_unix() + secs),
    );
    if let Some(refresh_token) = &tokens.refresh_token {
        account = account.with_refresh_token(refresh_token.clone());
    }
    account.scope = tokens.scope.clone();

    let login = profile.login.clone();
    let record = state
        .options
        .jwt(JwtCallbackParams::sign_in(account, profile))
        .await;

    let secret = resolver::resolve_secret(state.options.env(), None)
        .ok()
        .flatten()
        .ok_or_else(|| {
            tracing::error!("AUTH_SECRET is not configured; cannot issue a session");
            login_error(error_redirect, "configuration")
        })?;

    let cookie_name = cookies::session_cookie_name(secure);
    let max_age = state.options.max_age();
    let sealed = jwt::encode(&record, &secret, cookie_name, max_age).map_err(|e| {
        tracing::error!(error = %e, "Session sealing failed");
        login_error(error_redirect, "session_failed")
    })?;

    let previous = RequestCookies::from(&session_jar);
    let session_jar = cookies::session_cookies(cookie_name, &sealed, max_age, secure, &previous)
        .into_iter()
        .fold(session_jar, CookieJar::add);

    let jar = cookies::clear_handshake_cookies(secure, &state.settings.auth_path)
        .into_iter()
        .fold(jar, PrivateCookieJar::remove);

    let landing = handshake
        .callback_url
        .unwrap_or_else(|| state.settings.login_redirect.clone());
    let landing = state.options.redirect(&landing, &origin);

    tracing::info!(login = %login, "GitHub sign-in successful");

    Ok((jar, session_jar, Redirect::to(&landing)))
}

// ── Sign-out ───────────────────────────────────────────────────────

async fn signout(State(state): State<AuthState>, jar: CookieJar) -> (CookieJar, Redirect) {
    let previous = RequestCookies::from(&jar);
    let jar = cookies::clear_session_cookies(&previous)
        .into_iter()
        .fold(jar, CookieJar::add);
    (jar, Redirect::to(&state.settings.logout_redirect))
}

// ── Session ────────────────────────────────────────────────────────

async fn session(ctx: AuthContext, jar: CookieJar) -> Response {
    let jar = ctx.persist(jar);
    match &ctx.session {
        Some(session) => (jar, Json(session)).into_response(),
        None => (jar, Json(json!({}))).into_response(),
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn login_error(error_redirect: &str, code: &str) -> Response {
    let encoded = urlencoding::encode(code);
    Redirect::to(&format!("{error_redirect}?error={encoded}")).into_response()
}

fn header_value<'a>(headers: &'a HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Origin the browser sees: `AUTH_URL` when configured, else the forwarded
/// or `Host` header when the host is trusted.
fn request_origin(options: &AuthOptions, headers: &HeaderMap) -> Result<String, AuthError> {
    if let Some(base) = options.base_url() {
        return Ok(base.origin().ascii_serialization());
    }
    if !options.trust_host() {
        return Err(AuthError::UntrustedHost);
    }

    let host = header_value(headers, "x-forwarded-host")
        .or_else(|| header_value(headers, HOST))
        .ok_or(AuthError::UntrustedHost)?;
    let proto = header_value(headers, "x-forwarded-proto").unwrap_or("https");
    Ok(format!("{proto}://{host}"))
}

fn callback_uri(origin: &str, auth_path: &str) -> Result<Url, AuthError> {
    Url::parse(&format!("{origin}{auth_path}/callback/github"))
        .map_err(|e| AuthError::Config(format!("invalid callback URL: {e}")))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use axum_extra::extract::cookie::{Cookie, Key};
    use tower::ServiceExt;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::AuthEnv;
    use crate::oauth::OAuthConfig;
    use crate::resolver::SESSION_COOKIE;

    fn options(env: AuthEnv) -> AuthOptions {
        AuthOptions::from_env(
            env.with_secret("routes-test-secret")
                .with_github_credentials("client-id", "client-secret"),
            reqwest::Client::new(),
        )
        .unwrap()
    }

    fn app(options: AuthOptions, key: Key) -> Router {
        auth_routes(AuthRoutesConfig::new(options).with_cookie_key(key))
    }

    fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
        request("GET", uri, cookie)
    }

    fn request(method: &str, uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(HOST, "localhost:3000")
            .header("x-forwarded-proto", "http");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    /// `name=value` pairs of every non-removal `Set-Cookie`, joined as a
    /// request `Cookie` header.
    fn cookie_header(response: &Response) -> String {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| Cookie::parse(v.to_str().ok()?.to_string()).ok())
            .filter(|c| !c.value().is_empty())
            .map(|c| format!("{}={}", c.name(), c.value()))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn location(response: &Response) -> &str {
        response.headers()[header::LOCATION].to_str().unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn signin_redirects_to_github_with_pkce() {
        let response = app(options(AuthEnv::default()), Key::generate())
            .oneshot(get("/auth/signin/github?callbackUrl=/modules", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let url = Url::parse(location(&response)).unwrap();
        assert!(url.as_str().starts_with("https://github.com/login/oauth/authorize"));
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["client_id"], "client-id");
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(
            query["redirect_uri"],
            "http://localhost:3000/auth/callback/github"
        );
        assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 3);
    }

    #[tokio::test]
    async fn untrusted_host_without_auth_url_is_refused() {
        let env = AuthEnv::default()
            .with_node_env("production")
            .with_trust_host("false");
        let response = app(options(env), Key::generate())
            .oneshot(get("/auth/signin/github", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn auth_url_overrides_request_host() {
        let env = AuthEnv::default()
            .with_node_env("production")
            .with_trust_host("false")
            .with_auth_url("https://registry.example.com");
        let response = app(options(env), Key::generate())
            .oneshot(get("/auth/signin/github", None))
            .await
            .unwrap();
        let url = Url::parse(location(&response)).unwrap();
        let redirect_uri = url
            .query_pairs()
            .find(|(k, _)| k == "redirect_uri")
            .map(|(_, v)| v.into_owned());
        assert_eq!(
            redirect_uri.as_deref(),
            Some("https://registry.example.com/auth/callback/github")
        );
    }

    #[tokio::test]
    async fn callback_rejects_state_mismatch() {
        let key = Key::generate();
        let router = app(options(AuthEnv::default()), key);
        let signin = router
            .clone()
            .oneshot(get("/auth/signin/github", None))
            .await
            .unwrap();
        let cookies = cookie_header(&signin);

        let response = router
            .oneshot(get(
                "/auth/callback/github?code=abc&state=forged",
                Some(&cookies),
            ))
            .await
            .unwrap();
        assert_eq!(location(&response), "/login?error=state_mismatch");
    }

    #[tokio::test]
    async fn callback_reports_provider_error() {
        let response = app(options(AuthEnv::default()), Key::generate())
            .oneshot(get(
                "/auth/callback/github?error=access_denied&error_description=denied",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(location(&response), "/login?error=access_denied");
    }

    #[tokio::test]
    async fn full_sign_in_sets_session_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "gho_fresh",
                "token_type": "bearer",
                "expires_in": 28800,
                "refresh_token": "ghr_fresh",
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 42,
                "login": "octocat",
                "name": "The Octocat",
            })))
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let config = OAuthConfig::github()
            .with_token_url(base.join("/login/oauth/access_token").unwrap())
            .with_userinfo_url(base.join("/user").unwrap());
        let options = options(AuthEnv::default()).with_oauth_config(config, reqwest::Client::new());
        let router = app(options, Key::generate());

        let signin = router
            .clone()
            .oneshot(get("/auth/signin/github?callbackUrl=/modules/acme", None))
            .await
            .unwrap();
        let state = Url::parse(location(&signin))
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let handshake = cookie_header(&signin);

        let callback = router
            .clone()
            .oneshot(get(
                &format!("/auth/callback/github?code=abc&state={state}"),
                Some(&handshake),
            ))
            .await
            .unwrap();
        assert_eq!(callback.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&callback), "http://localhost:3000/modules/acme");

        let session_cookie = cookie_header(&callback);
        assert!(session_cookie.starts_with(&format!("{SESSION_COOKIE}=")));

        let response = router
            .oneshot(get("/auth/session", Some(&session_cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["user"]["login"], "octocat");
        assert_eq!(body["user"]["id"], "42");
        assert!(body.get("accessToken").is_none());
    }

    #[tokio::test]
    async fn anonymous_session_is_empty_object() {
        let response = app(options(AuthEnv::default()), Key::generate())
            .oneshot(get("/auth/session", None))
            .await
            .unwrap();
        assert_eq!(json_body(response).await, json!({}));
    }

    #[tokio::test]
    async fn signout_clears_every_chunk() {
        let response = app(options(AuthEnv::default()), Key::generate())
            .oneshot(request(
                "POST",
                "/auth/signout",
                Some("authjs.session-token.0=a; authjs.session-token.1=b; theme=dark"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let cleared: Vec<String> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| Cookie::parse(v.to_str().ok()?.to_string()).ok())
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(cleared.len(), 2);
        assert!(cleared.iter().all(|n| n.starts_with(SESSION_COOKIE)));
    }

    #[tokio::test]
    async fn signout_rejects_get() {
        let response = app(options(AuthEnv::default()), Key::generate())
            .oneshot(get("/auth/signout", Some("authjs.session-token=a")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }
}
