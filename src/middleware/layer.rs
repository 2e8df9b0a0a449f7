use std::sync::{Arc, Mutex};

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::http::header::SET_COOKIE;
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::Cookie;

/// Request extension the [`AuthContext`](super::AuthContext) extractor fills
/// with a re-sealed session cookie when the `jwt` callback changed the record.
#[derive(Clone, Default)]
pub(super) struct PendingSessionCookies(Arc<Mutex<Vec<Cookie<'static>>>>);

impl PendingSessionCookies {
    pub(super) fn set(&self, cookies: Vec<Cookie<'static>>) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = cookies;
        }
    }

    pub(super) fn take(&self) -> Vec<Cookie<'static>> {
        self.0
            .lock()
            .map(|mut slot| std::mem::take(&mut *slot))
            .unwrap_or_default()
    }
}

/// Writes a refreshed session back to the browser.
///
/// Install with `axum::middleware::from_fn(persist_session)` on every router
/// whose handlers extract [`AuthContext`](super::AuthContext). Any handler,
/// including one that returns early with an [`AuthFailure`](super::AuthFailure),
/// then carries the re-sealed session cookie on its response.
pub async fn persist_session(mut request: Request, next: Next) -> Response {
    let pending = PendingSessionCookies::default();
    request.extensions_mut().insert(pending.clone());

    let mut response = next.run(request).await;
    for cookie in pending.take() {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => tracing::error!(cookie = cookie.name(), error = %e, "unwritable session cookie"),
        }
    }
    response
}
