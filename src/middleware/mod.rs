//! Axum integration for the registry session.
//!
//! Mounts the GitHub sign-in flow and exposes the per-request session to
//! route handlers.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use registry_auth::middleware::{
//!     AuthContext, AuthFailure, AuthRoutesConfig, auth_routes, persist_session,
//!     require_authenticated_action,
//! };
//!
//! // 1. Configure from environment (AUTH_SECRET, AUTH_GITHUB_ID, COOKIE_KEY, ...)
//! let config = AuthRoutesConfig::from_env()?;
//! let options = config.options().clone();
//!
//! // 2. Mount auth routes; the layer writes refreshed sessions back
//! let app = axum::Router::new()
//!     .route("/api/modules/{name}/star", axum::routing::post(star))
//!     .merge(auth_routes(config))
//!     .layer(axum::middleware::from_fn(persist_session))
//!     .with_state(options);
//!
//! // 3. Gate mutating handlers
//! async fn star(auth: AuthContext) -> Result<&'static str, AuthFailure> {
//!     let action = require_authenticated_action(auth)?;
//!     Ok("starred")
//! }
//! ```

mod config;
mod cookies;
mod error;
mod extractor;
mod layer;
mod routes;
mod state;

pub use config::AuthRoutesConfig;
pub use error::{AuthError, AuthFailure};
pub use extractor::{AuthContext, AuthenticatedAction, is_auth_failure, require_authenticated_action};
pub use layer::persist_session;
pub use routes::auth_routes;

/// Re-export cookie key type for builder API.
pub use axum_extra::extract::cookie::Key as CookieKey;
