#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("OAuth2 error during {operation}: {detail}")]
    OAuth {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Session token error: {0}")]
    Token(String),
    /// Raised only in production, where a missing secret is a deploy fault.
    #[error("{0} is not configured")]
    MissingSecret(&'static str),
    #[error("Configuration error: {0}")]
    Config(String),
}
