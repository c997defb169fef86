use thiserror::Error;

/// Errors returned by the Websets API client.
#[derive(Debug, Error)]
pub enum WebsetsError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websets api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("research run failed: {0}")]
    ResearchFailed(String),
}

pub type Result<T> = std::result::Result<T, WebsetsError>;

impl WebsetsError {
    /// Whether a retry could plausibly succeed (rate limits and server faults).
    pub fn is_transient(&self) -> bool {
        match self {
            WebsetsError::Api { status, .. } => *status == 429 || *status >= 500,
            WebsetsError::Http(e) => e.is_timeout() || e.is_connect(),
            WebsetsError::ResearchFailed(_) => false,
        }
    }
}
