//! Adapter error types.

use thiserror::Error;

pub type AiResult<T> = Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("adapter misconfigured: {0}")]
    Config(String),
}

impl AiError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Transport-level failures (timeout, connect, 5xx, 429) are worth
    /// retrying; malformed responses and other 4xx are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::Network(_) | AiError::Timeout(_) => true,
            AiError::Status { status, .. } => *status >= 500 || *status == 429,
            AiError::MalformedResponse(_) | AiError::Config(_) => false,
        }
    }
}

/// Map a non-success HTTP response to a typed error.
pub(crate) async fn status_error(response: reqwest::Response) -> AiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let body = if body.chars().count() > 512 {
        body.chars().take(512).collect()
    } else {
        body
    };
    AiError::Status { status, body }
}
