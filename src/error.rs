use std::time::Duration;

/// Failure of a remote exchange call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited by exchange")]
    RateLimited,

    #[error("exchange server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout(_)
                | GatewayError::Transport(_)
                | GatewayError::RateLimited
                | GatewayError::Server { .. }
        )
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Malformed(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// Invalid or unreadable configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Await a remote call, mapping an elapsed deadline to `GatewayError::Timeout`
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, GatewayError>
where
    F: std::future::Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(limit)),
    }
}
