use thiserror::Error;

/// Top-level error type for the livechat widget runtime.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("credential exchange failed: {0}")]
    Auth(String),

    #[error("agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("message send failed: {0}")]
    Send(String),

    #[error("message rejected: {0}")]
    Validation(String),

    #[error("realtime channel error: {0}")]
    Channel(String),

    #[error("backend query failed: {0}")]
    Backend(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChatError {
    /// Whether this error came from the realtime layer hitting its
    /// rate budget. Such channels are logged and left alone, never
    /// automatically recreated.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ChatError::Channel(msg)
            if msg.contains("rate_limit") || msg.contains("RateLimitReached"))
    }
}
