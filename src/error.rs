use thiserror::Error;

/// Main error type for codefinder operations
#[derive(Error, Debug)]
pub enum FinderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("Index error: {0}")]
    Index(String),

    #[error("LLM transport error{}: {message}", format_status(.status))]
    Transport { status: Option<u16>, message: String },

    #[error("LLM network error: {message}")]
    Network { message: String, timed_out: bool },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl FinderError {
    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        FinderError::Transport {
            status,
            message: message.into(),
        }
    }

    /// A request that never produced an HTTP response
    pub fn network(message: impl Into<String>, timed_out: bool) -> Self {
        FinderError::Network {
            message: message.into(),
            timed_out,
        }
    }

    /// Whether a failed LLM call may be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            FinderError::Network { .. } => true,
            FinderError::Transport { status: Some(status), .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Text suitable for showing to a person instead of the raw error chain.
    pub fn user_message(&self) -> String {
        match self {
            FinderError::Transport { status: Some(504), .. } => {
                "The LLM gateway timed out (HTTP 504). Increase the proxy timeout or retry later.".to_string()
            }
            FinderError::Transport { status: Some(502 | 503), .. } => {
                "The LLM endpoint is unavailable right now (bad gateway). Retry later.".to_string()
            }
            FinderError::Transport { status: Some(429), .. } => {
                "The LLM endpoint is rate limiting requests. Wait a moment and retry.".to_string()
            }
            FinderError::Transport { status: Some(401 | 403), .. } => {
                "The LLM endpoint rejected the credentials. Check the configured API key.".to_string()
            }
            FinderError::Network { timed_out: true, .. } => {
                "The request to the LLM endpoint timed out. Increase the proxy timeout or retry later.".to_string()
            }
            FinderError::Network { message, .. } => {
                format!("Could not reach the LLM endpoint: {}", message)
            }
            FinderError::Transport { status, message } => match status {
                Some(code) => format!("The LLM request failed with HTTP {}: {}", code, message),
                None => format!("The LLM request failed: {}", message),
            },
            FinderError::Cancelled => "Request cancelled.".to_string(),
            other => other.to_string(),
        }
    }
}

fn format_status(status: &Option<u16>) -> String {
    status.map(|code| format!(" (HTTP {})", code)).unwrap_or_default()
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

pub type Result<T> = std::result::Result<T, FinderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FinderError::transport(Some(429), "slow down").is_retryable());
        assert!(FinderError::transport(Some(503), "unavailable").is_retryable());
        assert!(!FinderError::transport(Some(400), "bad request").is_retryable());
        assert!(FinderError::network("connection reset by peer", false).is_retryable());
        assert!(FinderError::network("operation timed out", true).is_retryable());
        // a 2xx body that does not parse is final
        assert!(!FinderError::transport(None, "Failed to parse LLM response").is_retryable());
        assert!(!FinderError::Cancelled.is_retryable());
        assert!(!FinderError::Tool("x".to_string()).is_retryable());
    }

    #[test]
    fn test_gateway_timeout_message_is_actionable() {
        let message = FinderError::transport(Some(504), "Gateway Timeout").user_message();
        assert!(message.contains("Increase the proxy timeout"));
        let message = FinderError::network("deadline elapsed", true).user_message();
        assert!(message.contains("Increase the proxy timeout"));
    }
}
