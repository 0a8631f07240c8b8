use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Remote store error: {0}")]
    Remote(String),
    #[error("Remote store unavailable")]
    RemoteUnavailable,
    #[error("Credential error: {0}")]
    Credential(String),
}

impl InfraError {
    /// Transient remote failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            InfraError::RemoteUnavailable => true,
            InfraError::Remote(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("temporarily unavailable")
                    || message.contains("connection reset")
                    || message.contains("http 5")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_network_errors_are_retryable() {
        assert!(InfraError::RemoteUnavailable.is_retryable());
        assert!(InfraError::Remote("network error while writing key".to_string()).is_retryable());
        assert!(InfraError::Remote("remote store error: http 503".to_string()).is_retryable());
        assert!(!InfraError::Remote("remote store error: http 401".to_string()).is_retryable());
        assert!(!InfraError::InvalidConfig("bad".to_string()).is_retryable());
    }
}
