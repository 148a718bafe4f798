use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("queue not configured: {0}")]
    QueueNotConfigured(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("handler timed out after {0:?}")]
    HandlerTimeout(Duration),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("event bus is shutting down")]
    ShuttingDown,
}

impl From<redis::RedisError> for PulseError {
    fn from(err: redis::RedisError) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PulseError>;
