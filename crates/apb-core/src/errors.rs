use std::{path::PathBuf, time::Duration};

/// Core error type for the moderation bot.
///
/// Adapter crates map their specific errors into this type so the pipeline
/// can tell retryable platform failures apart from requests the platform
/// will never accept.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {path}: {reason}")]
    Storage { path: PathBuf, reason: String },

    /// Network failure, remote 5xx or a flood-control response. Safe to retry.
    #[error("transient platform error: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The platform rejected the request (bad request, permission denied).
    #[error("platform rejected request: {0}")]
    Fatal(String),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Server-provided wait hint, if the platform sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
