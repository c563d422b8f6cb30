use std::fmt;

use crate::ConfigError;

/// Retry classification shared by every external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The dependency rejected the call above its request-rate threshold.
    RateLimited,
    /// Timeouts, 5xx responses, connection resets.
    Transient,
    /// Quota exhausted, authentication, permanently malformed input.
    Fatal,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::RateLimited => write!(f, "rate limited"),
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Fatal => write!(f, "fatal"),
        }
    }
}

/// Every failure a pipeline run can observe, typed so that retry decisions
/// never depend on message text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid job config: {0}")]
    Config(#[from] ConfigError),
    #[error("fetch failed ({kind}): {message}")]
    Fetch { kind: ErrorKind, message: String },
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Server-provided hint for the earliest retry, if any.
        retry_after_ms: Option<u64>,
    },
    #[error("transform failed ({kind}): {message}")]
    Transform { kind: ErrorKind, message: String },
    #[error("persistence failed ({kind}): {message}")]
    Persistence { kind: ErrorKind, message: String },
    #[error("cancelled")]
    Cancelled,
    #[error("stage panicked: {message}")]
    Panicked { message: String },
}

impl PipelineError {
    pub fn fetch(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Fetch {
            kind,
            message: message.into(),
        }
    }

    pub fn transform(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Transform {
            kind,
            message: message.into(),
        }
    }

    pub fn persistence(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Persistence {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::RateLimited { .. } => ErrorKind::RateLimited,
            PipelineError::Fetch { kind, .. }
            | PipelineError::Transform { kind, .. }
            | PipelineError::Persistence { kind, .. } => *kind,
            PipelineError::Config(_)
            | PipelineError::Cancelled
            | PipelineError::Panicked { .. } => ErrorKind::Fatal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            PipelineError::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}
