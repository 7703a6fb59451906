use std::io;

use thiserror::Error;

/// Unified error type for proxy groups
#[derive(Error, Debug)]
pub enum GroupError {
    // Selection errors
    #[error("Proxy not found: {0}")]
    NotFound(String),

    #[error("Get delay: all proxies timed out")]
    AllProxiesTimedOut,

    #[error("Unsupported strategy: {0}")]
    UnsupportedStrategy(String),

    // Dial errors
    #[error("Dial via {proxy} failed: {source}")]
    DialFailed {
        proxy: String,
        #[source]
        source: io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid regex: {0}")]
    InvalidRegex(#[from] fancy_regex::Error),

    #[error("Invalid expected status: {0}")]
    InvalidExpectedStatus(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    // Probe errors
    #[error("Operation timed out")]
    Timeout,

    #[error("Unexpected status code: {0}")]
    UnexpectedStatus(u16),

    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for group operations
pub type Result<T> = std::result::Result<T, GroupError>;

impl GroupError {
    /// Check whether the underlying dial error is a refused connection
    pub fn is_connection_refused(&self) -> bool {
        match self {
            GroupError::DialFailed { source, .. } | GroupError::Io(source) => {
                is_refused(source)
            }
            _ => false,
        }
    }

    /// Check whether this error is a timeout of any kind
    pub fn is_timeout(&self) -> bool {
        match self {
            GroupError::Timeout | GroupError::AllProxiesTimedOut => true,
            GroupError::DialFailed { source, .. } | GroupError::Io(source) => {
                source.kind() == io::ErrorKind::TimedOut
            }
            _ => false,
        }
    }
}

/// Refusal is detected by kind first; adapters that flatten errors into
/// `Other` still carry the OS message.
pub(crate) fn is_refused(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::ConnectionRefused
        || err.to_string().contains("connection refused")
}

impl From<tokio::time::error::Elapsed> for GroupError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        GroupError::Timeout
    }
}
