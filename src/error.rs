use thiserror::Error;

/// Failures reported by the remote log source.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transport failure talking to log source: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("log source rejected credentials ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("log source throttled the request: {0}")]
    Throttled(String),

    #[error("log source rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid response from log source: {0}")]
    InvalidResponse(String),

    #[error("log source unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Transport(_) | BackendError::Throttled(_) | BackendError::Unavailable(_)
        )
    }
}

/// An event payload that could not be decoded. Dropped by callers, never fatal.
#[derive(Debug, Error)]
#[error("malformed log event ({reason}): {payload}")]
pub struct MalformedEventError {
    pub reason: String,
    pub payload: String,
}

/// Why an ad hoc query produced no result. Never closes the session.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("local search worker failed: {0}")]
    Worker(String),
}

/// Errors that force the interactive session to close.
#[derive(Debug, Error)]
pub enum SessionFatalError {
    #[error("log source failed: {0}")]
    LogSource(#[source] BackendError),

    #[error("terminal I/O failed: {0}")]
    Terminal(#[from] std::io::Error),
}
