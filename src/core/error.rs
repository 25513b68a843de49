use std::fmt;

use thiserror::Error;

/// Result type used throughout the client
pub type Result<T> = std::result::Result<T, IpfsError>;

/// Errors surfaced by the client
#[derive(Error, Debug)]
pub enum IpfsError {
    /// The endpoint could not be reached
    #[error("connection failed: {0}")]
    Connection(String),

    /// A request or operation deadline elapsed
    #[error("timed out: {0}")]
    Timeout(String),

    /// The node does not know the requested content address
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input or configuration
    #[error("invalid input: {0}")]
    Validation(String),

    /// The node reported a failure that is not otherwise classified
    #[error("node error (status {status}): {message}")]
    Remote { status: u16, message: String },

    /// Local file access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Discriminant of an [`IpfsError`], for callers that branch on the kind only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Timeout,
    NotFound,
    Validation,
    Ipfs,
    Io,
}

impl ErrorKind {
    /// Name printed by the CLI in front of the message
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Ipfs => "IPFSError",
            ErrorKind::Io => "IOError",
        }
    }

    /// Process exit code used by the CLI; 2 stays with clap's usage errors
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Ipfs => 1,
            ErrorKind::Connection => 7,
            ErrorKind::Timeout => 3,
            ErrorKind::NotFound => 4,
            ErrorKind::Validation => 5,
            ErrorKind::Io => 6,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IpfsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IpfsError::Connection(_) => ErrorKind::Connection,
            IpfsError::Timeout(_) => ErrorKind::Timeout,
            IpfsError::NotFound(_) => ErrorKind::NotFound,
            IpfsError::Validation(_) => ErrorKind::Validation,
            IpfsError::Remote { .. } => ErrorKind::Ipfs,
            IpfsError::Io(_) => ErrorKind::Io,
        }
    }

    /// Same kind, with `context` in front of the message
    pub fn with_context(self, context: impl fmt::Display) -> Self {
        match self {
            IpfsError::Connection(m) => IpfsError::Connection(format!("{}: {}", context, m)),
            IpfsError::Timeout(m) => IpfsError::Timeout(format!("{}: {}", context, m)),
            IpfsError::NotFound(m) => IpfsError::NotFound(format!("{}: {}", context, m)),
            IpfsError::Validation(m) => IpfsError::Validation(format!("{}: {}", context, m)),
            IpfsError::Remote { status, message } => IpfsError::Remote {
                status,
                message: format!("{}: {}", context, message),
            },
            IpfsError::Io(e) => IpfsError::Io(std::io::Error::new(e.kind(), format!("{}: {}", context, e))),
        }
    }

    /// Whether the retry policy may attempt the request again.
    ///
    /// Only transport-level failures qualify: unreachable endpoints, elapsed
    /// deadlines, and the overload/proxy statuses a node or its reverse proxy
    /// return while restarting.
    pub fn is_retryable(&self) -> bool {
        match self {
            IpfsError::Connection(_) | IpfsError::Timeout(_) => true,
            IpfsError::Remote { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for IpfsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IpfsError::Timeout(err.to_string())
        } else if err.is_builder() {
            IpfsError::Validation(err.to_string())
        } else {
            // connect, redirect, and body failures all mean the round trip never completed
            IpfsError::Connection(err.to_string())
        }
    }
}

impl From<config::ConfigError> for IpfsError {
    fn from(err: config::ConfigError) -> Self {
        IpfsError::Validation(format!("configuration: {}", err))
    }
}

impl From<url::ParseError> for IpfsError {
    fn from(err: url::ParseError) -> Self {
        IpfsError::Validation(format!("invalid URL: {}", err))
    }
}

impl From<serde_json::Error> for IpfsError {
    fn from(err: serde_json::Error) -> Self {
        IpfsError::Validation(format!("JSON: {}", err))
    }
}
