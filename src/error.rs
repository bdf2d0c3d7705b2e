//! Error types for Kling client operations.
//!
//! [`Error`] is the single error type surfaced by the client facade. Each
//! variant keeps the context needed to decide what to do next (status code,
//! task ID, attempt count) instead of flattening everything into a string.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the Kling client.
///
/// # Examples
///
/// ```
/// use kling::Error;
///
/// let err = Error::NotFound { task_id: "task-1".to_string() };
/// assert!(!err.is_retryable());
/// assert_eq!(err.status_code(), Some(404));
/// assert_eq!(err.to_string(), "task not found: task-1");
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// A request failed local schema validation and was never sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The network call failed (connection, timeout, I/O) after all retries.
    #[error("transport error after {attempts} attempt(s): {message}")]
    Transport {
        /// Classification of the underlying failure.
        kind: TransportErrorKind,
        /// Human-readable description from the HTTP stack.
        message: String,
        /// Number of attempts made, including the first one.
        attempts: u32,
    },

    /// The server rejected the call with a non-success response.
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code of the response.
        status: u16,
        /// Application-level error code from the body, if present.
        code: Option<i64>,
        /// Server-provided message.
        message: String,
        /// Request ID echoed by the server, if present.
        request_id: Option<String>,
    },

    /// The server does not know the queried task.
    #[error("task not found: {task_id}")]
    NotFound {
        /// The unknown task ID.
        task_id: String,
    },

    /// A response or payload from the server did not match its schema.
    #[error("invalid response: {0}")]
    InvalidResponse(ValidationError),

    /// A waited-on task reached the `failed` state.
    #[error("task {task_id} failed: {message}")]
    TaskFailed {
        /// The failed task.
        task_id: String,
        /// Failure detail reported by the server.
        message: String,
    },

    /// A task did not reach a terminal state within the wait budget.
    #[error("timed out after {waited:?} waiting for task {task_id}")]
    WaitTimeout {
        /// The task being waited on.
        task_id: String,
        /// Total time spent polling.
        waited: Duration,
    },

    /// A callback signature was missing or did not verify.
    #[error("callback signature rejected: {0}")]
    Signature(String),

    /// Client configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns `true` if the transport retry policy may retry this error.
    ///
    /// Network failures (other than malformed requests) and HTTP 5xx
    /// responses are transient. Everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { kind, .. } => kind.is_retryable(),
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status code associated with this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(404),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("TOML parse error: {err}"))
    }
}

/// Classification of network-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The connection could not be established.
    Connect,
    /// The request did not complete within its timeout.
    Timeout,
    /// The request failed mid-flight (I/O, body, protocol).
    Request,
    /// The request could not be built (bad URL, bad header). Not retried.
    Builder,
}

impl TransportErrorKind {
    /// Returns `true` for transient failure kinds.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Builder)
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Timeout => write!(f, "timeout"),
            Self::Request => write!(f, "request"),
            Self::Builder => write!(f, "builder"),
        }
    }
}

/// One schema violation: where it happened and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    /// Dotted field path, e.g. `camera_control.config.zoom` or `image_list[1]`.
    pub path: String,
    /// Human-readable cause.
    pub cause: String,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`: {}", self.path, self.cause)
    }
}

/// Schema validation failure carrying every violated field.
///
/// The first issue is the headline reported by [`path`](Self::path) and
/// [`cause`](Self::cause); the rest are kept for callers that want the full
/// picture.
///
/// # Examples
///
/// ```
/// use kling::ValidationError;
///
/// let err = ValidationError::new("prompt", "must not be empty");
/// assert_eq!(err.path(), "prompt");
/// assert_eq!(err.to_string(), "validation failed at `prompt`: must not be empty");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    issues: Vec<FieldIssue>,
}

impl ValidationError {
    /// Creates an error with a single issue.
    pub fn new(path: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            issues: vec![FieldIssue {
                path: path.into(),
                cause: cause.into(),
            }],
        }
    }

    /// Builds an error from collected issues. Returns `None` if there are none.
    pub fn from_issues(issues: Vec<FieldIssue>) -> Option<Self> {
        if issues.is_empty() {
            None
        } else {
            Some(Self { issues })
        }
    }

    /// Path of the first violated field.
    pub fn path(&self) -> &str {
        self.issues.first().map_or("", |i| i.path.as_str())
    }

    /// Cause of the first violation.
    pub fn cause(&self) -> &str {
        self.issues.first().map_or("", |i| i.cause.as_str())
    }

    /// All issues, in the order they were found.
    pub fn issues(&self) -> &[FieldIssue] {
        &self.issues
    }

    /// Returns `true` if any issue is reported for `path`.
    pub fn has_issue_at(&self, path: &str) -> bool {
        self.issues.iter().any(|i| i.path == path)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed at `{}`: {}", self.path(), self.cause())?;
        if self.issues.len() > 1 {
            write!(f, " (and {} more)", self.issues.len() - 1)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}
