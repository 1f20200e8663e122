//! Task failure values and their classification.
//!
//! Work closures fail with a `TaskError`. The executor retries every failure
//! until the task's budget runs out, unless the work itself marked the error
//! permanent with `TaskError::permanent`. The `ErrorKind` parsed from the
//! message only feeds the rate limiter; it never decides whether to retry.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse category of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Upstream throttled the request
    RateLimit,
    /// The attempt exceeded its deadline
    Timeout,
    /// Connection-level trouble
    Network,
    /// Upstream is down or overloaded
    ServiceUnavailable,
    /// Credentials or permissions were rejected
    Auth,
    /// Account quota is used up
    QuotaExceeded,
    /// Request was malformed or referenced something that does not exist
    InvalidRequest,
    /// Content was refused by a safety filter
    ContentPolicy,
    /// The work panicked
    Panicked,
    /// The task never ran because a dependency cannot complete
    DependencyUnavailable,
    Unknown,
}

/// Case-insensitive substrings, checked in order.
const PATTERNS: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::ContentPolicy,
        &[
            "data_inspection_failed",
            "content safety",
            "content policy",
            "inappropriate content",
            "content filter",
            "safety filter",
        ],
    ),
    (
        ErrorKind::RateLimit,
        &[
            "rate limit",
            "rate_limit",
            "ratelimit",
            "too many requests",
            "429",
            "requests per minute",
            "requests per second",
            "throttled",
            "concurrent limit",
            "too many concurrent",
        ],
    ),
    (
        ErrorKind::QuotaExceeded,
        &["quota exceeded", "insufficient quota", "quota_exceeded", "usage limit"],
    ),
    (
        ErrorKind::Auth,
        &[
            "invalid api key",
            "api key",
            "unauthorized",
            "authentication",
            "invalid credentials",
            "access denied",
            "permission denied",
            "forbidden",
        ],
    ),
    (
        ErrorKind::Timeout,
        &["timeout", "timed out", "deadline exceeded"],
    ),
    (
        ErrorKind::ServiceUnavailable,
        &[
            "service unavailable",
            "temporarily unavailable",
            "internal server error",
            "server error",
            "maintenance",
            "resource exhausted",
            "overloaded",
        ],
    ),
    (
        ErrorKind::Network,
        &[
            "network",
            "connection refused",
            "connection reset",
            "connection error",
            "connection failed",
            "dns",
        ],
    ),
    (
        ErrorKind::InvalidRequest,
        &[
            "bad request",
            "invalid request",
            "malformed request",
            "invalid parameter",
            "model not found",
            "model does not exist",
        ],
    ),
];

impl ErrorKind {
    /// Classify a free-form error message.
    pub fn classify(message: &str) -> ErrorKind {
        let lower = message.to_lowercase();
        PATTERNS
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
            .map(|(kind, _)| *kind)
            .unwrap_or(ErrorKind::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Auth => "auth",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::ContentPolicy => "content_policy",
            ErrorKind::Panicked => "panicked",
            ErrorKind::DependencyUnavailable => "dependency_unavailable",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error produced by a single task attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    /// Set by the work to stop further attempts.
    #[serde(default)]
    pub permanent: bool,
}

impl TaskError {
    /// Create an error, classifying it from its message.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::classify(&message),
            message,
            permanent: false,
        }
    }

    /// Create an error with an explicit kind.
    pub fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            permanent: false,
        }
    }

    /// An error that ends the task without using its remaining retries.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(message).into_permanent()
    }

    pub fn into_permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    /// The attempt ran past its deadline.
    pub fn timeout(after: Duration) -> Self {
        Self::with_kind(ErrorKind::Timeout, format!("Attempt timed out after {:?}", after))
    }

    /// The work panicked.
    pub fn panicked(detail: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Panicked, format!("Task panicked: {}", detail.into()))
    }

    /// The task never ran because a dependency cannot complete.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::DependencyUnavailable, reason)
    }

    pub fn is_retryable(&self) -> bool {
        !self.permanent
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        TaskError::new(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        TaskError::new(message)
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match err.kind() {
            Io::TimedOut => ErrorKind::Timeout,
            Io::ConnectionRefused | Io::ConnectionReset | Io::ConnectionAborted | Io::NotConnected => {
                ErrorKind::Network
            }
            _ => ErrorKind::classify(&err.to_string()),
        };
        TaskError::with_kind(kind, err.to_string())
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::with_kind(ErrorKind::InvalidRequest, err.to_string())
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for TaskError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        TaskError::new(err.to_string())
    }
}
