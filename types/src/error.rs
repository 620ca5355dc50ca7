//! Normalized error shape shared by every Quarry component.
//!
//! Failures reach this crate from many places: handler code returning
//! `anyhow::Error`, remote-call wrappers, timeouts and cancellations raised
//! by the runtime itself. [`TaskError`] is the single shape they all collapse
//! into, so schedulers and callers can classify and persist failures without
//! knowing what produced them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure classification taxonomy.
///
/// `Timeout` and `Aborted` are raised by the runtime; `RateLimited` is
/// assigned by callers whose remote service throttled them. Anything else a
/// caller wants to tag travels as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    /// The attempt exceeded its configured time budget.
    Timeout,
    /// Execution was cancelled before or during an attempt.
    Aborted,
    /// The upstream service throttled the caller.
    RateLimited,
    /// Caller-defined code, preserved verbatim.
    Other(String),
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::Timeout => "timeout",
            ErrorCode::Aborted => "aborted",
            ErrorCode::RateLimited => "rate-limited",
            ErrorCode::Other(code) => code,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ErrorCode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "timeout" => ErrorCode::Timeout,
            "aborted" => ErrorCode::Aborted,
            "rate-limited" => ErrorCode::RateLimited,
            _ => ErrorCode::Other(value),
        }
    }
}

impl From<ErrorCode> for String {
    fn from(value: ErrorCode) -> Self {
        value.as_str().to_string()
    }
}

/// A failure normalized to a uniform shape: a non-empty message, an optional
/// [`ErrorCode`], and optional structured details.
///
/// This is the only error type the execution core surfaces. It implements
/// [`std::error::Error`], so it can travel back through `anyhow` chains and
/// be recovered unchanged by [`TaskError::normalize`].
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Fallback fields applied by [`TaskError::normalize_with`] when the input
/// carries no usable message or details of its own.
#[derive(Debug, Clone, Default)]
pub struct Fallback {
    pub message: Option<String>,
    pub details: Option<Value>,
}

const UNKNOWN_ERROR_MESSAGE: &str = "unknown error";

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            UNKNOWN_ERROR_MESSAGE.to_string()
        } else {
            message
        };
        Self {
            message,
            code: None,
            details: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(message).with_code(ErrorCode::Timeout)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(message).with_code(ErrorCode::Aborted)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(message).with_code(ErrorCode::RateLimited)
    }

    #[must_use]
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.code == Some(ErrorCode::Timeout)
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.code == Some(ErrorCode::Aborted)
    }

    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.code == Some(ErrorCode::RateLimited)
    }

    /// Normalize an arbitrary failure into a [`TaskError`].
    ///
    /// Shorthand for [`TaskError::normalize_with`] with no fallback.
    #[must_use]
    pub fn normalize(err: &anyhow::Error) -> Self {
        Self::normalize_with(err, &Fallback::default())
    }

    /// Normalize an arbitrary failure into a [`TaskError`], in precedence
    /// order:
    ///
    /// 1. If any error in the chain is already a `TaskError`, it is returned
    ///    unchanged — message, code, and details survive a round trip through
    ///    `anyhow` intact.
    /// 2. Otherwise the display message of the outermost error is used; a
    ///    blank message falls back to `fallback.message`, then to a generic
    ///    "unknown error".
    /// 3. `details` come from the fallback when supplied, else the full
    ///    formatted error chain.
    ///
    /// Pure: no logging, no side effects.
    #[must_use]
    pub fn normalize_with(err: &anyhow::Error, fallback: &Fallback) -> Self {
        for cause in err.chain() {
            if let Some(task_error) = cause.downcast_ref::<TaskError>() {
                return task_error.clone();
            }
        }

        let message = err.to_string();
        let message = if message.trim().is_empty() {
            fallback
                .message
                .clone()
                .unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_string())
        } else {
            message
        };

        let details = fallback
            .details
            .clone()
            .unwrap_or_else(|| Value::String(format!("{err:#}")));

        Self {
            message,
            code: None,
            details: Some(details),
        }
    }
}
