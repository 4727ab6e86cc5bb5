//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. The set
//! of error kinds is closed: every failure that can cross the rendezvous
//! boundary maps to exactly one [`ErrorKind`], and the waiter reconstructs
//! an [`Error`] of the matching kind from the serialized failure record.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable tag identifying an error kind inside a serialized failure record.
///
/// The wire rendering (SCREAMING_SNAKE_CASE) must not change between
/// releases; producer and consumer of a completion envelope may be
/// different binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The waiter's deadline elapsed before a completion arrived.
    Timeout,
    /// The waiter's cancel signal fired.
    Cancelled,
    /// The handler exhausted its retry budget.
    HandlerFailed,
    /// Payload or envelope encoding/decoding failed.
    SerializationFailed,
    /// Store or pub/sub failure that survived internal retries.
    CoordinatorInternal,
    /// Caller-side validation failure.
    InvalidArgument,
    /// The referenced task does not exist (never created, or cleaned up).
    NotFound,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::HandlerFailed => "HANDLER_FAILED",
            ErrorKind::SerializationFailed => "SERIALIZATION_FAILED",
            ErrorKind::CoordinatorInternal => "COORDINATOR_INTERNAL",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::NotFound => "NOT_FOUND",
        };
        write!(f, "{}", s)
    }
}

/// Main error enum for the courier runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// A wait deadline elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A wait was cancelled by the caller's cancel signal.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The user handler failed on every attempt.
    #[error("handler failed: {0}")]
    HandlerFailed(String),

    /// Encoding or decoding of a payload or envelope failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// The coordinator's store or pub/sub channel failed.
    #[error("coordinator internal error: {0}")]
    CoordinatorInternal(String),

    /// Validation failure at an API boundary (caller bug).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced task id is unknown.
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// The closed-set kind tag for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::HandlerFailed(_) => ErrorKind::HandlerFailed,
            Error::SerializationFailed(_) => ErrorKind::SerializationFailed,
            Error::CoordinatorInternal(_) => ErrorKind::CoordinatorInternal,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Build an error of the given kind carrying `message`.
    ///
    /// Used on the waiter side to reconstruct a failure recorded on a
    /// worker. The original remote call stack is not re-executed; only the
    /// kind and message survive the wire.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Timeout => Error::Timeout(message),
            ErrorKind::Cancelled => Error::Cancelled(message),
            ErrorKind::HandlerFailed => Error::HandlerFailed(message),
            ErrorKind::SerializationFailed => Error::SerializationFailed(message),
            ErrorKind::CoordinatorInternal => Error::CoordinatorInternal(message),
            ErrorKind::InvalidArgument => Error::InvalidArgument(message),
            ErrorKind::NotFound => Error::NotFound(message),
        }
    }
}

// Convenience constructors
impl Error {
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn handler_failed(msg: impl Into<String>) -> Self {
        Self::HandlerFailed(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationFailed(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::CoordinatorInternal(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationFailed(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Error::SerializationFailed(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Error::SerializationFailed(err.to_string())
    }
}
