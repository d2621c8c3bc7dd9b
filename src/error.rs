//! Error taxonomy surfaced at the boundary of the call router (spec §7).
//!
//! Every other component classifies its own failures into one of the six
//! kinds below before it crosses a component boundary; nothing
//! implementation-internal (a transport error, an `io::Error`, a poisoned
//! lock) is ever handed to a caller directly.

use std::fmt;

use thiserror::Error;

/// Coarse error kind. Closed set, mirrors spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Syntactic/structural input errors (malformed handle, arg mismatch).
    InvalidArgument,
    /// Device, function, or provider absent.
    NotFound,
    /// Operation allowed only by state (mode gating, provider precondition).
    FailedPrecondition,
    /// Provider or device currently not usable.
    Unavailable,
    /// Exchange or readiness timeout.
    DeadlineExceeded,
    /// Protocol violation, serialization failure, unexpected process exit.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::FailedPrecondition => "FailedPrecondition",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::DeadlineExceeded => "DeadlineExceeded",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(s)
    }
}

/// A user-visible failure: coarse kind plus a human-readable message.
/// Never carries an implementation-internal type (spec §7, closing
/// paragraph).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        CoreError {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
