//! Error classification and rendering.
//!
//! # Responsibilities
//! - Map transport statuses and generic failures onto one canonical taxonomy
//! - Decide which kinds are worth retrying
//! - Render diagnostics for logs and wire-safe statuses for callers
//!
//! # Design Decisions
//! - Classification never depends on error message text
//! - Wire statuses carry the canonical description only, never source chains

use std::io;

use thiserror::Error;
use tonic::{Code, Status};

/// Canonical error kind, independent of the transport that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

/// Coarse handling category for an [`ErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad caller input; recovered locally.
    ValidationFailure,
    /// Downstream hiccup; retried or answered by local fallback.
    TransientDownstream,
    /// Downstream answered definitively; surfaced unchanged.
    TerminalDownstream,
    /// Unexpected fault inside this node.
    InternalFault,
}

impl ErrorKind {
    /// Whether a failure of this kind is worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Unavailable
                | ErrorKind::DeadlineExceeded
                | ErrorKind::ResourceExhausted
                | ErrorKind::Internal
        )
    }

    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorKind::OutOfRange => ErrorCategory::ValidationFailure,
            ErrorKind::Unavailable
            | ErrorKind::DeadlineExceeded
            | ErrorKind::ResourceExhausted
            | ErrorKind::Internal => ErrorCategory::TransientDownstream,
            ErrorKind::DataLoss | ErrorKind::Unknown => ErrorCategory::InternalFault,
            _ => ErrorCategory::TerminalDownstream,
        }
    }

    /// Human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            ErrorKind::Cancelled => "Operation cancelled",
            ErrorKind::Unknown => "Unknown error",
            ErrorKind::InvalidArgument => "Invalid request parameters",
            ErrorKind::DeadlineExceeded => "Request timeout",
            ErrorKind::NotFound => "Resource not found",
            ErrorKind::AlreadyExists => "Resource already exists",
            ErrorKind::PermissionDenied => "Permission denied",
            ErrorKind::ResourceExhausted => "Resource exhausted",
            ErrorKind::FailedPrecondition => "Precondition failed",
            ErrorKind::Aborted => "Operation aborted",
            ErrorKind::OutOfRange => "Out of range",
            ErrorKind::Unimplemented => "Not implemented",
            ErrorKind::Internal => "Internal server error",
            ErrorKind::Unavailable => "Service unavailable",
            ErrorKind::DataLoss => "Data loss",
            ErrorKind::Unauthenticated => "Authentication required",
        }
    }

    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unknown => "unknown",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::FailedPrecondition => "failed_precondition",
            ErrorKind::Aborted => "aborted",
            ErrorKind::OutOfRange => "out_of_range",
            ErrorKind::Unimplemented => "unimplemented",
            ErrorKind::Internal => "internal",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::DataLoss => "data_loss",
            ErrorKind::Unauthenticated => "unauthenticated",
        }
    }

    pub fn code(self) -> Code {
        match self {
            ErrorKind::Cancelled => Code::Cancelled,
            ErrorKind::Unknown => Code::Unknown,
            ErrorKind::InvalidArgument => Code::InvalidArgument,
            ErrorKind::DeadlineExceeded => Code::DeadlineExceeded,
            ErrorKind::NotFound => Code::NotFound,
            ErrorKind::AlreadyExists => Code::AlreadyExists,
            ErrorKind::PermissionDenied => Code::PermissionDenied,
            ErrorKind::ResourceExhausted => Code::ResourceExhausted,
            ErrorKind::FailedPrecondition => Code::FailedPrecondition,
            ErrorKind::Aborted => Code::Aborted,
            ErrorKind::OutOfRange => Code::OutOfRange,
            ErrorKind::Unimplemented => Code::Unimplemented,
            ErrorKind::Internal => Code::Internal,
            ErrorKind::Unavailable => Code::Unavailable,
            ErrorKind::DataLoss => Code::DataLoss,
            ErrorKind::Unauthenticated => Code::Unauthenticated,
        }
    }

    pub fn from_code(code: Code) -> Self {
        match code {
            // An OK status is never a failure; treat a stray one as unknown.
            Code::Ok | Code::Unknown => ErrorKind::Unknown,
            Code::Cancelled => ErrorKind::Cancelled,
            Code::InvalidArgument => ErrorKind::InvalidArgument,
            Code::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Code::NotFound => ErrorKind::NotFound,
            Code::AlreadyExists => ErrorKind::AlreadyExists,
            Code::PermissionDenied => ErrorKind::PermissionDenied,
            Code::ResourceExhausted => ErrorKind::ResourceExhausted,
            Code::FailedPrecondition => ErrorKind::FailedPrecondition,
            Code::Aborted => ErrorKind::Aborted,
            Code::OutOfRange => ErrorKind::OutOfRange,
            Code::Unimplemented => ErrorKind::Unimplemented,
            Code::Internal => ErrorKind::Internal,
            Code::Unavailable => ErrorKind::Unavailable,
            Code::DataLoss => ErrorKind::DataLoss,
            Code::Unauthenticated => ErrorKind::Unauthenticated,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can be placed in the canonical taxonomy.
pub trait Classify {
    fn kind(&self) -> ErrorKind;

    /// Detail text for logs.
    fn detail(&self) -> String;
}

impl Classify for Status {
    fn kind(&self) -> ErrorKind {
        ErrorKind::from_code(self.code())
    }

    fn detail(&self) -> String {
        self.message().to_string()
    }
}

impl Classify for io::Error {
    fn kind(&self) -> ErrorKind {
        match io::Error::kind(self) {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::AddrNotAvailable => ErrorKind::Unavailable,
            io::ErrorKind::TimedOut => ErrorKind::DeadlineExceeded,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
                ErrorKind::InvalidArgument
            }
            io::ErrorKind::Interrupted => ErrorKind::Cancelled,
            _ => ErrorKind::Unknown,
        }
    }

    fn detail(&self) -> String {
        self.to_string()
    }
}

impl Classify for tonic::transport::Error {
    fn kind(&self) -> ErrorKind {
        // Walk the source chain for an I/O cause; anything else means the
        // channel could not be established.
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            if let Some(io) = err.downcast_ref::<io::Error>() {
                return Classify::kind(io);
            }
            source = err.source();
        }
        ErrorKind::Unavailable
    }

    fn detail(&self) -> String {
        self.to_string()
    }
}

/// Failures produced while serving a call.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("downstream status: {0}")]
    Status(#[from] Status),
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("internal fault: {0}")]
    Internal(String),
}

impl Classify for RelayError {
    fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Status(status) => status.kind(),
            RelayError::Transport(err) => err.kind(),
            RelayError::Io(err) => Classify::kind(err),
            RelayError::Timeout(_) => ErrorKind::DeadlineExceeded,
            RelayError::Validation(_) => ErrorKind::InvalidArgument,
            RelayError::Internal(_) => ErrorKind::Internal,
        }
    }

    fn detail(&self) -> String {
        match self {
            RelayError::Status(status) => status.detail(),
            other => other.to_string(),
        }
    }
}

impl RelayError {
    /// Status to put on the wire for this error.
    ///
    /// Downstream statuses pass through unchanged; local failures are reduced
    /// to their canonical code and description.
    pub fn to_status(&self) -> Status {
        match self {
            RelayError::Status(status) => status.clone(),
            other => {
                let kind = other.kind();
                Status::new(kind.code(), kind.description())
            }
        }
    }
}

/// Classify any supported failure.
pub fn classify<E: Classify + ?Sized>(error: &E) -> ErrorKind {
    error.kind()
}

/// Render a one-line diagnostic for logs.
pub fn format<E: Classify + ?Sized>(error: &E, request_id: &str) -> String {
    let kind = error.kind();
    let detail = error.detail();
    if detail.is_empty() {
        format!("[{}] {}", request_id, kind.description())
    } else {
        format!("[{}] {}: {}", request_id, kind.description(), detail)
    }
}
