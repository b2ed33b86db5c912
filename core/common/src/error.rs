//! Common error types for cloudblob.
//!
//! Drivers classify provider errors into these variants at the driver
//! boundary. Everything above the driver passes them through untouched.

use std::fmt;

use thiserror::Error;

/// Boxed provider error carried by [`Error::Unknown`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for blob operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The key does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Read offset lies outside the object.
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// A write precondition (such as an ETag match) did not hold.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// The provider refused the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid input provided (malformed key, bad driver config).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A caller-supplied writer hook rejected the native request.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The operation was cancelled before it completed.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Opaque provider error.
    #[error("Unknown error: {message}")]
    Unknown {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

/// Discriminant of [`Error`], convenient for matching in tests and callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    InvalidRange,
    PreconditionFailed,
    PermissionDenied,
    InvalidInput,
    Config,
    AlreadyExists,
    Cancelled,
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::InvalidRange => "invalid_range",
            ErrorCode::PreconditionFailed => "precondition_failed",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::Config => "config",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Wrap an opaque provider error.
    pub fn unknown(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Error::Unknown {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::InvalidRange(_) => ErrorCode::InvalidRange,
            Error::PreconditionFailed(_) => ErrorCode::PreconditionFailed,
            Error::PermissionDenied(_) => ErrorCode::PermissionDenied,
            Error::InvalidInput(_) => ErrorCode::InvalidInput,
            Error::Config(_) => ErrorCode::Config,
            Error::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Error::Cancelled(_) => ErrorCode::Cancelled,
            Error::Unknown { .. } => ErrorCode::Unknown,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }

    /// Classify an I/O error raised while operating on `what`.
    pub fn from_io(err: std::io::Error, what: impl fmt::Display) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(what.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                Error::PermissionDenied(format!("{}: {}", what, err))
            }
            std::io::ErrorKind::AlreadyExists => {
                Error::AlreadyExists(what.to_string())
            }
            _ => Error::unknown(format!("I/O error on {}", what), err),
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
