//! Error taxonomy for keyring operations.
//!
//! Every failure a caller can observe is a [`KeyringError`]. Errors coming
//! out of the kernel facility keep their raw errno inside a
//! [`FacilityError`] so callers can still match on the underlying code.

use thiserror::Error;

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, KeyringError>;

/// Errors returned by the keyring handle and the keyring actor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyringError {
    /// The actor thread could not be started or the session keyring could
    /// not be joined. The actor never reaches `Running`.
    #[error("keyring creation failed: {0}")]
    CreationFailed(FacilityError),

    /// The name has no resolvable key instance in the keyring.
    #[error("key not found: {0}")]
    NotFound(String),

    /// Any other failure reported by the kernel facility.
    #[error("keyring facility error: {0}")]
    Facility(#[from] FacilityError),

    /// The request was submitted after the actor was stopped.
    #[error("keyring actor has shut down")]
    Shutdown,
}

impl KeyringError {
    /// Raw errno carried by the error, if the kernel reported one.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::CreationFailed(e) | Self::Facility(e) => e.errno(),
            Self::NotFound(_) | Self::Shutdown => None,
        }
    }
}

/// A failed call into the kernel keyring facility.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{op}: {message}")]
pub struct FacilityError {
    op: &'static str,
    errno: Option<i32>,
    message: String,
}

impl FacilityError {
    /// Build an error from a raw errno value.
    pub fn from_errno(op: &'static str, errno: i32) -> Self {
        Self {
            op,
            errno: Some(errno),
            message: std::io::Error::from_raw_os_error(errno).to_string(),
        }
    }

    /// Capture the calling thread's current errno.
    pub fn last_os_error(op: &'static str) -> Self {
        Self::from_io(op, &std::io::Error::last_os_error())
    }

    /// Convert an I/O error, keeping its raw OS code when present.
    pub fn from_io(op: &'static str, err: &std::io::Error) -> Self {
        Self {
            op,
            errno: err.raw_os_error(),
            message: err.to_string(),
        }
    }

    /// Data returned by the facility could not be interpreted.
    pub fn malformed(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            errno: None,
            message: format!("malformed response: {}", message.into()),
        }
    }

    /// An unexpected failure inside the actor, such as a caught panic.
    pub fn internal(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            errno: None,
            message: message.into(),
        }
    }

    /// Name of the facility operation that failed.
    pub fn op(&self) -> &'static str {
        self.op
    }

    /// Raw errno, if the failure came from the kernel.
    pub fn errno(&self) -> Option<i32> {
        self.errno
    }

    /// Human-readable description of the failure.
    pub fn message(&self) -> &str {
        &self.message
    }
}
