//! Error types shared across the workspace.

use thiserror::Error;

/// Error type for download operations.
///
/// One variant per failure class; everything the engine, the session, and
/// the extractors can report funnels through here.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Connect/read/write failure talking to a server.
    #[error("network failure: {message}")]
    Network {
        /// Detailed error message.
        message: String,
    },

    /// Malformed response, header, wire message, or Metalink metadata.
    #[error("protocol error: {message}")]
    Protocol {
        /// Detailed error message.
        message: String,
    },

    /// A digest did not match the downloaded bytes.
    #[error("integrity failure: expected {expected}, got {actual}")]
    Integrity {
        /// Expected digest (hex).
        expected: String,
        /// Actual digest computed (hex).
        actual: String,
    },

    /// Open/seek/write/mkdir failure on local storage.
    #[error("filesystem error ({kind}): {message}")]
    Filesystem {
        /// The kind of I/O error (e.g. "NotFound", "PermissionDenied").
        kind: String,
        /// Detailed error message.
        message: String,
    },

    /// Impossible option combination; terminates startup.
    #[error("configuration error: {message}")]
    Config {
        /// Detailed error message.
        message: String,
    },
}

impl Error {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an integrity error from the two digests.
    pub fn integrity(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::Integrity {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a filesystem error from a `std::io::Error`.
    #[must_use]
    pub fn from_io(err: &std::io::Error) -> Self {
        Self::Filesystem {
            kind: format!("{:?}", err.kind()),
            message: err.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation could succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Filesystem { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(&err)
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, Error>;
