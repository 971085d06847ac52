//! Unified error types for the Kestrel core crate.
//!
//! Plugin bodies report failures as [`BoxError`]; everything that touches the
//! outbound transport reports a [`TransportError`].

use thiserror::Error;

/// Boxed error type returned by plugin hooks and handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur when sending through a [`Transport`](crate::Transport).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The transport accepted the request but could not deliver it.
    #[error("failed to send message to {destination}: {reason}")]
    SendFailed {
        /// Destination chat identifier.
        destination: String,
        /// Reason for failure.
        reason: String,
    },

    /// The underlying connection is gone.
    #[error("transport closed: {reason}")]
    Closed {
        /// Reason for closure.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Anything else the transport wants to report.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Creates a send failure for `destination`.
    pub fn send_failed(destination: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            destination: destination.into(),
            reason: reason.into(),
        }
    }

    /// Creates a closed-connection error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
