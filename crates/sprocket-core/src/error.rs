//! Error types shared by every Sprocket layer.
//!
//! Framework-level errors (lifecycle, dispatch) are defined in
//! `sprocket-framework`; this module only holds the faults that originate in
//! the reply slot and the transport.

use thiserror::Error;

// =============================================================================
// Channel Errors
// =============================================================================

/// Faults raised by a [`ResponseChannel`](crate::channel::ResponseChannel).
///
/// These are programming or timing faults: they are reported to the caller and
/// logged, but never bring the process down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// A second initial acknowledgment was attempted.
    #[error("interaction has already been acknowledged")]
    DoubleAck,

    /// The platform-imposed reply window has elapsed.
    #[error("interaction has expired and can no longer be answered")]
    Expired,

    /// A followup was attempted before the initial acknowledgment.
    #[error("interaction must be acknowledged before sending a followup")]
    NotAcknowledged,

    /// The channel was closed by the dispatcher.
    #[error("response channel is closed")]
    Closed,

    /// The reply sink failed to deliver the message.
    #[error("failed to deliver reply: {0}")]
    Delivery(String),
}

impl ChannelError {
    /// Creates a delivery error.
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised by an inbound [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The platform rejected the configured credentials.
    #[error("invalid credentials: {reason}")]
    InvalidCredentials {
        /// Reason reported by the platform.
        reason: String,
    },

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection was closed by the remote side.
    #[error("connection closed: {reason}")]
    Closed {
        /// Reason for closure.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Returns `true` when startup must be aborted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidCredentials { .. })
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for response-channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
