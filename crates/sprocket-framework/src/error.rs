//! Error taxonomy for the Sprocket framework.
//!
//! Every failure that can reach a requester is a [`DispatchError`]. The
//! dispatcher turns it into exactly one human-readable private message via
//! [`DispatchError::user_message`]; everything else goes to the logs.

use std::any::Any;
use std::fmt;

use thiserror::Error;
use tower::BoxError;

pub use sprocket_core::error::{ChannelError, TransportError};

/// Generic message shown for any handler-internal fault.
pub const GENERIC_FAILURE: &str = "Something went wrong while running this command.";

// =============================================================================
// Registry Errors
// =============================================================================

/// Raised when a batch of commands cannot be committed to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The name is already owned by another unit.
    #[error("command '{command}' is already registered by unit '{owner}'")]
    Conflict { command: String, owner: String },

    /// The same name appears twice in one batch.
    #[error("command '{0}' is declared more than once")]
    Duplicate(String),
}

// =============================================================================
// Lifecycle Errors
// =============================================================================

/// Errors raised by the [`LifecycleManager`](crate::lifecycle::LifecycleManager).
///
/// The display text is shown verbatim to the operator who issued the
/// lifecycle command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Unit `{0}` is already loaded.")]
    AlreadyLoaded(String),

    #[error("Unit `{0}` is not loaded.")]
    NotLoaded(String),

    #[error("Unit `{0}` not found.")]
    NotFound(String),

    /// The unit failed to initialise; it is left unloaded with no commands
    /// visible.
    #[error("Failed to load unit `{name}`: {cause}")]
    LoadFailed { name: String, cause: String },

    /// A reload unloaded the unit but could not load it back.
    #[error("Unit `{name}` was unloaded but failed to load again: {cause}")]
    ReloadLeftUnloaded { name: String, cause: String },

    /// The hosting unit cannot unload itself.
    #[error("Unit `{0}` hosts the lifecycle commands and cannot unload itself.")]
    SelfUnloadRefused(String),
}

impl LifecycleError {
    /// Creates a load failure from any displayable cause.
    pub fn load_failed(name: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::LoadFailed {
            name: name.into(),
            cause: cause.to_string(),
        }
    }

    /// Name of the unit the error refers to.
    pub fn unit(&self) -> &str {
        match self {
            Self::AlreadyLoaded(name)
            | Self::NotLoaded(name)
            | Self::NotFound(name)
            | Self::SelfUnloadRefused(name)
            | Self::LoadFailed { name, .. }
            | Self::ReloadLeftUnloaded { name, .. } => name,
        }
    }
}

// =============================================================================
// Handler Errors
// =============================================================================

/// Errors a [`CommandHandler`](crate::handler::CommandHandler) may return.
///
/// `From` conversions let handlers use `?` on channel and lifecycle calls.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// A message the handler chose to show the requester.
    #[error("{0}")]
    User(String),

    /// Any other fault; the requester only sees the generic message.
    #[error("internal error: {0}")]
    Internal(BoxError),
}

impl HandlerError {
    /// Creates a user-facing error.
    pub fn user(msg: impl Into<String>) -> Self {
        Self::User(msg.into())
    }

    /// Wraps an arbitrary error as internal.
    pub fn internal(err: impl Into<BoxError>) -> Self {
        Self::Internal(err.into())
    }
}

/// Result type for command handlers.
pub type HandlerResult = Result<(), HandlerError>;

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Every way a single request can end without normal completion.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error(transparent)]
    Lifecycle(LifecycleError),

    #[error(transparent)]
    Channel(ChannelError),

    #[error("{0}")]
    User(String),

    #[error("handler failed: {0}")]
    Internal(BoxError),

    #[error("handler panicked: {0}")]
    Panicked(String),

    /// The handler returned without leaving the requester any visible reply.
    #[error("handler completed without a response")]
    NoResponse,
}

impl From<HandlerError> for DispatchError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Channel(e) => Self::Channel(e),
            HandlerError::Lifecycle(e) => Self::Lifecycle(e),
            HandlerError::User(msg) => Self::User(msg),
            HandlerError::Internal(e) => Self::Internal(e),
        }
    }
}

impl DispatchError {
    /// Classifies this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Unauthorized { .. } => FailureKind::Unauthorized,
            Self::UnknownCommand(_) => FailureKind::UnknownCommand,
            Self::Lifecycle(_) => FailureKind::Lifecycle,
            Self::Channel(_) => FailureKind::Channel,
            Self::User(_) => FailureKind::User,
            Self::Internal(_) | Self::Panicked(_) | Self::NoResponse => FailureKind::Internal,
        }
    }

    /// The single message the requester sees for this failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthorized { reason } => reason.clone(),
            Self::UnknownCommand(name) => format!("Unknown command `{name}`."),
            Self::Lifecycle(e) => e.to_string(),
            Self::Channel(ChannelError::Expired) => {
                "This interaction took too long and has expired.".to_string()
            }
            Self::Channel(_) => "The reply to this command could not be delivered.".to_string(),
            Self::User(msg) => msg.clone(),
            Self::Internal(_) | Self::Panicked(_) | Self::NoResponse => GENERIC_FAILURE.to_string(),
        }
    }
}

/// Coarse classification of a failed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Unauthorized,
    UnknownCommand,
    Lifecycle,
    Channel,
    User,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unauthorized => "unauthorized",
            Self::UnknownCommand => "unknown_command",
            Self::Lifecycle => "lifecycle",
            Self::Channel => "channel",
            Self::User => "user",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Extracts the message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_detail_never_reaches_the_user() {
        let err = DispatchError::from(HandlerError::internal("db password is hunter2"));
        assert_eq!(err.kind(), FailureKind::Internal);
        assert_eq!(err.user_message(), GENERIC_FAILURE);
        assert!(err.to_string().contains("hunter2"));

        assert_eq!(
            DispatchError::Panicked("boom".into()).user_message(),
            GENERIC_FAILURE
        );
        assert_eq!(DispatchError::NoResponse.user_message(), GENERIC_FAILURE);
    }

    #[test]
    fn lifecycle_errors_are_verbatim() {
        let err = DispatchError::from(HandlerError::from(LifecycleError::NotFound("fun".into())));
        assert_eq!(err.kind(), FailureKind::Lifecycle);
        assert_eq!(err.user_message(), "Unit `fun` not found.");
    }

    #[test]
    fn unit_name_is_recoverable() {
        let err = LifecycleError::load_failed("music", "missing token");
        assert_eq!(err.unit(), "music");
        assert_eq!(
            err.to_string(),
            "Failed to load unit `music`: missing token"
        );
    }
}
