//! Runtime error types.

use sprocket_core::TransportError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that stop the runtime from starting or end it abnormally.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The platform rejected the bot's credentials. No unit was loaded.
    #[error("Failed to log in through `{transport}`: {source}")]
    Authentication {
        transport: String,
        #[source]
        source: TransportError,
    },

    /// The transport ended with an error while running.
    #[error("Transport `{transport}` failed: {source}")]
    Transport {
        transport: String,
        #[source]
        source: TransportError,
    },

    /// The transport task panicked or was aborted.
    #[error("Transport task for `{0}` did not finish cleanly")]
    TransportTask(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
