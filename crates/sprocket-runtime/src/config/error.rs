//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

/// Why a configuration could not be loaded or was rejected.
///
/// `field` is the dotted path of the offending key, e.g. `bot.owner_id`.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// A file or environment value did not fit the schema.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("`{field}` must be set")]
    Missing { field: &'static str },

    #[error("`{field}` is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The token is still the one from the sample configuration.
    #[error("`bot.token` is still the sample placeholder; set the real bot token")]
    PlaceholderToken,
}

impl ConfigError {
    pub fn missing(field: &'static str) -> Self {
        Self::Missing { field }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// The dotted key this error is about, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Missing { field } | Self::Invalid { field, .. } => Some(*field),
            Self::PlaceholderToken => Some("bot.token"),
            Self::FileNotFound(_) | Self::Parse(_) => None,
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
