//! Configuration module for the Sprocket runtime.
//!
//! Layered loading (defaults, files, environment) via figment, the config
//! schema, and validation of bot credentials and logging settings.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, PROFILE_ENV, Profile, load_config, load_config_from_file};
pub use schema::{
    BotConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, SpanEventConfig,
    SprocketConfig,
};
pub use validation::{PLACEHOLDER_TOKEN, validate_config};
