//! Sprocket Runtime - configuration, logging and bootstrap for Sprocket bots.
//!
//! This crate provides:
//! - Layered configuration (`SprocketConfig`, `ConfigLoader`) on figment
//! - Logging setup on tracing-subscriber (`LoggingBuilder`)
//! - The runtime (`SprocketRuntime`): credential check, unit autoload, the
//!   request loop and graceful shutdown
//!
//! ```ignore
//! use sprocket_runtime::SprocketRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     SprocketRuntime::new()?
//!         .unit(fun::definition())
//!         .run(Arc::new(MyTransport::connect().await?))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{BotConfig, ConfigError, ConfigLoader, ConfigResult, LoggingConfig, SprocketConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{RuntimeBuilder, SprocketRuntime};

// Re-export tracing for use by units
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for unit authors.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
