//! # Sprocket
//!
//! A command framework for chat bots whose command groups ("units") can be
//! loaded, unloaded and reloaded while the bot is running.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐     ┌────────────┐     ┌──────────────────┐     ┌─────────┐
//! │ Transport │────▶│ Dispatcher │────▶│ AuthorizationGate│────▶│ Handler │
//! └───────────┘     └────────────┘     └──────────────────┘     └─────────┘
//!                         │ lookup                                   ▲
//!                         ▼                                          │ registers
//!                  HandlerRegistry ◀──── LifecycleManager ──── Unit (load / unload / reload)
//! ```
//!
//! - **Runtime**: loads configuration, logs in, autoloads units, runs the request loop
//! - **Transport**: turns platform interactions into requests and delivers replies
//! - **Units**: groups of commands with their own lifecycle and config section
//! - **Response channel**: enforces acknowledge-once, the acknowledgment deadline
//!   and the followup window
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sprocket::prelude::*;
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Unit for Greeter {
//!     async fn register(&self, registrar: &mut Registrar) -> Result<(), BoxError> {
//!         registrar.command(Command::from_fn("hello", |request, channel| async move {
//!             let name = request.identity().display_name.clone();
//!             channel.reply(format!("Hello, {name}!"), Visibility::Public).await?;
//!             Ok(())
//!         }));
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     SprocketRuntime::new()?
//!         .unit(UnitDefinition::new("greeter", |_| Ok(Greeter)))
//!         .run(Arc::new(MyTransport::new()))
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)* / `yaml-config`: configuration file formats
//! - `json-log`: JSON log output

pub use sprocket_core as core;
pub use sprocket_framework as framework;
pub use sprocket_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use sprocket::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use sprocket_runtime::{SprocketConfig, SprocketRuntime};

    // Units and commands
    pub use sprocket_framework::{
        BoxError, Catalogue, Command, HandlerError, HandlerResult, Registrar, Unit, UnitContext,
        UnitDefinition, UnitDescriptor, handler_fn,
    };

    // Authorization
    pub use sprocket_framework::{GuildOnly, HasPermissions, NotBot, OwnerOnly, requirement_fn};

    // Shared state
    pub use sprocket_framework::{KeyedStore, Services, ShutdownSignal};

    // Request model and replies
    pub use sprocket_core::{
        ArgValue, Arguments, Identity, Permissions, Reply, Request, ResponseChannel, Scope,
        UserId, Visibility,
    };

    // Transport seam
    pub use sprocket_core::{ReplySink, Transport, TransportError, TransportResult};

    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}
