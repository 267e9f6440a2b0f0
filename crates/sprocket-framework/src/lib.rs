//! # Sprocket Framework
//!
//! Dispatch, authorization and unit lifecycle for Sprocket bots.
//!
//! This layer provides:
//! - Authorization gate with ordered, short-circuiting requirements
//! - Command handlers and the name → handler registry
//! - Units: hot-loadable groups of commands, with a static catalogue
//! - The lifecycle manager (load / unload / reload / reload-all)
//! - The dispatcher that enforces one terminal outcome per request
//! - The built-in owner-only `manage` unit (with `builtin-manage` feature)

pub mod auth;
pub mod builtin;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod registry;
pub mod signal;
pub mod state;
pub mod unit;

pub use linkme;
pub use tower::BoxError;

pub use auth::{
    AuthContext, AuthorizationGate, Decision, GuildOnly, HasPermissions, NotBot, OwnerOnly,
    Requirement, requirement_fn,
};
pub use dispatcher::{Dispatcher, Outcome};
pub use error::{
    DispatchError, FailureKind, GENERIC_FAILURE, HandlerError, HandlerResult, LifecycleError,
    RegistryError,
};
pub use handler::{Command, CommandHandler, HandlerFn, handler_fn};
pub use lifecycle::{LifecycleBuilder, LifecycleManager, ReloadReport, UnitState};
pub use registry::{HandlerRegistry, RegisteredCommand};
pub use signal::ShutdownSignal;
pub use state::{KeyedStore, Services};
pub use unit::{Catalogue, Registrar, UNITS, Unit, UnitContext, UnitDefinition, UnitDescriptor};
