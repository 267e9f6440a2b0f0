//! Built-in management unit.
//!
//! Hosts the owner-only lifecycle commands. Every reply is private.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `manage load <unit>` | [`LifecycleManager::load`] |
//! | `manage unload <unit>` | [`LifecycleManager::unload`] |
//! | `manage reload <unit>` | [`LifecycleManager::reload`] |
//! | `manage reload_all` | [`LifecycleManager::reload_all`], summary as a followup |
//! | `manage units` | Lists catalogue units and their state |
//! | `manage shutdown` | Fires the [`ShutdownSignal`] |
//!
//! The unit must be registered as the manager's host so it can never unload
//! itself:
//!
//! ```rust,ignore
//! let manager = LifecycleManager::builder(catalogue.with(manage::definition()))
//!     .host(manage::MANAGE_UNIT)
//!     .build();
//! ```

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use sprocket_core::{Request, Visibility};
use tower::BoxError;

use crate::auth::OwnerOnly;
use crate::error::HandlerError;
use crate::handler::Command;
use crate::lifecycle::LifecycleManager;
use crate::signal::ShutdownSignal;
use crate::unit::{Registrar, Unit, UnitDefinition};

/// Default name of the management unit.
pub const MANAGE_UNIT: &str = "manage";

/// The management unit's catalogue entry.
pub fn definition() -> UnitDefinition {
    UnitDefinition::new(MANAGE_UNIT, |ctx| {
        let manager = ctx.manager().ok_or("lifecycle manager is not available")?;
        Ok(ManageUnit {
            manager: Arc::downgrade(&manager),
            shutdown: ctx.services().get::<ShutdownSignal>(),
        })
    })
    .description("Owner-only unit management")
}

struct ManageUnit {
    manager: Weak<LifecycleManager>,
    shutdown: Option<Arc<ShutdownSignal>>,
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Load,
    Unload,
    Reload,
}

impl Operation {
    fn verb(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Unload => "unload",
            Self::Reload => "reload",
        }
    }

    fn past_tense(self) -> &'static str {
        match self {
            Self::Load => "loaded",
            Self::Unload => "unloaded",
            Self::Reload => "reloaded",
        }
    }
}

fn upgrade(manager: &Weak<LifecycleManager>) -> Result<Arc<LifecycleManager>, HandlerError> {
    manager
        .upgrade()
        .ok_or_else(|| HandlerError::internal("lifecycle manager dropped"))
}

fn unit_argument(request: &Request) -> Option<String> {
    let args = request.arguments();
    args.str("unit")
        .map(str::to_string)
        .or_else(|| args.positional(0).map(ToString::to_string))
        .map(|unit| unit.trim().to_lowercase())
        .filter(|unit| !unit.is_empty())
}

fn lifecycle_command(op: Operation, manager: Weak<LifecycleManager>) -> Command {
    Command::from_fn(format!("manage {}", op.verb()), move |request, channel| {
        let manager = manager.clone();
        async move {
            let unit = unit_argument(&request)
                .ok_or_else(|| HandlerError::user("Please name the unit to operate on."))?;
            let manager = upgrade(&manager)?;
            match op {
                Operation::Load => manager.load(&unit).await?,
                Operation::Unload => manager.unload(&unit).await?,
                Operation::Reload => manager.reload(&unit).await?,
            }
            channel
                .reply(
                    format!("Unit `{unit}` has been {}.", op.past_tense()),
                    Visibility::Private,
                )
                .await?;
            Ok(())
        }
    })
    .description(format!("{}s a unit", capitalize(op.verb())))
    .require(OwnerOnly)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl Unit for ManageUnit {
    async fn register(&self, registrar: &mut Registrar) -> Result<(), BoxError> {
        for op in [Operation::Load, Operation::Unload, Operation::Reload] {
            registrar.command(lifecycle_command(op, self.manager.clone()));
        }

        let manager = self.manager.clone();
        registrar.command(
            Command::from_fn("manage reload_all", move |_, channel| {
                let manager = manager.clone();
                async move {
                    channel.defer(Visibility::Private).await?;
                    let report = upgrade(&manager)?.reload_all().await;
                    channel
                        .followup(report.summary(), Visibility::Private)
                        .await?;
                    Ok(())
                }
            })
            .description("Reloads every unit except this one")
            .require(OwnerOnly),
        );

        let manager = self.manager.clone();
        registrar.command(
            Command::from_fn("manage units", move |_, channel| {
                let manager = manager.clone();
                async move {
                    let manager = upgrade(&manager)?;
                    let mut listing = String::from("Units:\n");
                    for definition in manager.catalogue().iter() {
                        let state = manager
                            .state(definition.name())
                            .map_or("unknown", |s| s.as_str());
                        listing.push_str(&format!("- `{}` ({state})", definition.name()));
                        if !definition.help().is_empty() {
                            listing.push_str(&format!(": {}", definition.help()));
                        }
                        listing.push('\n');
                    }
                    channel.reply(listing, Visibility::Private).await?;
                    Ok(())
                }
            })
            .description("Lists known units")
            .require(OwnerOnly),
        );

        let shutdown = self.shutdown.clone();
        registrar.command(
            Command::from_fn("manage shutdown", move |_, channel| {
                let shutdown = shutdown.clone();
                async move {
                    let signal = shutdown.ok_or_else(|| {
                        HandlerError::user("Shutdown is not available in this deployment.")
                    })?;
                    channel
                        .reply("Shutting down the bot...", Visibility::Private)
                        .await?;
                    signal.trigger();
                    Ok(())
                }
            })
            .description("Shuts down the bot gracefully")
            .require(OwnerOnly),
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sprocket_core::testing::{RecordingSink, SentMessage};
    use sprocket_core::{Identity, UserId};

    use super::*;
    use crate::auth::AuthorizationGate;
    use crate::dispatcher::{Dispatcher, Outcome};
    use crate::lifecycle::UnitState;
    use crate::state::Services;
    use crate::unit::Catalogue;

    const OWNER: u64 = 10;

    struct Fun;

    #[async_trait]
    impl Unit for Fun {
        async fn register(&self, registrar: &mut Registrar) -> Result<(), BoxError> {
            for name in ["roll", "coinflip", "choose"] {
                registrar.command(Command::from_fn(name, |_, channel| async move {
                    channel.reply("ok", Visibility::Public).await?;
                    Ok(())
                }));
            }
            Ok(())
        }
    }

    struct Harness {
        manager: Arc<LifecycleManager>,
        dispatcher: Dispatcher,
        sink: Arc<RecordingSink>,
        signal: ShutdownSignal,
    }

    async fn harness() -> Harness {
        let signal = ShutdownSignal::new();
        let catalogue = Catalogue::new()
            .with(definition())
            .with(UnitDefinition::new("fun", |_| Ok(Fun)).description("Dice and coins"));
        let manager = LifecycleManager::builder(catalogue)
            .host(MANAGE_UNIT)
            .services(Services::new().with(Arc::new(signal.clone())))
            .build();
        assert!(manager.load_all().await.is_clean());

        let sink = Arc::new(RecordingSink::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(manager.registry()),
            AuthorizationGate::new(UserId(OWNER)),
            sink.clone(),
        );
        Harness {
            manager,
            dispatcher,
            sink,
            signal,
        }
    }

    fn owner_request(command: &str, unit: Option<&str>) -> Request {
        let builder = Request::builder(command).identity(Identity::new(OWNER, "owner"));
        match unit {
            Some(unit) => builder.argument("unit", unit).build(),
            None => builder.build(),
        }
    }

    #[tokio::test]
    async fn unload_and_load_through_commands() {
        let h = harness().await;

        let outcome = h
            .dispatcher
            .dispatch(owner_request("manage unload", Some("fun")))
            .await;
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(h.manager.state("fun"), Some(UnitState::Unloaded));
        assert!(h.manager.registry().get("roll").is_none());

        h.dispatcher
            .dispatch(owner_request("manage load", Some("fun")))
            .await;
        assert_eq!(h.manager.registry().commands_of("fun").len(), 3);
        assert_eq!(
            h.sink.contents(),
            vec![
                "Unit `fun` has been unloaded.",
                "Unit `fun` has been loaded.",
            ]
        );
        assert!(h.sink.sent().iter().all(|m| m.visibility() == Visibility::Private));
    }

    #[tokio::test]
    async fn self_unload_is_refused_verbatim() {
        let h = harness().await;
        let before = h.manager.registry().names();

        let outcome = h
            .dispatcher
            .dispatch(owner_request("manage unload", Some("manage")))
            .await;
        assert!(matches!(outcome, Outcome::Failed(_)));
        assert_eq!(
            h.sink.contents(),
            vec!["Unit `manage` hosts the lifecycle commands and cannot unload itself."]
        );
        assert_eq!(h.manager.registry().names(), before);
    }

    #[tokio::test]
    async fn non_owner_is_denied() {
        let h = harness().await;
        let request = Request::builder("manage unload")
            .identity(Identity::new(77, "intruder"))
            .argument("unit", "fun")
            .build();

        assert_eq!(h.dispatcher.dispatch(request).await, Outcome::Denied);
        assert_eq!(h.manager.state("fun"), Some(UnitState::Loaded));
        assert_eq!(
            h.sink.contents(),
            vec!["You are not authorized to use this command."]
        );
    }

    #[tokio::test]
    async fn missing_unit_argument() {
        let h = harness().await;
        h.dispatcher
            .dispatch(owner_request("manage load", None))
            .await;
        assert_eq!(
            h.sink.contents(),
            vec!["Please name the unit to operate on."]
        );
    }

    #[tokio::test]
    async fn reload_all_defers_then_summarizes() {
        let h = harness().await;

        let outcome = h
            .dispatcher
            .dispatch(owner_request("manage reload_all", None))
            .await;
        assert_eq!(outcome, Outcome::Completed);

        let sent = h.sink.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(
            sent[0],
            SentMessage::Deferred {
                visibility: Visibility::Private,
                ..
            }
        ));
        let summary = sent[1].content().unwrap();
        assert!(summary.starts_with("Unit reload finished."));
        assert!(summary.contains("`fun`"));
        assert!(!summary.contains("`manage`"));
    }

    #[tokio::test]
    async fn units_lists_states() {
        let h = harness().await;
        h.manager.unload("fun").await.unwrap();

        h.dispatcher
            .dispatch(owner_request("manage units", None))
            .await;
        let contents = h.sink.contents();
        let listing = &contents[0];
        assert!(listing.contains("- `manage` (loaded): Owner-only unit management"));
        assert!(listing.contains("- `fun` (unloaded): Dice and coins"));
    }

    #[tokio::test]
    async fn shutdown_fires_the_signal() {
        let h = harness().await;
        assert!(!h.signal.is_triggered());

        h.dispatcher
            .dispatch(owner_request("manage shutdown", None))
            .await;
        assert!(h.signal.is_triggered());
        assert_eq!(h.sink.contents(), vec!["Shutting down the bot..."]);
    }
}
