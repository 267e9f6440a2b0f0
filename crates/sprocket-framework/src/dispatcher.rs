//! Request dispatch.
//!
//! For every inbound request the [`Dispatcher`]:
//!
//! 1. opens the request's [`ResponseChannel`];
//! 2. resolves the command in the [`HandlerRegistry`];
//! 3. runs the [`AuthorizationGate`] over the command's requirements;
//! 4. invokes the handler, catching panics;
//! 5. routes any failure through the error taxonomy so the requester gets
//!    exactly one human-readable message;
//! 6. closes the channel, whatever happened.
//!
//! A handler that returns `Ok` without acknowledging, or after deferring
//! without any followup, is treated as a handler fault.

use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use sprocket_core::{
    AckMode, BoxedReplySink, ChannelState, ChannelTiming, Request, ResponseChannel, Visibility,
};
use tower::Service;
use tracing::{Instrument, Level, debug, error, info, span, warn};

use crate::auth::{AuthorizationGate, Decision};
use crate::error::{DispatchError, FailureKind, panic_message};
use crate::handler::normalize_name;
use crate::registry::HandlerRegistry;

/// How a dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Denied,
    Failed(FailureKind),
}

impl From<&DispatchError> for Outcome {
    fn from(err: &DispatchError) -> Self {
        match err.kind() {
            FailureKind::Unauthorized => Self::Denied,
            kind => Self::Failed(kind),
        }
    }
}

/// Routes requests to registered command handlers.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    gate: AuthorizationGate,
    sink: BoxedReplySink,
    timing: ChannelTiming,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, gate: AuthorizationGate, sink: BoxedReplySink) -> Self {
        Self {
            registry,
            gate,
            sink,
            timing: ChannelTiming::default(),
        }
    }

    /// Overrides the platform reply deadlines.
    pub fn with_timing(mut self, timing: ChannelTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Handles one request end to end.
    pub async fn dispatch(&self, request: Request) -> Outcome {
        let request = Arc::new(request);
        let span = span!(
            Level::DEBUG,
            "dispatch",
            request = %request.id(),
            command = %request.command(),
            user = %request.identity().user_id
        );

        async move {
            let channel = ResponseChannel::open(
                request.id(),
                request.received_at(),
                Arc::clone(&self.sink),
                self.timing,
            );

            let outcome = match self.run(&request, &channel).await {
                Ok(()) => {
                    debug!("Command completed");
                    Outcome::Completed
                }
                Err(err) => {
                    self.report(&channel, &err).await;
                    Outcome::from(&err)
                }
            };

            channel.close().await;
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request: &Arc<Request>,
        channel: &ResponseChannel,
    ) -> Result<(), DispatchError> {
        let name = normalize_name(request.command());
        let entry = self
            .registry
            .get(&name)
            .ok_or(DispatchError::UnknownCommand(name))?;

        if let Decision::Deny { reason } = self.gate.check(request, entry.command.requirements()) {
            return Err(DispatchError::Unauthorized { reason });
        }

        let handler = Arc::clone(entry.command.handler());
        let result = AssertUnwindSafe(handler.handle(Arc::clone(request), channel.clone()))
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err.into()),
            Err(payload) => return Err(DispatchError::Panicked(panic_message(&*payload))),
        }

        match channel.state().await {
            ChannelState::Acknowledged(AckMode::Immediate) | ChannelState::Closed => Ok(()),
            ChannelState::Acknowledged(AckMode::Deferred) if channel.followup_count().await > 0 => {
                Ok(())
            }
            _ => Err(DispatchError::NoResponse),
        }
    }

    /// Logs `err` and delivers its user message through whichever path the
    /// channel still has open.
    async fn report(&self, channel: &ResponseChannel, err: &DispatchError) {
        match err {
            DispatchError::Unauthorized { reason } => info!(%reason, "Request denied"),
            DispatchError::UnknownCommand(name) => warn!(command = %name, "Unknown command"),
            DispatchError::Lifecycle(e) => info!(error = %e, "Lifecycle operation failed"),
            DispatchError::Channel(e) => warn!(error = %e, "Response channel fault"),
            DispatchError::User(msg) => debug!(message = %msg, "Handler rejected request"),
            DispatchError::Internal(e) => error!(error = %e, "Handler failed"),
            DispatchError::Panicked(msg) => error!(panic = %msg, "Handler panicked"),
            DispatchError::NoResponse => error!("Handler returned without responding"),
        }

        if channel.is_expired().await {
            warn!("Interaction expired, failure not reported to requester");
            return;
        }
        if let Err(e) = channel.send(err.user_message(), Visibility::Private).await {
            warn!(error = %e, "Could not report failure to requester");
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("commands", &self.registry.len())
            .field("gate", &self.gate)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

impl Service<Request> for Dispatcher {
    type Response = Outcome;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Outcome, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let dispatcher = self.clone();
        Box::pin(async move { Ok(dispatcher.dispatch(request).await) })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use sprocket_core::testing::{RecordingSink, SentMessage};
    use sprocket_core::{ChannelError, Identity, UserId};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::{OwnerOnly, requirement_fn};
    use crate::error::{GENERIC_FAILURE, HandlerError};
    use crate::handler::Command;

    const OWNER: u64 = 1;

    fn setup(commands: Vec<Command>) -> (Dispatcher, Arc<RecordingSink>) {
        let registry = Arc::new(HandlerRegistry::new());
        registry.insert_unit("test", commands).unwrap();
        let sink = Arc::new(RecordingSink::new());
        let dispatcher = Dispatcher::new(
            registry,
            AuthorizationGate::new(UserId(OWNER)),
            sink.clone(),
        );
        (dispatcher, sink)
    }

    fn request(command: &str, user: u64) -> Request {
        Request::builder(command)
            .id(99)
            .identity(Identity::new(user, "tester"))
            .build()
    }

    #[tokio::test]
    async fn successful_reply_completes() {
        let (dispatcher, sink) = setup(vec![Command::from_fn("ping", |_, channel| async move {
            channel.reply("Pong!", Visibility::Public).await?;
            Ok(())
        })]);

        let outcome = dispatcher.dispatch(request("PING", 5)).await;
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(sink.contents(), vec!["Pong!"]);
    }

    #[tokio::test]
    async fn unknown_command_gets_one_private_reply() {
        let (dispatcher, sink) = setup(vec![]);

        let outcome = dispatcher.dispatch(request("xyz", 5)).await;
        assert_eq!(outcome, Outcome::Failed(FailureKind::UnknownCommand));

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].visibility(), Visibility::Private);
        assert_eq!(sent[0].content(), Some("Unknown command `xyz`."));
    }

    #[tokio::test]
    async fn denied_requests_never_reach_the_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let command = Command::from_fn("manage units", move |_, channel| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                channel.reply("units", Visibility::Private).await?;
                Ok(())
            }
        })
        .require(OwnerOnly);
        let (dispatcher, sink) = setup(vec![command]);

        let outcome = dispatcher.dispatch(request("manage units", 5)).await;
        assert_eq!(outcome, Outcome::Denied);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            sink.sent(),
            vec![SentMessage::Immediate {
                request: sprocket_core::RequestId(99),
                reply: sprocket_core::Reply::private("You are not authorized to use this command."),
            }]
        );

        assert_eq!(
            dispatcher.dispatch(request("manage units", OWNER)).await,
            Outcome::Completed
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gate_short_circuits_in_declaration_order() {
        let evaluated = Arc::new(AtomicUsize::new(0));
        let seen = evaluated.clone();
        let command = Command::from_fn("kick", |_, _| async { Ok(()) })
            .require(requirement_fn("a", |_| Decision::Allow))
            .require(requirement_fn("b", |_| Decision::deny("B says no")))
            .require(requirement_fn("c", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Decision::Allow
            }));
        let (dispatcher, sink) = setup(vec![command]);

        assert_eq!(dispatcher.dispatch(request("kick", 5)).await, Outcome::Denied);
        assert_eq!(evaluated.load(Ordering::SeqCst), 0);
        assert_eq!(sink.contents(), vec!["B says no"]);
    }

    #[tokio::test]
    async fn internal_errors_are_generic() {
        let (dispatcher, sink) = setup(vec![Command::from_fn("db", |_, _| async {
            Err(HandlerError::internal("connection refused to 10.0.0.3"))
        })]);

        let outcome = dispatcher.dispatch(request("db", 5)).await;
        assert_eq!(outcome, Outcome::Failed(FailureKind::Internal));
        assert_eq!(sink.contents(), vec![GENERIC_FAILURE]);
        assert_eq!(sink.sent()[0].visibility(), Visibility::Private);
    }

    #[tokio::test]
    async fn user_errors_are_shown_verbatim() {
        let (dispatcher, sink) = setup(vec![Command::from_fn("roll", |_, _| async {
            Err(HandlerError::user("Sides must be at least 2."))
        })]);

        let outcome = dispatcher.dispatch(request("roll", 5)).await;
        assert_eq!(outcome, Outcome::Failed(FailureKind::User));
        assert_eq!(sink.contents(), vec!["Sides must be at least 2."]);
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let (dispatcher, sink) = setup(vec![Command::from_fn(
            "boom",
            |request: Arc<Request>, _| async move {
                if request.command() == "boom" {
                    panic!("handler exploded");
                }
                Ok(())
            },
        )]);

        let outcome = dispatcher.dispatch(request("boom", 5)).await;
        assert_eq!(outcome, Outcome::Failed(FailureKind::Internal));
        assert_eq!(sink.contents(), vec![GENERIC_FAILURE]);
    }

    #[tokio::test]
    async fn silent_handler_is_a_fault() {
        let (dispatcher, sink) = setup(vec![Command::from_fn("quiet", |_, _| async { Ok(()) })]);

        let outcome = dispatcher.dispatch(request("quiet", 5)).await;
        assert_eq!(outcome, Outcome::Failed(FailureKind::Internal));
        assert_eq!(sink.contents(), vec![GENERIC_FAILURE]);
    }

    #[tokio::test]
    async fn deferral_without_followup_is_a_fault() {
        let (dispatcher, sink) = setup(vec![Command::from_fn("slow", |_, channel| async move {
            channel.defer(Visibility::Private).await?;
            Ok(())
        })]);

        dispatcher.dispatch(request("slow", 5)).await;
        let sent = sink.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0], SentMessage::Deferred { .. }));
        assert!(matches!(sent[1], SentMessage::Followup { .. }));
        assert_eq!(sent[1].content(), Some(GENERIC_FAILURE));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_interaction_is_only_logged() {
        let (dispatcher, sink) = setup(vec![Command::from_fn("late", |_, channel| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            channel.reply("finally", Visibility::Public).await?;
            Ok(())
        })]);

        let outcome = dispatcher.dispatch(request("late", 5)).await;
        assert_eq!(outcome, Outcome::Failed(FailureKind::Channel));
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn channel_is_closed_after_dispatch() {
        let stash: Arc<parking_lot::Mutex<Option<ResponseChannel>>> = Arc::default();
        let slot = stash.clone();
        let (dispatcher, _sink) = setup(vec![Command::from_fn("keep", move |_, channel| {
            *slot.lock() = Some(channel.clone());
            async move {
                channel.reply("ok", Visibility::Public).await?;
                Ok(())
            }
        })]);

        dispatcher.dispatch(request("keep", 5)).await;
        let kept = stash.lock().take().unwrap();
        assert_eq!(kept.state().await, ChannelState::Closed);
        assert_eq!(
            kept.followup("later", Visibility::Public).await,
            Err(ChannelError::Closed)
        );
    }

    #[tokio::test]
    async fn usable_as_tower_service() {
        let (dispatcher, sink) = setup(vec![Command::from_fn("ping", |_, channel| async move {
            channel.reply("Pong!", Visibility::Public).await?;
            Ok(())
        })]);

        let outcome = dispatcher.oneshot(request("ping", 5)).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(sink.contents(), vec!["Pong!"]);
    }
}
