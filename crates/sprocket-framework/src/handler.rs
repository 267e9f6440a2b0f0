//! Command handlers and command definitions.
//!
//! A handler receives the shared request and its response channel, and is
//! expected to leave the requester with exactly one visible outcome: either
//! an immediate reply, or a deferral followed by at least one followup.
//!
//! ```rust,ignore
//! let ping = Command::from_fn("ping", |_req, channel| async move {
//!     channel.reply("Pong!", Visibility::Public).await?;
//!     Ok(())
//! })
//! .description("Checks that the bot is alive");
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use sprocket_core::{Request, ResponseChannel};

use crate::auth::Requirement;
use crate::error::HandlerResult;

// ============================================================================
// CommandHandler
// ============================================================================

/// Executes one command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, request: Arc<Request>, channel: ResponseChannel) -> HandlerResult;
}

/// Adapter that turns an async closure into a [`CommandHandler`].
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> CommandHandler for HandlerFn<F>
where
    F: Fn(Arc<Request>, ResponseChannel) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, request: Arc<Request>, channel: ResponseChannel) -> HandlerResult {
        (self.f)(request, channel).await
    }
}

/// Wraps an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Arc<Request>, ResponseChannel) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    HandlerFn { f }
}

// ============================================================================
// Command
// ============================================================================

/// A named, authorized command bound to its handler.
#[derive(Clone)]
pub struct Command {
    name: String,
    description: String,
    requirements: Vec<Arc<dyn Requirement>>,
    handler: Arc<dyn CommandHandler>,
}

impl Command {
    pub fn new(name: impl AsRef<str>, handler: impl CommandHandler + 'static) -> Self {
        Self {
            name: normalize_name(name.as_ref()),
            description: String::new(),
            requirements: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    /// Creates a command from an async closure.
    pub fn from_fn<F, Fut>(name: impl AsRef<str>, f: F) -> Self
    where
        F: Fn(Arc<Request>, ResponseChannel) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::new(name, handler_fn(f))
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends a requirement. Requirements are evaluated in the order they
    /// are added.
    pub fn require(mut self, requirement: impl Requirement + 'static) -> Self {
        self.requirements.push(Arc::new(requirement));
        self
    }

    /// Normalized, fully qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.description
    }

    pub fn requirements(&self) -> &[Arc<dyn Requirement>] {
        &self.requirements
    }

    pub fn handler(&self) -> &Arc<dyn CommandHandler> {
        &self.handler
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("requirements", &self.requirements)
            .finish_non_exhaustive()
    }
}

/// Canonical form of a command name: trimmed, lowercase, single spaces.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use sprocket_core::testing::RecordingSink;
    use sprocket_core::{ChannelTiming, Visibility};
    use tokio::time::Instant;

    use super::*;
    use crate::auth::OwnerOnly;

    #[test]
    fn names_are_normalized() {
        assert_eq!(normalize_name("  Manage   Reload "), "manage reload");
        assert_eq!(normalize_name("ping"), "ping");

        let command = Command::from_fn("Manage  Load", |_, _| async { Ok(()) })
            .description("Loads a unit")
            .require(OwnerOnly);
        assert_eq!(command.name(), "manage load");
        assert_eq!(command.help(), "Loads a unit");
        assert_eq!(command.requirements().len(), 1);
    }

    #[test]
    fn closure_handler_runs() {
        let command = Command::from_fn("ping", |_, channel: ResponseChannel| async move {
            channel.reply("Pong!", Visibility::Public).await?;
            Ok(())
        });

        let sink = Arc::new(RecordingSink::new());
        tokio_test::block_on(async {
            let request = Arc::new(Request::builder("ping").build());
            let channel = ResponseChannel::open(
                request.id(),
                Instant::now(),
                sink.clone(),
                ChannelTiming::default(),
            );
            command.handler().handle(request, channel).await.unwrap();
        });
        assert_eq!(sink.contents(), vec!["Pong!".to_string()]);
    }
}
