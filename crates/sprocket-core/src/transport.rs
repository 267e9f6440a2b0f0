//! Transport abstraction.
//!
//! A transport is the boundary with the chat platform. Its inbound half decodes
//! platform interactions into [`Request`]s and pushes them into the runtime;
//! its outbound half is a [`ReplySink`] that the response channels write
//! through. The wire format is entirely the transport's concern.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::channel::ReplySink;
use crate::error::TransportResult;
use crate::request::Request;

/// A bidirectional connection to the chat platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Validates `token` against the platform.
    ///
    /// A [`TransportError::InvalidCredentials`](crate::error::TransportError::InvalidCredentials)
    /// result aborts startup.
    async fn authenticate(&self, token: &str) -> TransportResult<()>;

    /// The sink that response channels deliver through.
    fn reply_sink(&self) -> Arc<dyn ReplySink>;

    /// Receives interactions until `shutdown` is cancelled or the connection
    /// ends, pushing every decoded request into `requests`.
    ///
    /// Returning `Ok(())` means the inbound stream ended normally.
    async fn run(
        &self,
        requests: mpsc::Sender<Request>,
        shutdown: CancellationToken,
    ) -> TransportResult<()>;
}

/// A shared, type-erased transport.
pub type BoxedTransport = Arc<dyn Transport>;
