//! The per-request reply slot.
//!
//! Every [`Request`](crate::request::Request) owns exactly one
//! [`ResponseChannel`]. The channel enforces the platform's acknowledgment
//! protocol:
//!
//! ```text
//!                 acknowledge(Immediate | Deferred)
//! Unacknowledged ──────────────────────────────────▶ Acknowledged ──▶ Closed
//!        │                                               │ followup()*
//!        └──────────────────── close() ─────────────────────────────▶ Closed
//! ```
//!
//! - The first transition must happen within [`ChannelTiming::ack_deadline`]
//!   of the request being received.
//! - Followups are unlimited until [`ChannelTiming::followup_window`] has
//!   elapsed since the acknowledgment. Deferring therefore trades the short
//!   acknowledgment deadline for the long followup window, which is why any
//!   handler doing slow work must defer first.
//!
//! The channel is a cheap-clone handle: all clones share one slot, and the
//! slot's lock is held across delivery so two concurrent acknowledgments can
//! never both succeed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{ChannelError, ChannelResult};
use crate::request::RequestId;

/// Maximum length of a single reply, in characters.
pub const MAX_REPLY_LEN: usize = 2000;

// =============================================================================
// Reply types
// =============================================================================

/// Who can see a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Visibility {
    /// Visible to everyone in the channel.
    #[default]
    Public,
    /// Visible only to the invoking user (ephemeral).
    Private,
}

/// One message written through a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    pub visibility: Visibility,
}

impl Reply {
    /// Creates a reply, truncating `content` to [`MAX_REPLY_LEN`] characters.
    pub fn new(content: impl Into<String>, visibility: Visibility) -> Self {
        Self {
            content: truncate(content.into(), MAX_REPLY_LEN),
            visibility,
        }
    }

    pub fn public(content: impl Into<String>) -> Self {
        Self::new(content, Visibility::Public)
    }

    pub fn private(content: impl Into<String>) -> Self {
        Self::new(content, Visibility::Private)
    }
}

/// The initial transition out of `Unacknowledged`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Answer right away; the content travels with the acknowledgment.
    Immediate(Reply),
    /// "Processing, reply to follow." Carries no content.
    Deferred { visibility: Visibility },
}

impl Acknowledgement {
    pub fn mode(&self) -> AckMode {
        match self {
            Self::Immediate(_) => AckMode::Immediate,
            Self::Deferred { .. } => AckMode::Deferred,
        }
    }
}

/// How a channel was acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Immediate,
    Deferred,
}

/// Observable channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unacknowledged,
    Acknowledged(AckMode),
    Closed,
}

/// Platform-imposed reply deadlines.
///
/// The defaults are the platform's values and are not exposed through runtime
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTiming {
    /// Time allowed between receipt and the initial acknowledgment.
    pub ack_deadline: Duration,
    /// Time followups remain possible after the acknowledgment.
    pub followup_window: Duration,
}

impl Default for ChannelTiming {
    fn default() -> Self {
        Self {
            ack_deadline: Duration::from_secs(3),
            followup_window: Duration::from_secs(15 * 60),
        }
    }
}

// =============================================================================
// ReplySink
// =============================================================================

/// Outbound half of a transport: delivers channel writes to the platform.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Delivers the initial acknowledgment for `request`.
    async fn acknowledge(&self, request: RequestId, ack: &Acknowledgement) -> ChannelResult<()>;

    /// Delivers one followup message for `request`.
    async fn followup(&self, request: RequestId, reply: &Reply) -> ChannelResult<()>;
}

/// A shared, type-erased reply sink.
pub type BoxedReplySink = Arc<dyn ReplySink>;

// =============================================================================
// ResponseChannel
// =============================================================================

struct Slot {
    state: ChannelState,
    acknowledged_at: Option<Instant>,
    followups: usize,
}

struct Shared {
    request: RequestId,
    received_at: Instant,
    timing: ChannelTiming,
    sink: BoxedReplySink,
    slot: Mutex<Slot>,
}

/// The reply slot bound to a single request.
#[derive(Clone)]
pub struct ResponseChannel {
    shared: Arc<Shared>,
}

impl ResponseChannel {
    /// Opens a channel for `request`, received at `received_at`.
    pub fn open(
        request: RequestId,
        received_at: Instant,
        sink: BoxedReplySink,
        timing: ChannelTiming,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                request,
                received_at,
                timing,
                sink,
                slot: Mutex::new(Slot {
                    state: ChannelState::Unacknowledged,
                    acknowledged_at: None,
                    followups: 0,
                }),
            }),
        }
    }

    /// The request this channel answers.
    pub fn request_id(&self) -> RequestId {
        self.shared.request
    }

    /// Performs the single transition out of `Unacknowledged`.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::DoubleAck`] if the channel was already acknowledged.
    /// - [`ChannelError::Expired`] if the acknowledgment deadline has passed.
    /// - [`ChannelError::Closed`] after [`close`](Self::close).
    /// - [`ChannelError::Delivery`] if the sink failed; the channel stays
    ///   unacknowledged in that case.
    pub async fn acknowledge(&self, ack: Acknowledgement) -> ChannelResult<()> {
        let mut slot = self.shared.slot.lock().await;
        match slot.state {
            ChannelState::Unacknowledged => {}
            ChannelState::Acknowledged(_) => return Err(ChannelError::DoubleAck),
            ChannelState::Closed => return Err(ChannelError::Closed),
        }
        if self.shared.received_at.elapsed() >= self.shared.timing.ack_deadline {
            return Err(ChannelError::Expired);
        }

        self.shared.sink.acknowledge(self.shared.request, &ack).await?;

        let mode = ack.mode();
        slot.state = ChannelState::Acknowledged(mode);
        slot.acknowledged_at = Some(Instant::now());
        debug!(request = %self.shared.request, mode = ?mode, "Interaction acknowledged");
        Ok(())
    }

    /// Acknowledges with content.
    pub async fn reply(
        &self,
        content: impl Into<String>,
        visibility: Visibility,
    ) -> ChannelResult<()> {
        self.acknowledge(Acknowledgement::Immediate(Reply::new(content, visibility)))
            .await
    }

    /// Acknowledges without content; the answer follows as a followup.
    pub async fn defer(&self, visibility: Visibility) -> ChannelResult<()> {
        self.acknowledge(Acknowledgement::Deferred { visibility })
            .await
    }

    /// Sends a followup message.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::NotAcknowledged`] before the acknowledgment.
    /// - [`ChannelError::Expired`] once the followup window has elapsed.
    /// - [`ChannelError::Closed`] after [`close`](Self::close).
    pub async fn followup(
        &self,
        content: impl Into<String>,
        visibility: Visibility,
    ) -> ChannelResult<()> {
        let reply = Reply::new(content, visibility);
        let mut slot = self.shared.slot.lock().await;
        let acknowledged_at = match (slot.state, slot.acknowledged_at) {
            (ChannelState::Acknowledged(_), Some(at)) => at,
            (ChannelState::Closed, _) => return Err(ChannelError::Closed),
            _ => return Err(ChannelError::NotAcknowledged),
        };
        if acknowledged_at.elapsed() >= self.shared.timing.followup_window {
            return Err(ChannelError::Expired);
        }

        self.shared.sink.followup(self.shared.request, &reply).await?;

        slot.followups += 1;
        trace!(request = %self.shared.request, followups = slot.followups, "Followup sent");
        Ok(())
    }

    /// Writes `content` through whichever path is open: the initial
    /// acknowledgment if the slot is still free, a followup otherwise.
    pub async fn send(
        &self,
        content: impl Into<String>,
        visibility: Visibility,
    ) -> ChannelResult<()> {
        let content = content.into();
        if self.is_done().await {
            self.followup(content, visibility).await
        } else {
            match self.reply(content.clone(), visibility).await {
                // Lost a race with another clone; fall through to a followup.
                Err(ChannelError::DoubleAck) => self.followup(content, visibility).await,
                other => other,
            }
        }
    }

    /// Releases the channel. Idempotent.
    pub async fn close(&self) {
        let mut slot = self.shared.slot.lock().await;
        if slot.state != ChannelState::Closed {
            slot.state = ChannelState::Closed;
            trace!(request = %self.shared.request, "Response channel closed");
        }
    }

    pub async fn state(&self) -> ChannelState {
        self.shared.slot.lock().await.state
    }

    /// Returns `true` once the initial acknowledgment has been delivered.
    pub async fn is_done(&self) -> bool {
        !matches!(self.state().await, ChannelState::Unacknowledged)
    }

    /// Number of followups delivered so far.
    pub async fn followup_count(&self) -> usize {
        self.shared.slot.lock().await.followups
    }

    /// Returns `true` if no further write can succeed because a deadline has
    /// passed.
    pub async fn is_expired(&self) -> bool {
        let slot = self.shared.slot.lock().await;
        match slot.acknowledged_at {
            Some(at) => at.elapsed() >= self.shared.timing.followup_window,
            None => self.shared.received_at.elapsed() >= self.shared.timing.ack_deadline,
        }
    }
}

impl fmt::Debug for ResponseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseChannel")
            .field("request", &self.shared.request)
            .field("timing", &self.shared.timing)
            .finish_non_exhaustive()
    }
}

/// Truncates `content` to at most `max` characters on a char boundary.
fn truncate(mut content: String, max: usize) -> String {
    if let Some((idx, _)) = content.char_indices().nth(max) {
        content.truncate(idx);
    }
    content
}
