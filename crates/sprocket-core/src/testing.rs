//! In-memory doubles for tests.
//!
//! Enabled with the `testing` feature.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::channel::{Acknowledgement, Reply, ReplySink, Visibility};
use crate::error::{ChannelError, ChannelResult};
use crate::request::RequestId;

/// A message delivered through a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Immediate { request: RequestId, reply: Reply },
    Deferred { request: RequestId, visibility: Visibility },
    Followup { request: RequestId, reply: Reply },
}

impl SentMessage {
    /// The text content, if the message carried any.
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Immediate { reply, .. } | Self::Followup { reply, .. } => Some(&reply.content),
            Self::Deferred { .. } => None,
        }
    }

    /// The visibility the message was sent with.
    pub fn visibility(&self) -> Visibility {
        match self {
            Self::Immediate { reply, .. } | Self::Followup { reply, .. } => reply.visibility,
            Self::Deferred { visibility, .. } => *visibility,
        }
    }
}

/// A [`ReplySink`] that records every delivery and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<SentMessage>>,
    failures: Mutex<VecDeque<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next delivery fail with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.failures.lock().push_back(reason.into());
    }

    /// Snapshot of everything delivered so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// Content of every delivered message, skipping bare deferrals.
    pub fn contents(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| m.content().map(str::to_string))
            .collect()
    }

    fn check_failure(&self) -> ChannelResult<()> {
        match self.failures.lock().pop_front() {
            Some(reason) => Err(ChannelError::delivery(reason)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn acknowledge(&self, request: RequestId, ack: &Acknowledgement) -> ChannelResult<()> {
        self.check_failure()?;
        let message = match ack {
            Acknowledgement::Immediate(reply) => SentMessage::Immediate {
                request,
                reply: reply.clone(),
            },
            Acknowledgement::Deferred { visibility } => SentMessage::Deferred {
                request,
                visibility: *visibility,
            },
        };
        self.sent.lock().push(message);
        Ok(())
    }

    async fn followup(&self, request: RequestId, reply: &Reply) -> ChannelResult<()> {
        self.check_failure()?;
        self.sent.lock().push(SentMessage::Followup {
            request,
            reply: reply.clone(),
        });
        Ok(())
    }
}
