//! # Sprocket Core
//!
//! Platform-facing building blocks of the Sprocket command framework.
//!
//! This crate knows nothing about units, registries or authorization. It
//! defines what a command invocation looks like and how it may be answered:
//!
//! - **Request model**: [`Request`], [`Identity`], [`Scope`], [`Arguments`]
//! - **Permissions**: [`Permissions`] bit set with administrator override
//! - **Response channel**: [`ResponseChannel`], the single-use reply slot that
//!   enforces the acknowledgment deadline and followup window
//! - **Transport**: [`Transport`] and [`ReplySink`], the seam with the chat
//!   platform
//!
//! ## Request Flow
//!
//! ```text
//! ┌───────────┐ Request ┌────────────┐ Arc<Request> ┌─────────┐
//! │ Transport │────────▶│ Dispatcher │─────────────▶│ Handler │
//! └───────────┘         └────────────┘              └─────────┘
//!       ▲                      │ open                    │
//!       │ ReplySink            ▼                         │ reply / defer / followup
//!       └──────────────  ResponseChannel ◀───────────────┘
//! ```

pub mod channel;
pub mod error;
pub mod permission;
pub mod request;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use channel::{
    AckMode, Acknowledgement, BoxedReplySink, ChannelState, ChannelTiming, MAX_REPLY_LEN, Reply,
    ReplySink, ResponseChannel, Visibility,
};
pub use error::{ChannelError, ChannelResult, TransportError, TransportResult};
pub use permission::Permissions;
pub use request::{
    ArgValue, Arguments, ChannelId, GuildId, Identity, Request, RequestBuilder, RequestId, Scope,
    UserId,
};
pub use transport::{BoxedTransport, Transport};
