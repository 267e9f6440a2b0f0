//! The inbound request model.
//!
//! A [`Request`] is one command invocation decoded by the transport. It is
//! immutable once built and shared as `Arc<Request>` between the dispatcher,
//! the authorization gate and the handler.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::permission::Permissions;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// Platform user identifier.
    UserId
);
id_type!(
    /// Platform guild (server) identifier.
    GuildId
);
id_type!(
    /// Platform channel identifier.
    ChannelId
);
id_type!(
    /// Identifier of a single inbound interaction.
    RequestId
);

// =============================================================================
// Identity & Scope
// =============================================================================

/// The identity that invoked a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub is_bot: bool,
}

impl Identity {
    /// Creates a non-bot identity without permissions.
    pub fn new(user_id: u64, display_name: impl Into<String>) -> Self {
        Self {
            user_id: UserId(user_id),
            display_name: display_name.into(),
            permissions: Permissions::empty(),
            is_bot: false,
        }
    }

    /// Sets the permission set held in the current scope.
    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Marks this identity as a bot account.
    pub fn bot(mut self) -> Self {
        self.is_bot = true;
        self
    }
}

/// Where a command was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Scope {
    /// A channel inside a guild.
    Guild {
        guild_id: GuildId,
        channel_id: ChannelId,
    },
    /// A direct-message conversation.
    Direct { channel_id: ChannelId },
}

impl Scope {
    /// Returns the channel the request was issued in.
    pub fn channel_id(&self) -> ChannelId {
        match self {
            Self::Guild { channel_id, .. } | Self::Direct { channel_id } => *channel_id,
        }
    }

    /// Returns the guild, if any.
    pub fn guild_id(&self) -> Option<GuildId> {
        match self {
            Self::Guild { guild_id, .. } => Some(*guild_id),
            Self::Direct { .. } => None,
        }
    }

    /// Returns `true` for direct-message scopes.
    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct { .. })
    }
}

// =============================================================================
// Arguments
// =============================================================================

/// A single decoded argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    User(UserId),
    String(String),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Number(v) => write!(f, "{v}"),
            Self::User(v) => write!(f, "<@{v}>"),
            Self::String(v) => f.write_str(v),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<UserId> for ArgValue {
    fn from(v: UserId) -> Self {
        Self::User(v)
    }
}

/// Ordered, named command arguments.
///
/// Positional access follows the order the transport supplied the options in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arguments {
    entries: Vec<(String, ArgValue)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an argument. A repeated name shadows nothing; lookups return
    /// the first occurrence.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<ArgValue>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn positional(&self, index: usize) -> Option<&ArgValue> {
        self.entries.get(index).map(|(_, value)| value)
    }

    /// Returns the named argument as a string slice.
    pub fn str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            ArgValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the named argument as an integer, parsing string values.
    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            ArgValue::Integer(v) => Some(*v),
            ArgValue::String(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            ArgValue::Boolean(v) => Some(*v),
            ArgValue::String(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn user(&self, name: &str) -> Option<UserId> {
        match self.get(name)? {
            ArgValue::User(v) => Some(*v),
            ArgValue::Integer(v) => u64::try_from(*v).ok().map(UserId),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Arguments
where
    K: Into<String>,
    V: Into<ArgValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

// =============================================================================
// Request
// =============================================================================

/// One inbound command invocation.
///
/// Fields are private; the request cannot be mutated after it has been built.
#[derive(Debug, Clone)]
pub struct Request {
    id: RequestId,
    identity: Identity,
    command: String,
    arguments: Arguments,
    scope: Scope,
    received_at: Instant,
}

impl Request {
    /// Starts building a request for `command`.
    pub fn builder(command: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(command)
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Fully qualified command name as sent by the transport.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// When the transport received the interaction; the acknowledgment
    /// deadline is measured from this instant.
    pub fn received_at(&self) -> Instant {
        self.received_at
    }
}

/// Builder for [`Request`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    id: RequestId,
    identity: Identity,
    command: String,
    arguments: Arguments,
    scope: Scope,
    received_at: Option<Instant>,
}

impl RequestBuilder {
    fn new(command: impl Into<String>) -> Self {
        Self {
            id: RequestId(0),
            identity: Identity::new(0, "unknown"),
            command: command.into(),
            arguments: Arguments::new(),
            scope: Scope::Direct {
                channel_id: ChannelId(0),
            },
            received_at: None,
        }
    }

    pub fn id(mut self, id: u64) -> Self {
        self.id = RequestId(id);
        self
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn argument(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.arguments.push(name, value);
        self
    }

    pub fn arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Shorthand for a guild scope.
    pub fn in_guild(self, guild_id: u64, channel_id: u64) -> Self {
        self.scope(Scope::Guild {
            guild_id: GuildId(guild_id),
            channel_id: ChannelId(channel_id),
        })
    }

    /// Overrides the receive instant (defaults to `Instant::now()` at build).
    pub fn received_at(mut self, at: Instant) -> Self {
        self.received_at = Some(at);
        self
    }

    pub fn build(self) -> Request {
        Request {
            id: self.id,
            identity: self.identity,
            command: self.command,
            arguments: self.arguments,
            scope: self.scope,
            received_at: self.received_at.unwrap_or_else(Instant::now),
        }
    }
}
