//! A transport that reads commands from stdin and prints replies to stdout.
//!
//! One command per line: command words, then `key=value` options. A value
//! runs until the next `key=` token, so it may contain spaces:
//!
//! ```text
//! /fun roll dice=2d6
//! /fun choose options=tea, coffee, water
//! /util afk set message=out for lunch
//! /manage reload unit=fun
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use sprocket::core::{
    Acknowledgement, ArgValue, Arguments, ChannelError, ChannelResult, Identity, Reply, ReplySink,
    Request, RequestId, Scope, Transport, TransportResult, UserId, Visibility,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// =============================================================================
// Parsing
// =============================================================================

/// Splits a console line into a command name and its options.
///
/// Returns `None` for blank lines and `#` comments.
pub fn parse_line(line: &str) -> Option<(String, Arguments)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut words = Vec::new();
    let mut options: Vec<(String, String)> = Vec::new();
    for token in line.trim_start_matches('/').split_whitespace() {
        if let Some((key, value)) = token.split_once('=')
            && !key.is_empty()
        {
            options.push((key.to_string(), value.to_string()));
        } else if let Some((_, value)) = options.last_mut() {
            value.push(' ');
            value.push_str(token);
        } else {
            words.push(token);
        }
    }

    if words.is_empty() {
        return None;
    }
    let arguments = options
        .into_iter()
        .map(|(key, value)| (key, parse_value(&value)))
        .collect();
    Some((words.join(" "), arguments))
}

fn parse_value(raw: &str) -> ArgValue {
    if let Some(id) = raw
        .strip_prefix("<@")
        .and_then(|rest| rest.strip_suffix('>'))
        .and_then(|id| id.parse().ok())
    {
        return ArgValue::User(UserId(id));
    }
    if let Ok(value) = raw.parse::<i64>() {
        return ArgValue::Integer(value);
    }
    match raw {
        "true" => ArgValue::Boolean(true),
        "false" => ArgValue::Boolean(false),
        _ => ArgValue::String(raw.to_string()),
    }
}

// =============================================================================
// Reply sink
// =============================================================================

/// Prints replies, marking private ones.
pub struct ConsoleSink {
    out: Mutex<Stdout>,
}

impl ConsoleSink {
    fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }

    async fn print(&self, request: RequestId, line: String) -> ChannelResult<()> {
        let mut out = self.out.lock().await;
        out.write_all(format!("[#{request}] {line}\n").as_bytes())
            .await
            .map_err(|e| ChannelError::delivery(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| ChannelError::delivery(e.to_string()))
    }
}

fn render(reply: &Reply) -> String {
    match reply.visibility {
        Visibility::Public => format!("bot: {}", reply.content),
        Visibility::Private => format!("bot (only you): {}", reply.content),
    }
}

#[async_trait]
impl ReplySink for ConsoleSink {
    async fn acknowledge(&self, request: RequestId, ack: &Acknowledgement) -> ChannelResult<()> {
        match ack {
            Acknowledgement::Immediate(reply) => self.print(request, render(reply)).await,
            Acknowledgement::Deferred { .. } => {
                self.print(request, "bot is thinking...".to_string()).await
            }
        }
    }

    async fn followup(&self, request: RequestId, reply: &Reply) -> ChannelResult<()> {
        self.print(request, render(reply)).await
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Every line typed on stdin becomes a request from one fixed identity.
pub struct ConsoleTransport {
    identity: Identity,
    scope: Scope,
    next_id: AtomicU64,
    sink: Arc<ConsoleSink>,
}

impl ConsoleTransport {
    pub fn new(identity: Identity, scope: Scope) -> Self {
        Self {
            identity,
            scope,
            next_id: AtomicU64::new(1),
            sink: Arc::new(ConsoleSink::new()),
        }
    }

    fn request(&self, command: String, arguments: Arguments) -> Request {
        Request::builder(command)
            .id(self.next_id.fetch_add(1, Ordering::Relaxed))
            .identity(self.identity.clone())
            .scope(self.scope)
            .arguments(arguments)
            .build()
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    async fn authenticate(&self, _token: &str) -> TransportResult<()> {
        debug!("Console transport accepts any token");
        Ok(())
    }

    fn reply_sink(&self) -> Arc<dyn ReplySink> {
        self.sink.clone()
    }

    async fn run(
        &self,
        requests: mpsc::Sender<Request>,
        shutdown: CancellationToken,
    ) -> TransportResult<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                info!("Console input closed");
                return Ok(());
            };
            let Some((command, arguments)) = parse_line(&line) else {
                continue;
            };
            if requests.send(self.request(command, arguments)).await.is_err() {
                return Ok(());
            }
        }
    }
}
