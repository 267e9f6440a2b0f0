//! Ping and AFK status.
//!
//! The AFK table belongs to the unit instance: reloading the unit clears it.

use std::sync::Arc;

use async_trait::async_trait;
use sprocket::prelude::*;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::debug;

pub const UNIT: &str = "utility";

pub fn definition() -> UnitDefinition {
    UnitDefinition::new(UNIT, |_| {
        Ok(UtilityUnit {
            afk: Arc::new(KeyedStore::new()),
        })
    })
    .description("Ping and AFK status")
}

#[derive(Debug, Clone)]
struct AfkStatus {
    message: String,
    since: OffsetDateTime,
}

impl AfkStatus {
    fn since_label(&self) -> String {
        self.since
            .format(format_description!("[hour]:[minute] UTC"))
            .unwrap_or_else(|_| "a while".to_string())
    }
}

struct UtilityUnit {
    afk: Arc<KeyedStore<UserId, AfkStatus>>,
}

#[async_trait]
impl Unit for UtilityUnit {
    async fn register(&self, registrar: &mut Registrar) -> Result<(), BoxError> {
        registrar.command(
            Command::from_fn("util ping", |request, channel| async move {
                let waited = request.received_at().elapsed().as_millis();
                channel
                    .reply(format!("Pong! ({waited} ms)"), Visibility::Public)
                    .await?;
                Ok(())
            })
            .description("Checks that the bot is responsive"),
        );

        let afk = Arc::clone(&self.afk);
        registrar.command(
            Command::from_fn("util afk set", move |request, channel| {
                let afk = Arc::clone(&afk);
                async move {
                    let message = request
                        .arguments()
                        .str("message")
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .unwrap_or("AFK")
                        .to_string();

                    let mut slot = afk.lock(request.identity().user_id).await;
                    if slot.is_some() {
                        return Err(HandlerError::user(
                            "You are already AFK. Use `/util afk remove` to remove it.",
                        ));
                    }
                    *slot = Some(AfkStatus {
                        message: message.clone(),
                        since: OffsetDateTime::now_utc(),
                    });
                    drop(slot);

                    channel
                        .reply(format!("You are now AFK. Message: {message}"), Visibility::Private)
                        .await?;
                    Ok(())
                }
            })
            .description("Sets your AFK status")
            .require(GuildOnly),
        );

        let afk = Arc::clone(&self.afk);
        registrar.command(
            Command::from_fn("util afk remove", move |request, channel| {
                let afk = Arc::clone(&afk);
                async move {
                    afk.remove(&request.identity().user_id)
                        .await
                        .ok_or_else(|| HandlerError::user("You are not currently AFK."))?;
                    channel
                        .reply("Your AFK status has been removed.", Visibility::Private)
                        .await?;
                    Ok(())
                }
            })
            .description("Removes your AFK status")
            .require(GuildOnly),
        );

        let afk = Arc::clone(&self.afk);
        registrar.command(
            Command::from_fn("util afk status", move |request, channel| {
                let afk = Arc::clone(&afk);
                async move {
                    let (user, subject) = match request.arguments().user("user") {
                        Some(user) if user != request.identity().user_id => {
                            (user, format!("<@{user}> is"))
                        }
                        _ => (request.identity().user_id, "You are".to_string()),
                    };
                    let text = match afk.get(&user).await {
                        Some(status) => format!(
                            "{subject} AFK since {}: {}",
                            status.since_label(),
                            status.message
                        ),
                        None => format!("{subject} not AFK."),
                    };
                    channel.reply(text, Visibility::Private).await?;
                    Ok(())
                }
            })
            .description("Shows whether someone is AFK"),
        );

        Ok(())
    }

    async fn teardown(&self) -> Result<(), BoxError> {
        let entries = self.afk.len().await;
        debug!(entries, "Dropping AFK table");
        Ok(())
    }
}
