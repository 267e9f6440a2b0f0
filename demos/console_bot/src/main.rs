//! Console Bot Example
//!
//! Runs a Sprocket bot whose "platform" is the terminal. Lines typed on stdin
//! become commands; replies are printed back.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package console-bot -- --owner-id 1
//! ```
//!
//! ```text
//! /fun roll dice=2d6
//! /util afk set message=back soon
//! /manage units
//! /manage reload unit=fun
//! /manage shutdown
//! ```

mod console;
mod units;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sprocket::core::{ChannelId, GuildId, Identity, Scope};
use sprocket::prelude::{SprocketConfig, SprocketRuntime};
use tracing::info;

use crate::console::ConsoleTransport;

#[derive(Debug, Parser)]
#[command(name = "console-bot", about = "Drive a Sprocket bot from the terminal")]
struct Args {
    /// Configuration file (defaults to sprocket.toml in the current directory).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. `production`.
    #[arg(short, long)]
    profile: Option<String>,

    /// Owner id used when the configuration does not set one.
    #[arg(long, default_value_t = 1)]
    owner_id: u64,

    /// User id the console speaks as. Defaults to the owner.
    #[arg(long)]
    as_user: Option<u64>,

    /// Display name the console speaks as.
    #[arg(long, default_value = "console")]
    name: String,

    /// Send commands as direct messages instead of from a server channel.
    #[arg(long)]
    direct: bool,
}

/// Lowest-priority settings so the demo starts without a config file.
fn console_defaults(owner_id: u64) -> SprocketConfig {
    let mut config = SprocketConfig::default();
    config.bot.token = "console".to_string();
    config.bot.owner_id = owner_id;
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = SprocketRuntime::builder().merge(console_defaults(args.owner_id));
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = args.profile {
        builder = builder.profile(profile);
    }

    // `fun` is linked through the unit slice; `utility` is added by hand.
    let runtime = builder.build()?.unit(units::utility::definition());

    let user_id = args.as_user.unwrap_or(runtime.config().bot.owner_id);
    let scope = if args.direct {
        Scope::Direct {
            channel_id: ChannelId(1),
        }
    } else {
        Scope::Guild {
            guild_id: GuildId(1),
            channel_id: ChannelId(1),
        }
    };

    info!(
        user = user_id,
        "Type commands such as `/fun roll dice=2d6`; Ctrl+D or `/manage shutdown` to quit"
    );

    let transport = ConsoleTransport::new(Identity::new(user_id, args.name), scope);
    runtime.run(Arc::new(transport)).await?;

    Ok(())
}
