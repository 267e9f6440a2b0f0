//! Checks run on a loaded configuration before the bot starts.
//!
//! Unknown enum values (log levels, formats) never get here: they already
//! fail extraction with [`ConfigError::Parse`].

use super::error::{ConfigError, ConfigResult};
use super::schema::{BotConfig, LogOutput, LoggingConfig, SprocketConfig};

/// Token value shipped in sample configuration files.
pub const PLACEHOLDER_TOKEN: &str = "YOUR_BOT_TOKEN";

pub fn validate_config(config: &SprocketConfig) -> ConfigResult<()> {
    check_bot(&config.bot)?;
    check_logging(&config.logging)
}

fn check_bot(bot: &BotConfig) -> ConfigResult<()> {
    match bot.token.trim() {
        "" => return Err(ConfigError::missing("bot.token")),
        token if token.eq_ignore_ascii_case(PLACEHOLDER_TOKEN) => {
            return Err(ConfigError::PlaceholderToken);
        }
        _ => {}
    }
    if bot.owner_id == 0 {
        return Err(ConfigError::missing("bot.owner_id"));
    }

    let host = bot.management_unit.trim();
    if host.is_empty() {
        return Err(ConfigError::missing("bot.management_unit"));
    }
    if bot
        .disabled_units
        .iter()
        .any(|unit| unit.trim().eq_ignore_ascii_case(host))
    {
        return Err(ConfigError::invalid(
            "bot.disabled_units",
            format!("the management unit `{host}` cannot be disabled"),
        ));
    }

    if bot.shutdown_grace_secs == 0 {
        return Err(ConfigError::invalid(
            "bot.shutdown_grace_secs",
            "must be at least 1 second",
        ));
    }
    Ok(())
}

fn check_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing("logging.file_path"));
    }

    // Keys become `target=level` filter directives.
    let malformed = logging
        .filters
        .keys()
        .find(|target| target.trim().is_empty() || target.contains(['=', ',', ' ']));
    if let Some(target) = malformed {
        return Err(ConfigError::invalid(
            "logging.filters",
            format!("{target:?} is not a log target"),
        ));
    }
    Ok(())
}
