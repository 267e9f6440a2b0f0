//! Dice, coins and decisions.
//!
//! Linked into the catalogue through the `UNITS` distributed slice, so it is
//! picked up by `Catalogue::linked()` without being named in `main`.
//!
//! ```toml
//! [units.fun]
//! max_dice = 20
//! max_sides = 100
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use sprocket::framework::UNITS;
use sprocket::framework::linkme::distributed_slice;
use sprocket::prelude::*;
use thiserror::Error;

#[distributed_slice(UNITS)]
#[linkme(crate = sprocket::framework::linkme)]
static FUN: UnitDescriptor = UnitDescriptor {
    name: "fun",
    description: "Dice, coins and decisions",
    create,
};

fn create(ctx: &UnitContext) -> Result<Box<dyn Unit>, BoxError> {
    let config: FunConfig = ctx.config()?;
    Ok(Box::new(FunUnit {
        config: Arc::new(config),
    }))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FunConfig {
    pub max_dice: u32,
    pub max_sides: u32,
}

impl Default for FunConfig {
    fn default() -> Self {
        Self {
            max_dice: 100,
            max_sides: 1000,
        }
    }
}

struct FunUnit {
    config: Arc<FunConfig>,
}

// =============================================================================
// Dice
// =============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiceError {
    #[error("Invalid format. Use 'XdY' (e.g., 2d6) or 'dY' (e.g., d20).")]
    Format,
    #[error("Number of dice must be between 1 and {max}.")]
    TooManyDice { max: u32 },
    #[error("Number of sides per die must be between 2 and {max}.")]
    TooManySides { max: u32 },
}

/// Parses `XdY` / `dY` into `(count, sides)` within the configured limits.
pub fn parse_dice(notation: &str, config: &FunConfig) -> Result<(u32, u32), DiceError> {
    let notation = notation.trim().to_lowercase();
    let (count, sides) = notation.split_once('d').ok_or(DiceError::Format)?;
    let count = if count.is_empty() {
        1
    } else {
        count.parse::<u32>().map_err(|_| DiceError::Format)?
    };
    let sides = sides.parse::<u32>().map_err(|_| DiceError::Format)?;

    if !(1..=config.max_dice).contains(&count) {
        return Err(DiceError::TooManyDice {
            max: config.max_dice,
        });
    }
    if !(2..=config.max_sides).contains(&sides) {
        return Err(DiceError::TooManySides {
            max: config.max_sides,
        });
    }
    Ok((count, sides))
}

pub fn roll<R: Rng + ?Sized>(rng: &mut R, count: u32, sides: u32) -> Vec<u32> {
    (0..count).map(|_| rng.gen_range(1..=sides)).collect()
}

fn format_roll(notation: &str, rolls: &[u32]) -> String {
    let total: u32 = rolls.iter().sum();
    match rolls {
        [_] => format!("🎲 You rolled **{notation}**: **{total}**"),
        _ => {
            let each = rolls
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            format!("🎲 You rolled **{notation}**: `{each}` (total **{total}**)")
        }
    }
}

// =============================================================================
// Choices
// =============================================================================

fn split_options(options: &str) -> Result<Vec<&str>, HandlerError> {
    let choices: Vec<&str> = options
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    match choices.len() {
        0 => Err(HandlerError::user(
            "Please provide at least one option, separated by commas.",
        )),
        1 => Err(HandlerError::user(
            "Please provide at least two options for me to choose from!",
        )),
        _ => Ok(choices),
    }
}

#[async_trait]
impl Unit for FunUnit {
    async fn register(&self, registrar: &mut Registrar) -> Result<(), BoxError> {
        let config = Arc::clone(&self.config);
        registrar.command(
            Command::from_fn("fun roll", move |request, channel| {
                let config = Arc::clone(&config);
                async move {
                    let notation = request
                        .arguments()
                        .get("dice")
                        .map(ToString::to_string)
                        .ok_or_else(|| {
                            HandlerError::user("Please give a dice format such as `2d6` or `d20`.")
                        })?;
                    let (count, sides) = parse_dice(&notation, &config).map_err(|e| {
                        HandlerError::user(format!(
                            "Error: {e}\nPlease use a valid dice format (e.g., `2d6`, `d20`)."
                        ))
                    })?;
                    let rolls = roll(&mut rand::thread_rng(), count, sides);
                    channel
                        .reply(format_roll(&notation.to_lowercase(), &rolls), Visibility::Public)
                        .await?;
                    Ok(())
                }
            })
            .description("Rolls one or more dice"),
        );

        registrar.command(
            Command::from_fn("fun coinflip", |_, channel| async move {
                let face = if rand::thread_rng().gen_bool(0.5) {
                    "Heads"
                } else {
                    "Tails"
                };
                channel
                    .reply(format!("🪙 The coin landed on **{face}**!"), Visibility::Public)
                    .await?;
                Ok(())
            })
            .description("Flips a coin"),
        );

        registrar.command(
            Command::from_fn("fun choose", |request, channel| async move {
                let options = request.arguments().str("options").unwrap_or_default();
                let chosen = split_options(options)?
                    .choose(&mut rand::thread_rng())
                    .map(|c| c.to_string())
                    .unwrap_or_default();
                channel
                    .reply(format!("🤔 I choose **{chosen}**"), Visibility::Public)
                    .await?;
                Ok(())
            })
            .description("Picks one of several comma-separated options"),
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use sprocket_core::testing::RecordingSink;

    use super::*;
    use crate::units::harness;

    #[test]
    fn parse_dice_formats() {
        let config = FunConfig::default();
        assert_eq!(parse_dice("2d6", &config), Ok((2, 6)));
        assert_eq!(parse_dice("D20", &config), Ok((1, 20)));
        assert_eq!(parse_dice("20", &config), Err(DiceError::Format));
        assert_eq!(parse_dice("xd6", &config), Err(DiceError::Format));
        assert_eq!(
            parse_dice("0d6", &config),
            Err(DiceError::TooManyDice { max: 100 })
        );
        assert_eq!(
            parse_dice("1d1", &config),
            Err(DiceError::TooManySides { max: 1000 })
        );
    }

    #[test]
    fn configured_limits_apply() {
        let config = FunConfig {
            max_dice: 3,
            max_sides: 6,
        };
        assert!(parse_dice("3d6", &config).is_ok());
        assert_eq!(
            parse_dice("4d6", &config).unwrap_err().to_string(),
            "Number of dice must be between 1 and 3."
        );
    }

    #[test]
    fn rolls_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let rolls = roll(&mut rng, 50, 6);
        assert_eq!(rolls.len(), 50);
        assert!(rolls.iter().all(|r| (1..=6).contains(r)));
    }

    #[test]
    fn roll_formatting() {
        assert_eq!(format_roll("d20", &[14]), "🎲 You rolled **d20**: **14**");
        assert_eq!(
            format_roll("2d6", &[3, 5]),
            "🎲 You rolled **2d6**: `3, 5` (total **8**)"
        );
    }

    #[tokio::test]
    async fn choose_needs_two_options() {
        let sink = Arc::new(RecordingSink::new());
        let dispatcher = harness::dispatcher(FUN.definition(), sink.clone()).await;

        dispatcher
            .dispatch(harness::request("fun choose").argument("options", "tea").build())
            .await;
        dispatcher
            .dispatch(
                harness::request("fun choose")
                    .argument("options", "tea, coffee")
                    .build(),
            )
            .await;

        let contents = sink.contents();
        assert_eq!(
            contents[0],
            "Please provide at least two options for me to choose from!"
        );
        assert!(
            contents[1] == "🤔 I choose **tea**" || contents[1] == "🤔 I choose **coffee**"
        );
    }

    #[tokio::test]
    async fn invalid_dice_are_reported_privately() {
        let sink = Arc::new(RecordingSink::new());
        let dispatcher = harness::dispatcher(FUN.definition(), sink.clone()).await;

        dispatcher
            .dispatch(harness::request("fun roll").argument("dice", "banana").build())
            .await;

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].visibility(), Visibility::Private);
        assert!(sent[0].content().unwrap().starts_with("Error: Invalid format."));
    }
}
