//! Configuration schema definitions.
//!
//! ```toml
//! [bot]
//! token = "..."
//! owner_id = 123456789
//! disabled_units = ["music"]
//!
//! [logging]
//! level = "debug"
//! filters = { sprocket_framework = "trace" }
//!
//! [units.fun]
//! max_dice = 20
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SprocketConfig {
    /// Credentials, ownership and unit startup settings.
    #[serde(default)]
    pub bot: BotConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Free-form per-unit sections, keyed by unit name.
    #[serde(default)]
    pub units: HashMap<String, Value>,
}

// =============================================================================
// Bot
// =============================================================================

/// Bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Platform credential checked at startup.
    #[serde(default)]
    pub token: String,

    /// The single user allowed to run owner-only commands.
    #[serde(default)]
    pub owner_id: u64,

    /// Unit that hosts the lifecycle commands. It is never unloaded at runtime.
    #[serde(default = "default_management_unit")]
    pub management_unit: String,

    /// Load every catalogue unit on startup.
    #[serde(default = "default_autoload")]
    pub autoload: bool,

    /// Units skipped by autoload and reload-all.
    #[serde(default)]
    pub disabled_units: Vec<String>,

    /// How long in-flight requests may run after shutdown is requested.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            owner_id: 0,
            management_unit: default_management_unit(),
            autoload: default_autoload(),
            disabled_units: Vec::new(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl BotConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_management_unit() -> String {
    "manage".to_string()
}

fn default_autoload() -> bool {
    true
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line format of the log output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature.
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Rotation schedule for file output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEventConfig {
    /// One line when a `dispatch` or `lifecycle` span opens and one, with
    /// its busy/idle timing, when it closes.
    pub const LIFECYCLE: Self = Self {
        new: true,
        enter: false,
        exit: false,
        close: true,
    };

    pub const ALL: Self = Self {
        new: true,
        enter: true,
        exit: true,
        close: true,
    };
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    pub span_events: SpanEventConfig,
    pub thread_ids: bool,
    /// Include file and line of the call site.
    pub file_location: bool,
    /// Log file path, required when `output = "file"`.
    pub file_path: Option<PathBuf>,
    pub rotation: LogRotation,
    /// Rotated files to keep; `0` keeps all of them.
    pub max_files: u32,
    /// Per-module level overrides, e.g. `sprocket_framework = "debug"`.
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: None,
            rotation: LogRotation::Never,
            max_files: 5,
            filters: HashMap::new(),
        }
    }
}
