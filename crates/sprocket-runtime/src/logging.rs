//! Logging setup on `tracing-subscriber`.
//!
//! The framework opens a `dispatch` span per request and a `lifecycle` span
//! per unit operation. [`SpanEventConfig`] decides whether their opening and
//! closing are logged.
//!
//! ```rust,ignore
//! use sprocket_runtime::{config::load_config, logging};
//!
//! let config = load_config()?;
//! logging::init_from_config(&config.logging);
//! ```
//!
//! Without a config file:
//!
//! ```rust,ignore
//! use sprocket_runtime::config::{LogLevel, SpanEventConfig};
//! use sprocket_runtime::logging::LoggingBuilder;
//!
//! LoggingBuilder::new()
//!     .level(LogLevel::Debug)
//!     .directive("sprocket_framework::lifecycle=trace")
//!     .span_events(SpanEventConfig::LIFECYCLE)
//!     .init();
//! ```
//!
//! `RUST_LOG`, when set, replaces the base level. Per-target filters and
//! directives still apply on top of it.

use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{
    LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, SpanEventConfig,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Prefix used when `file_path` has no file name component.
const DEFAULT_LOG_FILE: &str = "sprocket.log";

/// Installs the global subscriber described by `config`.
///
/// A subscriber that is already installed is left in place.
pub fn init_from_config(config: &LoggingConfig) {
    LoggingBuilder::from_config(config).init();
}

fn fmt_span(events: &SpanEventConfig) -> FmtSpan {
    [
        (events.new, FmtSpan::NEW),
        (events.enter, FmtSpan::ENTER),
        (events.exit, FmtSpan::EXIT),
        (events.close, FmtSpan::CLOSE),
    ]
    .into_iter()
    .filter(|(enabled, _)| *enabled)
    .fold(FmtSpan::NONE, |acc, (_, span)| acc | span)
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Never => Rotation::NEVER,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
        }
    }
}

// =============================================================================
// LoggingBuilder
// =============================================================================

/// Programmatic counterpart of the `[logging]` section.
#[derive(Debug, Clone, Default)]
pub struct LoggingBuilder {
    config: LoggingConfig,
    directives: Vec<String>,
    hide_target: bool,
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        Self {
            config: config.clone(),
            ..Self::default()
        }
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    /// Adds a raw `EnvFilter` directive such as `sprocket_runtime=trace`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn span_events(mut self, events: SpanEventConfig) -> Self {
        self.config.span_events = events;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.config.output = output;
        self
    }

    /// Writes to `path`, rotating per `rotation`.
    pub fn file(mut self, path: impl Into<PathBuf>, rotation: LogRotation) -> Self {
        self.config.output = LogOutput::File;
        self.config.file_path = Some(path.into());
        self.config.rotation = rotation;
        self
    }

    /// Rotated files to keep. `0` keeps all of them.
    pub fn max_files(mut self, count: u32) -> Self {
        self.config.max_files = count;
        self
    }

    pub fn thread_ids(mut self, enabled: bool) -> Self {
        self.config.thread_ids = enabled;
        self
    }

    pub fn file_location(mut self, enabled: bool) -> Self {
        self.config.file_location = enabled;
        self
    }

    pub fn hide_target(mut self) -> Self {
        self.hide_target = true;
        self
    }

    /// Per-target filters (sorted by target) followed by raw directives.
    fn directives(&self) -> Vec<String> {
        let mut targets: Vec<_> = self.config.filters.iter().collect();
        targets.sort_by(|a, b| a.0.cmp(b.0));
        targets
            .into_iter()
            .map(|(target, level)| format!("{target}={level}"))
            .chain(self.directives.iter().cloned())
            .collect()
    }

    fn filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.config.level.as_str()));
        for directive in self.directives() {
            match directive.parse() {
                Ok(parsed) => filter = filter.add_directive(parsed),
                Err(e) => eprintln!("Ignoring invalid log directive {directive:?}: {e}"),
            }
        }
        filter
    }

    fn file_appender(&self) -> Result<RollingFileAppender, String> {
        let path = self
            .config
            .file_path
            .as_deref()
            .ok_or_else(|| "no logging.file_path configured".to_string())?;
        let (directory, prefix) = split_log_path(path);

        let mut builder = RollingFileAppender::builder()
            .rotation(self.config.rotation.into())
            .filename_prefix(prefix);
        if self.config.max_files > 0 && self.config.rotation != LogRotation::Never {
            builder = builder.max_log_files(self.config.max_files as usize);
        }
        builder
            .build(directory)
            .map_err(|e| format!("cannot open {}: {e}", path.display()))
    }

    /// The writer for the configured output, and why it was replaced by
    /// stdout if the log file could not be opened.
    fn writer(&self) -> (BoxMakeWriter, Option<String>) {
        match self.config.output {
            LogOutput::Stdout => (BoxMakeWriter::new(std::io::stdout), None),
            LogOutput::Stderr => (BoxMakeWriter::new(std::io::stderr), None),
            LogOutput::File => match self.file_appender() {
                Ok(appender) => (BoxMakeWriter::new(appender), None),
                Err(reason) => (BoxMakeWriter::new(std::io::stdout), Some(reason)),
            },
        }
    }

    fn fmt_layer(&self, writer: BoxMakeWriter) -> BoxedLayer {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_span_events(fmt_span(&self.config.span_events))
            .with_target(!self.hide_target)
            .with_thread_ids(self.config.thread_ids)
            .with_file(self.config.file_location)
            .with_line_number(self.config.file_location);

        match self.config.format {
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Full => layer.boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            #[cfg(feature = "json-log")]
            LogFormat::Json => layer.json().boxed(),
            #[cfg(not(feature = "json-log"))]
            LogFormat::Json => layer.boxed(),
        }
    }

    /// Installs the subscriber unless one is already installed.
    pub fn init(self) {
        let _ = self.try_init();
    }

    pub fn try_init(self) -> Result<(), TryInitError> {
        let (writer, fallback) = self.writer();
        tracing_subscriber::registry()
            .with(self.fmt_layer(writer))
            .with(self.filter())
            .try_init()?;

        if let Some(reason) = fallback {
            warn!(%reason, "Log file unavailable, logging to stdout");
        }
        if cfg!(not(feature = "json-log")) && self.config.format == LogFormat::Json {
            warn!("JSON logs need the `json-log` feature, using the full format");
        }
        Ok(())
    }
}

/// Splits a configured log path into the appender directory and file prefix.
fn split_log_path(path: &Path) -> (&Path, String) {
    let directory = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());
    (directory, prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_presets() {
        assert_eq!(fmt_span(&SpanEventConfig::default()), FmtSpan::NONE);
        assert_eq!(
            fmt_span(&SpanEventConfig::LIFECYCLE),
            FmtSpan::NEW | FmtSpan::CLOSE
        );
        assert_eq!(fmt_span(&SpanEventConfig::ALL), FmtSpan::FULL);
    }

    #[test]
    fn filters_are_sorted_before_raw_directives() {
        let mut config = LoggingConfig::default();
        config
            .filters
            .insert("sprocket_runtime".to_string(), LogLevel::Debug);
        config
            .filters
            .insert("sprocket_framework".to_string(), LogLevel::Trace);

        let builder = LoggingBuilder::from_config(&config).directive("h2=off");
        assert_eq!(
            builder.directives(),
            vec!["sprocket_framework=trace", "sprocket_runtime=debug", "h2=off"]
        );
    }

    #[test]
    fn log_paths() {
        assert_eq!(
            split_log_path(Path::new("logs/bot.log")),
            (Path::new("logs"), "bot.log".to_string())
        );
        assert_eq!(
            split_log_path(Path::new("bot.log")),
            (Path::new("."), "bot.log".to_string())
        );
    }

    #[test]
    fn file_output_without_path_falls_back() {
        let builder = LoggingBuilder::new().output(LogOutput::File);
        let (_, fallback) = builder.writer();
        assert!(fallback.is_some_and(|reason| reason.contains("file_path")));
    }
}
