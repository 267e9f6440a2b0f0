//! Layered configuration loading on figment.
//!
//! Sources, lowest priority first:
//!
//! 1. built-in defaults;
//! 2. overrides passed to [`ConfigLoader::merge`];
//! 3. the profile overlay, `sprocket.<profile>.toml`;
//! 4. the main file, `sprocket.toml` (or `config.toml`);
//! 5. `SPROCKET_*` environment variables, `__` separating sections:
//!    `SPROCKET_BOT__TOKEN`, `SPROCKET_UNITS__FUN__MAX_DICE`.
//!
//! YAML files (`sprocket.yaml`, `sprocket.yml`, ...) are searched as well with
//! the `yaml-config` feature. `SPROCKET_PROFILE` picks the profile and is not
//! mapped into the schema.
//!
//! ```rust,ignore
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./deploy/sprocket.toml")
//!     .load_validated()?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use figment::providers::Format;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::SprocketConfig;
use super::validation::validate_config;

/// Environment variable selecting the profile.
pub const PROFILE_ENV: &str = "SPROCKET_PROFILE";

const ENV_PREFIX: &str = "SPROCKET_";

/// Directory under the platform config dir, e.g. `~/.config/sprocket`.
const USER_DIR: &str = "sprocket";

// =============================================================================
// Profile
// =============================================================================

/// A named configuration profile such as `production`.
///
/// `dev` and `prod` are accepted as shorthands. The default is `development`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile(String);

impl Profile {
    pub fn parse(name: &str) -> Self {
        let name = name.trim().to_lowercase();
        Self(match name.as_str() {
            "dev" => "development".to_string(),
            "prod" => "production".to_string(),
            _ => name,
        })
    }

    /// Reads [`PROFILE_ENV`], falling back to the default profile.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_ENV)
            .map(|name| Self::parse(&name))
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `sprocket.toml` becomes `sprocket.<profile>.toml`.
    fn overlay_name(&self, file_name: &str) -> String {
        match file_name.rsplit_once('.') {
            Some((stem, ext)) => format!("{stem}.{}.{ext}", self.0),
            None => format!("{file_name}.{}", self.0),
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self("development".to_string())
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// File formats
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    #[cfg(feature = "toml-config")]
    Toml,
    #[cfg(feature = "yaml-config")]
    Yaml,
}

impl FileFormat {
    /// Compiled-in formats, in search order.
    const ENABLED: &'static [FileFormat] = &[
        #[cfg(feature = "toml-config")]
        FileFormat::Toml,
        #[cfg(feature = "yaml-config")]
        FileFormat::Yaml,
    ];

    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            #[cfg(feature = "toml-config")]
            "toml" => Some(Self::Toml),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }

    /// Main file names, most specific first.
    fn file_names(self) -> &'static [&'static str] {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => &["sprocket.toml", "config.toml"],
            #[cfg(feature = "yaml-config")]
            Self::Yaml => &["sprocket.yaml", "sprocket.yml", "config.yaml", "config.yml"],
        }
    }

    #[cfg_attr(
        not(any(feature = "toml-config", feature = "yaml-config")),
        allow(unused_variables)
    )]
    fn merge_into(self, figment: Figment, path: &Path) -> Figment {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => figment.merge(figment::providers::Toml::file(path)),
            #[cfg(feature = "yaml-config")]
            Self::Yaml => figment.merge(figment::providers::Yaml::file(path)),
        }
    }
}

// =============================================================================
// ConfigLoader
// =============================================================================

/// Builds a [`SprocketConfig`] from defaults, files and the environment.
pub struct ConfigLoader {
    overrides: Figment,
    profile: Profile,
    search_dirs: Vec<PathBuf>,
    file: Option<PathBuf>,
    env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// A loader for the profile named by `SPROCKET_PROFILE`, reading the
    /// environment and searching the current and user config directories
    /// unless [`search_path`](Self::search_path) is given.
    pub fn new() -> Self {
        Self {
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_dirs: Vec::new(),
            file: None,
            env: true,
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a directory to search, after the ones already added.
    pub fn search_path<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.search_dirs.push(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.search_path(dir.join(USER_DIR)),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching. It must exist.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.env = false;
        self
    }

    /// Layers `config` above the defaults. Files and environment variables
    /// still override it.
    pub fn merge(mut self, config: SprocketConfig) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(config));
        self
    }

    /// Extracts the configuration without validating it.
    pub fn load(self) -> ConfigResult<SprocketConfig> {
        let profile = self.profile.clone();
        let config: SprocketConfig = self.figment()?.extract()?;
        debug!(
            %profile,
            level = %config.logging.level,
            unit_sections = config.units.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// [`load`](Self::load) followed by [`validate_config`].
    pub fn load_validated(self) -> ConfigResult<SprocketConfig> {
        let config = self.load()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        if !self.search_dirs.is_empty() {
            return self.search_dirs.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join(USER_DIR)))
            .collect()
    }

    /// Files to merge, lowest priority first.
    ///
    /// For each format the first directory holding one of its main files
    /// wins; that file's profile overlay is merged right before it.
    fn discover(&self) -> Vec<PathBuf> {
        let dirs = self.search_dirs();
        let mut files = Vec::new();
        for &format in FileFormat::ENABLED {
            'format: for dir in &dirs {
                for name in format.file_names() {
                    let overlay = dir.join(self.profile.overlay_name(name));
                    if overlay.is_file() {
                        files.push(overlay);
                    }
                    let main = dir.join(name);
                    if main.is_file() {
                        files.push(main);
                        break 'format;
                    }
                }
            }
        }
        if files.is_empty() {
            warn!(search_dirs = ?dirs, "No configuration file found, using defaults");
        }
        files
    }

    fn figment(self) -> ConfigResult<Figment> {
        let files = match &self.file {
            Some(path) if !path.is_file() => return Err(ConfigError::FileNotFound(path.clone())),
            Some(path) => vec![path.clone()],
            None => self.discover(),
        };

        let mut figment =
            Figment::from(Serialized::defaults(SprocketConfig::default())).merge(self.overrides);
        for path in &files {
            let format = FileFormat::from_path(path).ok_or_else(|| {
                ConfigError::Parse(format!(
                    "{} is not in an enabled configuration format",
                    path.display()
                ))
            })?;
            info!(path = %path.display(), "Reading configuration file");
            figment = format.merge_into(figment, path);
        }

        if self.env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["PROFILE"]).split("__"));
        }
        Ok(figment)
    }
}

/// Loads and validates configuration from the current directory and the
/// user config directory.
pub fn load_config() -> ConfigResult<SprocketConfig> {
    ConfigLoader::new()
        .with_current_dir()
        .with_user_config_dir()
        .load_validated()
}

/// Loads and validates one specific file.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<SprocketConfig> {
    ConfigLoader::new().file(path).load_validated()
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;
    use crate::config::schema::LogLevel;

    #[test]
    fn defaults_without_files() {
        Jail::expect_with(|jail| {
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.logging.level, LogLevel::Info);
            assert_eq!(config.bot.management_unit, "manage");
            assert!(config.bot.autoload);
            assert_eq!(config.bot.shutdown_grace_secs, 10);
            Ok(())
        });
    }

    #[test]
    fn profile_names() {
        assert_eq!(Profile::parse(" PROD "), Profile::parse("production"));
        assert_eq!(Profile::parse("dev").as_str(), "development");
        assert_eq!(Profile::parse("Staging").as_str(), "staging");
        assert_eq!(Profile::default().overlay_name("sprocket.toml"), "sprocket.development.toml");
    }

    #[test]
    fn profile_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env(PROFILE_ENV, "prod");
            assert_eq!(Profile::from_env().as_str(), "production");
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn discovery_order() {
        Jail::expect_with(|jail| {
            let nested = jail.directory().join("nested");
            std::fs::create_dir(&nested).map_err(|e| e.to_string())?;
            jail.create_file("nested/sprocket.toml", "")?;
            jail.create_file("sprocket.staging.toml", "")?;
            jail.create_file("config.toml", "")?;

            let files = ConfigLoader::new()
                .profile("staging")
                .search_path(jail.directory())
                .search_path(&nested)
                .discover();

            let names: Vec<_> = files
                .iter()
                .map(|p| p.strip_prefix(jail.directory()).unwrap().to_path_buf())
                .collect();
            assert_eq!(
                names,
                vec![
                    PathBuf::from("sprocket.staging.toml"),
                    PathBuf::from("config.toml")
                ]
            );
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "sprocket.toml",
                r#"
                [bot]
                token = "from-file"
                owner_id = 1
                disabled_units = ["music"]

                [logging]
                level = "debug"

                [units.fun]
                max_dice = 20
                "#,
            )?;
            jail.set_env("SPROCKET_BOT__OWNER_ID", "99");
            jail.set_env(PROFILE_ENV, "production");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.bot.token, "from-file");
            assert_eq!(config.bot.owner_id, 99);
            assert_eq!(config.bot.disabled_units, vec!["music".to_string()]);
            assert_eq!(config.logging.level, LogLevel::Debug);
            assert_eq!(config.units["fun"]["max_dice"], 20);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn main_file_overrides_profile_overlay() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "sprocket.staging.toml",
                "[bot]\ntoken = \"overlay\"\nshutdown_grace_secs = 3\n",
            )?;
            jail.create_file("sprocket.toml", "[bot]\ntoken = \"main\"\n")?;

            let config = ConfigLoader::new()
                .profile("staging")
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.bot.token, "main");
            assert_eq!(config.bot.shutdown_grace_secs, 3);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn unknown_log_level_is_a_parse_error() {
        Jail::expect_with(|jail| {
            jail.create_file("sprocket.toml", "[logging]\nlevel = \"loud\"\n")?;

            let result = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load();
            assert!(matches!(result, Err(ConfigError::Parse(_))));
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn placeholder_token_fails_validation() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "sprocket.toml",
                "[bot]\ntoken = \"YOUR_BOT_TOKEN\"\nowner_id = 5\n",
            )?;

            let result = load_config_from_file(jail.directory().join("sprocket.toml"));
            assert!(matches!(result, Err(ConfigError::PlaceholderToken)));
            Ok(())
        });
    }

    #[test]
    fn explicit_file_must_exist() {
        let result = ConfigLoader::new()
            .file("/definitely/not/here/sprocket.toml")
            .without_env()
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn explicit_file_needs_a_known_extension() {
        Jail::expect_with(|jail| {
            jail.create_file("sprocket.ini", "token = x")?;
            let result = ConfigLoader::new()
                .file(jail.directory().join("sprocket.ini"))
                .without_env()
                .load();
            assert!(matches!(result, Err(ConfigError::Parse(_))));
            Ok(())
        });
    }

    #[test]
    fn programmatic_merge_sits_under_files() {
        Jail::expect_with(|jail| {
            let mut overrides = SprocketConfig::default();
            overrides.bot.owner_id = 7;
            overrides.bot.autoload = false;

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .merge(overrides)
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.bot.owner_id, 7);
            assert!(!config.bot.autoload);
            Ok(())
        });
    }
}
