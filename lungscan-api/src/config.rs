//! Configuration for lungscan-api
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments and environment variables (`--port`, `LUNGSCAN_PORT`, ...)
//! 2. TOML configuration file
//! 3. Built-in defaults (code constants)
//!
//! The TOML file is taken from `--config` / `LUNGSCAN_CONFIG`, otherwise from
//! `~/.config/lungscan/config.toml` or `/etc/lungscan/config.toml` when one
//! exists. Running without any file is fine.

use std::fmt;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use lungscan_core::{ArtifactPaths, ExtractorOptions, InputConvention};
use serde::Deserialize;
use thiserror::Error;

/// Key used in development when none is configured
pub const DEVELOPMENT_API_KEY: &str = "development-key";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("API key is required in production (set API_KEY or api_key in the config file)")]
    MissingApiKey,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => f.write_str("development"),
            Environment::Production => f.write_str("production"),
        }
    }
}

/// Command-line arguments for lungscan-api
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "lungscan-api")]
#[command(about = "Lung CT scan classification service")]
#[command(version)]
pub struct Args {
    /// Address to bind
    #[arg(long, env = "LUNGSCAN_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "LUNGSCAN_PORT")]
    pub port: Option<u16>,

    /// Shared secret expected in the X-API-Key header
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// TOML configuration file
    #[arg(short, long, env = "LUNGSCAN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the model artifacts
    #[arg(long, env = "LUNGSCAN_MODELS_DIR")]
    pub models_dir: Option<PathBuf>,

    /// Append logs to this file in addition to stderr
    #[arg(long, env = "LUNGSCAN_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Log to stderr only
    #[arg(long, conflicts_with = "log_file")]
    pub no_log_file: bool,

    /// Deployment environment
    #[arg(long = "env", env = "LUNGSCAN_ENV", value_enum)]
    pub environment: Option<Environment>,
}

impl Args {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            api_key: self.api_key.clone(),
            models_dir: self.models_dir.clone(),
            log_file: self.log_file.clone(),
            no_log_file: self.no_log_file,
            environment: self.environment,
        }
    }
}

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub api_key: Option<String>,
    pub models_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub no_log_file: bool,
    pub environment: Option<Environment>,
}

/// Configuration file contents
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub environment: Option<Environment>,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl TomlConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// `[models]` section
///
/// Each artifact path is optional; unset ones default to the standard file
/// name under `dir`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelsConfig {
    pub dir: Option<PathBuf>,
    pub primary_extractor: Option<PathBuf>,
    pub secondary_extractor: Option<PathBuf>,
    pub selector: Option<PathBuf>,
    pub classifier: Option<PathBuf>,
    pub normalization: Option<PathBuf>,
    pub secondary_input_convention: Option<InputConvention>,
    pub intra_threads: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path, appended to alongside stderr
    ///
    /// Defaults to `logs/api.log`; an empty string turns file logging off.
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// `[server]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from("logs/api.log"))
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub api_key: String,
    /// Set when `api_key` is the development fallback
    pub api_key_fallback: bool,
    pub environment: Environment,
    pub artifacts: ArtifactPaths,
    pub extractor: ExtractorOptions,
    pub logging: LoggingConfig,
    pub max_upload_bytes: usize,
}

impl Config {
    /// Merge CLI/env overrides over the file contents and defaults
    ///
    /// A models directory given on the command line replaces every artifact
    /// path from the file.
    pub fn resolve(toml: TomlConfig, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let environment = overrides
            .environment
            .or(toml.environment)
            .unwrap_or_default();

        let api_key = overrides
            .api_key
            .or(toml.api_key)
            .filter(|key| !key.trim().is_empty());
        let (api_key, api_key_fallback) = match (api_key, environment) {
            (Some(key), _) => (key, false),
            (None, Environment::Development) => (DEVELOPMENT_API_KEY.to_string(), true),
            (None, Environment::Production) => return Err(ConfigError::MissingApiKey),
        };

        let artifacts = match overrides.models_dir {
            Some(dir) => ArtifactPaths::under(dir),
            None => resolve_artifact_paths(&toml.models),
        };

        let defaults = ExtractorOptions::default();
        let extractor = ExtractorOptions {
            intra_threads: toml.models.intra_threads.unwrap_or(defaults.intra_threads),
            secondary_convention: toml
                .models
                .secondary_input_convention
                .unwrap_or(defaults.secondary_convention),
        };
        if extractor.intra_threads == 0 {
            return Err(ConfigError::Invalid("models.intra_threads must be at least 1".to_string()));
        }

        let max_upload_bytes = toml.server.max_upload_bytes;
        if max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("server.max_upload_bytes must be positive".to_string()));
        }

        let mut logging = toml.logging;
        if let Some(file) = overrides.log_file {
            logging.file = Some(file);
        }
        if overrides.no_log_file {
            logging.file = None;
        }
        logging.file = logging.file.filter(|file| !file.as_os_str().is_empty());

        Ok(Config {
            host: overrides.host.or(toml.host).unwrap_or_else(default_host),
            port: overrides.port.or(toml.port).unwrap_or_else(default_port),
            api_key,
            api_key_fallback,
            environment,
            artifacts,
            extractor,
            logging,
            max_upload_bytes,
        })
    }

    /// `host:port` for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn resolve_artifact_paths(models: &ModelsConfig) -> ArtifactPaths {
    let base = match &models.dir {
        Some(dir) => ArtifactPaths::under(dir),
        None => ArtifactPaths::default(),
    };
    ArtifactPaths {
        primary_extractor: models.primary_extractor.clone().unwrap_or(base.primary_extractor),
        secondary_extractor: models
            .secondary_extractor
            .clone()
            .unwrap_or(base.secondary_extractor),
        selector: models.selector.clone().unwrap_or(base.selector),
        classifier: models.classifier.clone().unwrap_or(base.classifier),
        normalization: models.normalization.clone().unwrap_or(base.normalization),
    }
}

/// Locate the configuration file
///
/// An explicit path must exist. Otherwise the per-user and then the
/// system-wide location are tried; `None` means run on defaults.
pub fn locate_config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            });
        }
        return Ok(Some(path.to_path_buf()));
    }

    let user_config = dirs::config_dir().map(|d| d.join("lungscan").join("config.toml"));
    let system_config = PathBuf::from("/etc/lungscan/config.toml");

    Ok(user_config
        .into_iter()
        .chain(std::iter::once(system_config))
        .find(|path| path.is_file()))
}
