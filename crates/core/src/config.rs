//! Layered application config.
//!
//! Sources are merged in order: built-in defaults, a `resq.toml` file (with
//! `${VAR}` interpolation), `RESQ_*` environment variables, then explicit
//! overrides. The merged result is validated once at the end.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CONFIG_CANDIDATES: [&str; 2] = ["resq.toml", "config/resq.toml"];
const MAX_TIMEOUT_SECS: u64 = 300;

/// Every settable key with the environment variables that feed it, highest
/// priority first.
pub const CONFIG_KEYS: [(&str, &[&str]); 11] = [
    ("backend.mode", &["RESQ_BACKEND_MODE"]),
    ("backend.base_url", &["RESQ_BACKEND_BASE_URL"]),
    ("backend.api_key", &["RESQ_BACKEND_API_KEY"]),
    ("backend.access_token", &["RESQ_BACKEND_ACCESS_TOKEN"]),
    ("backend.user_id", &["RESQ_BACKEND_USER_ID"]),
    ("backend.submit_timeout_secs", &["RESQ_BACKEND_SUBMIT_TIMEOUT_SECS"]),
    ("database.url", &["RESQ_DATABASE_URL"]),
    ("database.max_connections", &["RESQ_DATABASE_MAX_CONNECTIONS"]),
    ("database.timeout_secs", &["RESQ_DATABASE_TIMEOUT_SECS"]),
    ("logging.level", &["RESQ_LOGGING_LEVEL", "RESQ_LOG_LEVEL"]),
    ("logging.format", &["RESQ_LOGGING_FORMAT", "RESQ_LOG_FORMAT"]),
];

/// Where the effective value of a key came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    Default,
    File(PathBuf),
    Env(&'static str),
    Override,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::File(path) => write!(f, "file ({})", path.display()),
            Self::Env(key) => write!(f, "env ({key})"),
            Self::Override => f.write_str("override"),
        }
    }
}

/// Source of each key in [`CONFIG_KEYS`] after loading.
pub type ConfigSources = BTreeMap<&'static str, ConfigSource>;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub mode: BackendMode,
    pub base_url: Option<String>,
    /// Public project key sent with every hosted request.
    pub api_key: Option<SecretString>,
    pub access_token: Option<SecretString>,
    pub user_id: Option<String>,
    pub submit_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Where submissions are persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Local SQLite database.
    Local,
    /// Hosted REST backend.
    Remote,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub backend_mode: Option<BackendMode>,
    pub base_url: Option<String>,
    pub user_id: Option<String>,
    pub database_url: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("cannot parse `{path}`: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("config file `{0}` does not exist")]
    MissingFile(PathBuf),
    #[error("`${{{0}}}` is referenced in the config file but not set")]
    UnsetVariable(String),
    #[error("`${{` at byte {0} has no closing brace")]
    UnterminatedVariable(usize),
    #[error("{key}=`{value}` is not a valid value")]
    InvalidEnv { key: String, value: String },
    #[error("{key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { key, reason: reason.into() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                mode: BackendMode::Local,
                base_url: None,
                api_key: None,
                access_token: None,
                user_id: None,
                submit_timeout_secs: 15,
            },
            database: DatabaseConfig {
                url: "sqlite://resq.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl FromStr for BackendMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(ConfigError::invalid("backend.mode", format!("`{other}` is not local|remote"))),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::invalid(
                "logging.format",
                format!("`{other}` is not compact|pretty|json"),
            )),
        }
    }
}

impl BackendConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn has_access_token(&self) -> bool {
        is_present(self.access_token.as_ref())
    }

    fn check(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.submit_timeout_secs) {
            return Err(ConfigError::invalid(
                "backend.submit_timeout_secs",
                format!("must be between 1 and {MAX_TIMEOUT_SECS}"),
            ));
        }

        let base_url = self.base_url.as_deref().map(str::trim).filter(|url| !url.is_empty());
        if let Some(url) = base_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(ConfigError::invalid("backend.base_url", "must be an http(s) URL"));
            }
        }

        if self.mode == BackendMode::Remote {
            if base_url.is_none() {
                return Err(ConfigError::invalid("backend.base_url", "required in remote mode"));
            }
            if !is_present(self.api_key.as_ref()) {
                return Err(ConfigError::invalid(
                    "backend.api_key",
                    "required in remote mode (the project's public anon key)",
                ));
            }
        }
        Ok(())
    }
}

impl DatabaseConfig {
    fn check(&self) -> Result<(), ConfigError> {
        let url = self.url.trim();
        if !(url.starts_with("sqlite:") || url == ":memory:") {
            return Err(ConfigError::invalid(
                "database.url",
                "must be a sqlite URL such as `sqlite://resq.db` or `sqlite::memory:`",
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::invalid("database.max_connections", "must be at least 1"));
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            return Err(ConfigError::invalid(
                "database.timeout_secs",
                format!("must be between 1 and {MAX_TIMEOUT_SECS}"),
            ));
        }
        Ok(())
    }
}

impl LoggingConfig {
    fn check(&self) -> Result<(), ConfigError> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if LEVELS.contains(&self.level.trim().to_ascii_lowercase().as_str()) {
            Ok(())
        } else {
            Err(ConfigError::invalid("logging.level", format!("must be one of {}", LEVELS.join("|"))))
        }
    }
}

fn is_present(secret: Option<&SecretString>) -> bool {
    secret.is_some_and(|value| !value.expose_secret().trim().is_empty())
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        Self::load_traced(options).map(|(config, _)| config)
    }

    /// Loads like [`AppConfig::load`] and also reports which layer set each key.
    pub fn load_traced(options: LoadOptions) -> Result<(Self, ConfigSources), ConfigError> {
        let mut config = Self::default();
        let mut sources =
            CONFIG_KEYS.iter().map(|(key, _)| (*key, ConfigSource::Default)).collect::<ConfigSources>();

        match find_config_file(options.config_path.as_deref()) {
            Some(path) => {
                let layer = ConfigLayer::from_file(&path)?;
                for key in layer.present_keys() {
                    sources.insert(key, ConfigSource::File(path.clone()));
                }
                config.merge(layer);
            }
            None if options.require_file => {
                let expected =
                    options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_CANDIDATES[0]));
                return Err(ConfigError::MissingFile(expected));
            }
            None => {}
        }

        let from_env = ConfigLayer::from_env()?;
        for key in from_env.present_keys() {
            if let Some(var) = env_source(key) {
                sources.insert(key, ConfigSource::Env(var));
            }
        }
        config.merge(from_env);

        let overrides = ConfigLayer::from(options.overrides);
        for key in overrides.present_keys() {
            sources.insert(key, ConfigSource::Override);
        }
        config.merge(overrides);

        config.validate()?;
        Ok((config, sources))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend.check()?;
        self.database.check()?;
        self.logging.check()
    }

    fn merge(&mut self, layer: ConfigLayer) {
        let backend = layer.backend;
        let target = &mut self.backend;
        replace(&mut target.mode, backend.mode);
        merge_opt(&mut target.base_url, backend.base_url);
        merge_opt(&mut target.api_key, backend.api_key.map(SecretString::from));
        merge_opt(&mut target.access_token, backend.access_token.map(SecretString::from));
        merge_opt(&mut target.user_id, backend.user_id);
        replace(&mut target.submit_timeout_secs, backend.submit_timeout_secs);

        let database = layer.database;
        replace(&mut self.database.url, database.url);
        replace(&mut self.database.max_connections, database.max_connections);
        replace(&mut self.database.timeout_secs, database.timeout_secs);

        replace(&mut self.logging.level, layer.logging.level);
        replace(&mut self.logging.format, layer.logging.format);
    }
}

fn replace<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn merge_opt<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => path.exists().then(|| path.to_path_buf()),
        None => CONFIG_CANDIDATES.iter().map(PathBuf::from).find(|path| path.exists()),
    }
}

/// Replaces every `${NAME}` with the value of that environment variable.
fn interpolate(raw: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(raw.len());
    let mut rest = raw;
    let mut offset = 0;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(ConfigError::UnterminatedVariable(offset + start))?;
        let name = &after[..end];
        let value = env::var(name).map_err(|_| ConfigError::UnsetVariable(name.to_string()))?;
        output.push_str(&value);

        let consumed = start + 2 + end + 1;
        offset += consumed;
        rest = &rest[consumed..];
    }
    output.push_str(rest);
    Ok(output)
}

/// One source of settings; unset keys leave earlier layers untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigLayer {
    backend: BackendLayer,
    database: DatabaseLayer,
    logging: LoggingLayer,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BackendLayer {
    mode: Option<BackendMode>,
    base_url: Option<String>,
    api_key: Option<String>,
    access_token: Option<String>,
    user_id: Option<String>,
    submit_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DatabaseLayer {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LoggingLayer {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl ConfigLayer {
    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        toml::from_str(&interpolate(&raw)?)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            backend: BackendLayer {
                mode: env_parsed("backend.mode")?,
                base_url: env_text("backend.base_url"),
                api_key: env_text("backend.api_key"),
                access_token: env_text("backend.access_token"),
                user_id: env_text("backend.user_id"),
                submit_timeout_secs: env_parsed("backend.submit_timeout_secs")?,
            },
            database: DatabaseLayer {
                url: env_text("database.url"),
                max_connections: env_parsed("database.max_connections")?,
                timeout_secs: env_parsed("database.timeout_secs")?,
            },
            logging: LoggingLayer {
                level: env_text("logging.level"),
                format: env_parsed("logging.format")?,
            },
        })
    }

    fn present_keys(&self) -> Vec<&'static str> {
        let (backend, database, logging) = (&self.backend, &self.database, &self.logging);
        [
            ("backend.mode", backend.mode.is_some()),
            ("backend.base_url", backend.base_url.is_some()),
            ("backend.api_key", backend.api_key.is_some()),
            ("backend.access_token", backend.access_token.is_some()),
            ("backend.user_id", backend.user_id.is_some()),
            ("backend.submit_timeout_secs", backend.submit_timeout_secs.is_some()),
            ("database.url", database.url.is_some()),
            ("database.max_connections", database.max_connections.is_some()),
            ("database.timeout_secs", database.timeout_secs.is_some()),
            ("logging.level", logging.level.is_some()),
            ("logging.format", logging.format.is_some()),
        ]
        .into_iter()
        .filter_map(|(key, set)| set.then_some(key))
        .collect()
    }
}

impl From<ConfigOverrides> for ConfigLayer {
    fn from(overrides: ConfigOverrides) -> Self {
        Self {
            backend: BackendLayer {
                mode: overrides.backend_mode,
                base_url: overrides.base_url,
                user_id: overrides.user_id,
                ..BackendLayer::default()
            },
            database: DatabaseLayer { url: overrides.database_url, ..DatabaseLayer::default() },
            logging: LoggingLayer { level: overrides.log_level, ..LoggingLayer::default() },
        }
    }
}

fn env_vars(field: &str) -> &'static [&'static str] {
    CONFIG_KEYS.iter().find(|(key, _)| *key == field).map(|(_, vars)| *vars).unwrap_or_default()
}

/// First variable feeding `field` that holds a non-blank value.
fn env_source(field: &str) -> Option<&'static str> {
    env_vars(field)
        .iter()
        .copied()
        .find(|var| env::var(var).is_ok_and(|value| !value.trim().is_empty()))
}

fn env_text(field: &str) -> Option<String> {
    env_source(field).and_then(|var| env::var(var).ok())
}

fn env_parsed<T: FromStr>(field: &str) -> Result<Option<T>, ConfigError> {
    let Some(var) = env_source(field) else {
        return Ok(None);
    };
    let value = env::var(var).unwrap_or_default();
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv { key: var.to_string(), value })
}
