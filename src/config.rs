//! Engine configuration and the optional TOML config file.
//!
//! [`EngineConfig`] is what the run coordinator consumes. [`FileConfig`]
//! mirrors the user's config file; every field is optional so the CLI can
//! layer flags over file values over built-in defaults.
//!
//! # Config file format
//!
//! ```toml
//! output_dir = "~/Archive"
//! concurrency = 4
//! rate_limit = "5M"            # bytes per second, K/M/G suffixes; "0" = unlimited
//! max_retries = 3
//! retry_base_delay_ms = 1000
//! retry_max_delay_ms = 32000
//! shutdown_grace_secs = 5
//! categories = ["liked", "favorites"]
//! fetcher = "external"         # "http" or "external"
//! tool = "yt-dlp"
//! tool_args = ["--quiet", "--no-progress", "--no-part", "-o", "-"]
//! connect_timeout_secs = 30
//! read_timeout_secs = 300
//! ```

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::download::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, RetryPolicy, parse_byte_rate,
};
use crate::job::Category;

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Default global bandwidth ceiling (10 MiB/s).
pub const DEFAULT_RATE_LIMIT: u64 = 10 * 1024 * 1024;

/// Default time in-flight downloads get to finish after a stop request.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Largest accepted `max_retries`.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Configuration errors, reported with the offending key.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config value for `{key}`: {value}. Expected {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: impl fmt::Display, expected: &'static str) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            expected,
        }
    }
}

/// Settings consumed by the run coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Worker pool size (1..=100).
    pub concurrency: usize,
    /// Global bandwidth ceiling in bytes per second; 0 = unlimited.
    pub rate_limit_bytes_per_sec: u64,
    /// Total attempts per job, including the first.
    pub max_retry_attempts: u32,
    pub base_retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Time in-flight downloads get after a stop before they are aborted.
    pub shutdown_grace: Duration,
    /// Categories to process; empty means all.
    pub categories: Vec<Category>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            rate_limit_bytes_per_sec: DEFAULT_RATE_LIMIT,
            max_retry_attempts: DEFAULT_MAX_RETRIES,
            base_retry_delay: DEFAULT_BASE_DELAY,
            max_retry_delay: DEFAULT_MAX_DELAY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            categories: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Checks ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(ConfigError::invalid(
                "concurrency",
                self.concurrency,
                "range 1..=100",
            ));
        }
        if !(1..=MAX_RETRY_ATTEMPTS).contains(&self.max_retry_attempts) {
            return Err(ConfigError::invalid(
                "max_retries",
                self.max_retry_attempts,
                "range 1..=10",
            ));
        }
        if self.max_retry_delay < self.base_retry_delay {
            return Err(ConfigError::invalid(
                "retry_max_delay_ms",
                self.max_retry_delay.as_millis(),
                "a value no smaller than retry_base_delay_ms",
            ));
        }
        Ok(())
    }

    /// Builds the retry policy these settings describe.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retry_attempts,
            self.base_retry_delay,
            self.max_retry_delay,
        )
    }

    /// True when jobs of `category` should be processed.
    #[must_use]
    pub fn selects(&self, category: Category) -> bool {
        self.categories.is_empty() || self.categories.contains(&category)
    }
}

/// Which fetcher implementation downloads jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    /// Stream the job URL directly over HTTP.
    Http,
    /// Delegate to an external media tool.
    #[default]
    External,
}

impl FetcherKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::External => "external",
        }
    }
}

impl fmt::Display for FetcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetcherKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "external" | "tool" => Ok(Self::External),
            _ => Err(ConfigError::invalid("fetcher", s, "one of: http, external")),
        }
    }
}

/// Contents of the config file. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub output_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
    /// Human byte rate, e.g. `"10M"`.
    pub rate_limit: Option<String>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
    pub categories: Option<Vec<Category>>,
    pub fetcher: Option<FetcherKind>,
    pub tool: Option<String>,
    pub tool_args: Option<Vec<String>>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Validates values against the same constraints as the CLI.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(concurrency) = self.concurrency
            && !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency)
        {
            return Err(ConfigError::invalid(
                "concurrency",
                concurrency,
                "range 1..=100",
            ));
        }
        if let Some(max_retries) = self.max_retries
            && !(1..=MAX_RETRY_ATTEMPTS).contains(&max_retries)
        {
            return Err(ConfigError::invalid(
                "max_retries",
                max_retries,
                "range 1..=10",
            ));
        }
        if let Some(rate) = &self.rate_limit
            && parse_byte_rate(rate).is_err()
        {
            return Err(ConfigError::invalid(
                "rate_limit",
                rate,
                "a byte rate such as 512K, 10M or 0",
            ));
        }
        if let Some(tool) = &self.tool
            && tool.trim().is_empty()
        {
            return Err(ConfigError::invalid("tool", "\"\"", "a program name or path"));
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        validate_timeout_secs("shutdown_grace_secs", self.shutdown_grace_secs)?;
        Ok(())
    }

    /// Rate limit in bytes per second, if set and valid.
    #[must_use]
    pub fn rate_limit_bytes(&self) -> Option<u64> {
        self.rate_limit
            .as_deref()
            .and_then(|rate| parse_byte_rate(rate).ok())
    }
}

fn validate_timeout_secs(key: &'static str, value: Option<u64>) -> Result<(), ConfigError> {
    match value {
        Some(value) if !(1..=3600).contains(&value) => {
            Err(ConfigError::invalid(key, value, "range 1..=3600"))
        }
        _ => Ok(()),
    }
}

/// Parses and validates config file contents.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys and
/// [`ConfigError::Invalid`] for out-of-range values.
pub fn parse_config_str(raw: &str, path: &Path) -> Result<FileConfig, ConfigError> {
    let config: FileConfig = toml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Reads and validates a config file.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] if the file cannot be read, otherwise as
/// [`parse_config_str`].
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config_str(&raw, path)
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/archiver/config.toml`
/// 2. `$HOME/.config/archiver/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("archiver")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("archiver")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads `explicit` if given, else the default path when it exists.
///
/// An explicit path that does not exist is an error; a missing default file
/// is not.
///
/// # Errors
///
/// As [`load_file_config`].
pub fn load_config(explicit: Option<&Path>) -> Result<Option<(PathBuf, FileConfig)>, ConfigError> {
    if let Some(path) = explicit {
        return load_file_config(path).map(|config| Some((path.to_path_buf(), config)));
    }

    match resolve_default_config_path() {
        Some(path) if path.exists() => {
            let config = load_file_config(&path)?;
            Ok(Some((path, config)))
        }
        _ => Ok(None),
    }
}
