//! Configuration management.
//!
//! Settings are layered, later sources winning:
//!
//! 1. built-in defaults
//! 2. a TOML file (`--config`, or `arxiv-ingest/config.toml` in the user config dir)
//! 3. environment variables such as `ARXIV_INGEST__PIPELINE__DOWNLOAD_CONCURRENCY=8`
//!
//! ```toml
//! [arxiv]
//! base_url = "https://export.arxiv.org/api/query"
//! category = "cs.AI"
//! max_results = 100
//! rate_limit_delay_secs = 3.0
//! timeout_secs = 30
//!
//! [downloads]
//! cache_dir = "./data/arxiv_pdfs"
//! max_attempts = 3
//! retry_base_delay_secs = 5.0
//!
//! [parser]
//! backend = "pdf-extract"
//! max_pages = 30
//! max_file_size_mb = 20
//!
//! [pipeline]
//! download_concurrency = 5
//! parse_concurrency = 3
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::parser::{ExtractorBackend, ParseLimits};
use crate::pipeline::PipelineOptions;
use crate::sources::DEFAULT_ARXIV_API_URL;
use crate::utils::{validate_url, RetryConfig};

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "ARXIV_INGEST";

/// Errors raised while loading or checking configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub arxiv: ArxivConfig,

    #[serde(default)]
    pub downloads: DownloadConfig,

    #[serde(default)]
    pub parser: ParserConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Metadata API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArxivConfig {
    /// Query endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Category searched when none is given on the command line
    #[serde(default = "default_category")]
    pub category: String,

    /// Default number of results per run
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Minimum spacing between any two requests to the host
    #[serde(default = "default_rate_limit_delay")]
    pub rate_limit_delay_secs: f64,

    /// Per-request timeout
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            category: default_category(),
            max_results: default_max_results(),
            rate_limit_delay_secs: default_rate_limit_delay(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_ARXIV_API_URL.to_string()
}

fn default_category() -> String {
    "cs.AI".to_string()
}

fn default_max_results() -> usize {
    100
}

fn default_rate_limit_delay() -> f64 {
    3.0
}

fn default_timeout() -> u64 {
    30
}

/// Artifact download settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory artifacts are cached in
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Attempts per artifact, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff unit; attempt `n` waits `n` times this before retrying
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: f64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_attempts: default_max_attempts(),
            retry_base_delay_secs: default_retry_base_delay(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/arxiv_pdfs")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> f64 {
    5.0
}

/// Parsing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default)]
    pub backend: ExtractorBackend,

    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            backend: ExtractorBackend::default(),
            max_pages: default_max_pages(),
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

fn default_max_pages() -> usize {
    30
}

fn default_max_file_size_mb() -> u64 {
    20
}

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,

    #[serde(default = "default_parse_concurrency")]
    pub parse_concurrency: usize,

    /// Cancel runs that take longer than this many seconds
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            download_concurrency: default_download_concurrency(),
            parse_concurrency: default_parse_concurrency(),
            deadline_secs: None,
        }
    }
}

fn default_download_concurrency() -> usize {
    5
}

fn default_parse_concurrency() -> usize {
    3
}

/// A setting in seconds that must fit a `Duration`
fn seconds(key: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        ConfigError::Invalid(format!(
            "{} must be a non-negative number of seconds, got {}",
            key, value
        ))
    })
}

impl Config {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url(&self.arxiv.base_url)
            .map_err(|e| ConfigError::Invalid(format!("arxiv.base_url: {}", e)))?;

        if self.arxiv.category.trim().is_empty() {
            return Err(ConfigError::Invalid("arxiv.category must not be empty".into()));
        }
        seconds("arxiv.rate_limit_delay_secs", self.arxiv.rate_limit_delay_secs)?;
        if self.arxiv.timeout_secs == 0 {
            return Err(ConfigError::Invalid("arxiv.timeout_secs must be at least 1".into()));
        }
        if self.downloads.max_attempts == 0 {
            return Err(ConfigError::Invalid("downloads.max_attempts must be at least 1".into()));
        }
        seconds("downloads.retry_base_delay_secs", self.downloads.retry_base_delay_secs)?;
        if self.pipeline.download_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.download_concurrency must be at least 1".into(),
            ));
        }
        if self.pipeline.parse_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.parse_concurrency must be at least 1".into(),
            ));
        }

        Ok(())
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.arxiv.rate_limit_delay_secs).unwrap_or(Duration::MAX)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.arxiv.timeout_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.downloads.max_attempts,
            Duration::try_from_secs_f64(self.downloads.retry_base_delay_secs).unwrap_or(Duration::MAX),
        )
    }

    pub fn parse_limits(&self) -> ParseLimits {
        ParseLimits {
            max_file_size: self.parser.max_file_size_mb.saturating_mul(1024 * 1024),
            max_pages: self.parser.max_pages,
        }
    }

    pub fn pipeline_options(&self, force_download: bool) -> PipelineOptions {
        PipelineOptions {
            download_concurrency: self.pipeline.download_concurrency,
            parse_concurrency: self.pipeline.parse_concurrency,
            force_download,
            deadline: self.pipeline.deadline_secs.map(Duration::from_secs),
        }
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}

/// Default config file location (`<config dir>/arxiv-ingest/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("arxiv-ingest").join("config.toml"))
}

/// The default config file, if it exists
pub fn find_config_file() -> Option<PathBuf> {
    default_config_path().filter(|path| path.is_file())
}

/// Load and validate configuration
///
/// An explicit `path` must exist; otherwise the default location is used when
/// present.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    load_with_env(path, None)
}

fn load_with_env(
    path: Option<&Path>,
    env: Option<HashMap<String, String>>,
) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    match path {
        Some(path) => {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        None => {
            if let Some(found) = find_config_file() {
                tracing::debug!("Using config file {}", found.display());
                builder = builder.add_source(config::File::from(found).required(false));
            }
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .source(env),
    );

    let config: Config = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
}
