//! Configuration loading from file and environment variables.

use axiom_client::ENV_DATASET;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Connection settings. Unset values fall back to the client's own
    /// environment variables (`AXIOM_URL`, `AXIOM_TOKEN`, ...).
    #[serde(default)]
    pub axiom: AxiomConfig,

    /// Batching settings.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AxiomConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub org_id: Option<String>,
    pub edge_url: Option<String>,
    /// Dataset to ingest into. Required.
    pub dataset: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Events per request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Longest time an event waits in a partial batch.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Event field holding the timestamp, if not `_time`.
    #[serde(default)]
    pub timestamp_field: Option<String>,
}

impl IngestConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "axiom_client=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_batch_size() -> usize {
    axiom_client::ingest::DEFAULT_BATCH_SIZE
}

fn default_flush_interval_ms() -> u64 {
    axiom_client::ingest::DEFAULT_FLUSH_INTERVAL.as_millis() as u64
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            timestamp_field: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no dataset configured; set axiom.dataset or AXIOM_DATASET")]
    MissingDataset,
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `AXIOM_DATASET` overrides `axiom.dataset`
/// - `AXIOM_INGEST_BATCH_SIZE` overrides `ingest.batch_size`
/// - `AXIOM_INGEST_FLUSH_INTERVAL_MS` overrides `ingest.flush_interval_ms`
/// - `AXIOM_LOG_LEVEL` overrides `logging.level`
/// - `AXIOM_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if no dataset is configured anywhere.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

fn load_config_with_env(
    path: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Some(dataset) = env(ENV_DATASET) {
        config.axiom.dataset = Some(dataset);
    }
    if let Some(size) = env("AXIOM_INGEST_BATCH_SIZE") {
        if let Ok(parsed) = size.parse() {
            config.ingest.batch_size = parsed;
        }
    }
    if let Some(interval) = env("AXIOM_INGEST_FLUSH_INTERVAL_MS") {
        if let Ok(parsed) = interval.parse() {
            config.ingest.flush_interval_ms = parsed;
        }
    }
    if let Some(level) = env("AXIOM_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("AXIOM_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    let has_dataset = config
        .axiom
        .dataset
        .as_deref()
        .is_some_and(|d| !d.trim().is_empty());
    if !has_dataset {
        return Err(ConfigError::MissingDataset);
    }
    Ok(config)
}
