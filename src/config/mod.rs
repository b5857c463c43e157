//! Process configuration, loaded from the environment with typed fallbacks.
//!
//! Grounded on the teacher's `Config::from_env()` idiom: one env var read per
//! field with an explicit default, grouped into nested config structs, with
//! a `validate()` pass run once at startup.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub transcode: TranscodeConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub max_range_bytes: u64,
    pub request_timeout: Duration,
}

/// Configuration for the [`crate::transcode::TranscodeService`]. Field names
/// and defaults follow the facade's constructor parameters directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranscodeConfig {
    pub cache_root: PathBuf,
    pub tmp_dir: PathBuf,
    pub converter_path: String,
    pub prober_path: String,
    pub max_cache_size_bytes: u64,
    pub max_streaming_concurrency: usize,
    pub max_download_concurrency: usize,
    pub transcode_timeout: Duration,
    pub failure_backoff_window: Duration,
    pub index_persist_interval: Duration,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_enabled: bool,
    pub rate_limit_requests_per_minute: u32,
    pub rate_limit_burst: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let cache_root: PathBuf = env::var("CACHE_ROOT")
            .unwrap_or_else(|_| "./cache".to_string())
            .into();
        let tmp_dir = env::var("CACHE_TMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| cache_root.join("tmp"));

        let max_streaming_concurrency = parse_env("MAX_STREAMING_CONCURRENCY", 1)?;

        let config = Self {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env("PORT", 3002u16)?,
                allowed_origins: env::var("ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| "*".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
                max_range_bytes: parse_env("MAX_RANGE_BYTES", 10 * 1024 * 1024u64)?,
                request_timeout: Duration::from_secs(parse_env("REQUEST_TIMEOUT_SECS", 30u64)?),
            },
            transcode: TranscodeConfig {
                cache_root,
                tmp_dir,
                converter_path: env::var("CONVERTER_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
                prober_path: env::var("PROBER_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
                max_cache_size_bytes: parse_env("MAX_CACHE_SIZE_BYTES", 2 * 1024 * 1024 * 1024u64)?,
                max_streaming_concurrency,
                max_download_concurrency: parse_env("MAX_DOWNLOAD_CONCURRENCY", max_streaming_concurrency)?,
                transcode_timeout: Duration::from_secs(parse_env("TRANSCODE_TIMEOUT_SECS", 300u64)?),
                failure_backoff_window: Duration::from_secs(parse_env("FAILURE_BACKOFF_SECS", 300u64)?),
                index_persist_interval: Duration::from_secs(parse_env("INDEX_PERSIST_INTERVAL_SECS", 30u64)?),
            },
            monitoring: MonitoringConfig {
                log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
                log_format: match env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()).to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    _ => LogFormat::Pretty,
                },
                metrics_enabled: parse_env("METRICS_ENABLED", true)?,
                rate_limit_requests_per_minute: parse_env("RATE_LIMIT_RPM", 600u32)?,
                rate_limit_burst: parse_env("RATE_LIMIT_BURST", 30u32)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.transcode.max_streaming_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        if self.transcode.max_cache_size_bytes == 0 {
            return Err(ConfigError::InvalidCacheSize);
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid port")]
    InvalidPort,
    #[error("invalid concurrency limit")]
    InvalidConcurrency,
    #[error("invalid cache size")]
    InvalidCacheSize,
    #[error("invalid value for {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_streaming_concurrency_is_one() {
        let default_concurrency: usize = parse_env("MAX_STREAMING_CONCURRENCY_UNSET_TEST_KEY", 1).unwrap();
        assert_eq!(default_concurrency, 1);
    }

    #[test]
    fn invalid_port_fails_validation() {
        let mut config = sample_config();
        config.server.port = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPort)));
    }

    fn sample_config() -> Config {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 3002,
                allowed_origins: vec!["*".into()],
                max_range_bytes: 1024,
                request_timeout: Duration::from_secs(30),
            },
            transcode: TranscodeConfig {
                cache_root: "./cache".into(),
                tmp_dir: "./cache/tmp".into(),
                converter_path: "ffmpeg".into(),
                prober_path: "ffprobe".into(),
                max_cache_size_bytes: 1024,
                max_streaming_concurrency: 1,
                max_download_concurrency: 1,
                transcode_timeout: Duration::from_secs(300),
                failure_backoff_window: Duration::from_secs(300),
                index_persist_interval: Duration::from_secs(30),
            },
            monitoring: MonitoringConfig {
                log_level: "info".into(),
                log_format: LogFormat::Pretty,
                metrics_enabled: true,
                rate_limit_requests_per_minute: 600,
                rate_limit_burst: 30,
            },
        }
    }
}
