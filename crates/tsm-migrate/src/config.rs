//! Configuration management
//!
//! All knobs come from environment variables with conservative defaults.
//! The pacing settings are correctness features, not tuning: the storage
//! and database are shared with live telemetry processing, so the
//! migration deliberately throttles itself.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tsm_common::MigrateError;

// ============================================================================
// Migration Configuration Constants
// ============================================================================

/// Default maximum records per ingestion batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default delay between batches, in seconds.
pub const DEFAULT_SLEEP_SECONDS: f64 = 0.5;

/// Default number of files processed between long pauses.
pub const DEFAULT_FILES_BEFORE_PAUSE: u32 = 20;

/// Default long pause duration, in seconds.
pub const DEFAULT_PAUSE_SECONDS: f64 = 1.0;

/// Default startup delay so co-located services come up first, in seconds.
pub const DEFAULT_INITIAL_DELAY_SECONDS: u64 = 20;

/// Default per-batch retry budget.
pub const DEFAULT_INGEST_RETRIES: u32 = 3;

/// Default base backoff between retries, doubled per attempt, in ms.
pub const DEFAULT_INGEST_BACKOFF_MS: u64 = 500;

/// Default scope prefix in the logs bucket and cursor store.
pub const DEFAULT_SCOPE: &str = "DEFAULT";

/// Default destination host.
pub const DEFAULT_TSDB_HOST: &str = "localhost";

/// Default destination HTTP ingestion port.
pub const DEFAULT_TSDB_HTTP_PORT: u16 = 9000;

/// Default progress store URL.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Migration service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Master gate; the service refuses to start when disabled
    pub enabled: bool,
    pub scope: String,
    pub batch_size: usize,
    pub sleep_seconds: f64,
    pub files_before_pause: u32,
    pub pause_seconds: f64,
    pub initial_delay_seconds: u64,
    pub ingest_retries: u32,
    pub ingest_backoff_ms: u64,
    pub tsdb: TsdbConfig,
    pub redis_url: String,
}

/// Destination database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TsdbConfig {
    pub host: String,
    pub http_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> tsm_common::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            enabled: env_parse("TSM_MIGRATION_ENABLED", false),
            scope: std::env::var("TSM_SCOPE").unwrap_or_else(|_| DEFAULT_SCOPE.to_string()),
            batch_size: env_parse("TSM_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            sleep_seconds: env_parse("TSM_SLEEP_SECONDS", DEFAULT_SLEEP_SECONDS),
            files_before_pause: env_parse("TSM_FILES_BEFORE_PAUSE", DEFAULT_FILES_BEFORE_PAUSE),
            pause_seconds: env_parse("TSM_PAUSE_SECONDS", DEFAULT_PAUSE_SECONDS),
            initial_delay_seconds: env_parse(
                "TSM_INITIAL_DELAY_SECONDS",
                DEFAULT_INITIAL_DELAY_SECONDS,
            ),
            ingest_retries: env_parse("TSM_INGEST_RETRIES", DEFAULT_INGEST_RETRIES),
            ingest_backoff_ms: env_parse("TSM_INGEST_BACKOFF_MS", DEFAULT_INGEST_BACKOFF_MS),
            tsdb: TsdbConfig {
                host: std::env::var("TSDB_HOST").unwrap_or_else(|_| DEFAULT_TSDB_HOST.to_string()),
                http_port: env_parse("TSDB_HTTP_PORT", DEFAULT_TSDB_HTTP_PORT),
                username: std::env::var("TSDB_USERNAME").ok(),
                password: std::env::var("TSDB_PASSWORD").ok(),
            },
            redis_url: std::env::var("TSM_REDIS_URL")
                .unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration; failures here are fatal at startup
    pub fn validate(&self) -> tsm_common::Result<()> {
        if !self.enabled {
            return Err(MigrateError::Disabled);
        }

        if self.batch_size == 0 {
            return Err(MigrateError::Config(
                "TSM_BATCH_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.sleep_seconds < 0.0 || self.pause_seconds < 0.0 {
            return Err(MigrateError::Config(
                "sleep and pause durations cannot be negative".to_string(),
            ));
        }

        if self.tsdb.host.is_empty() {
            return Err(MigrateError::Config("TSDB_HOST cannot be empty".to_string()));
        }

        if self.tsdb.username.is_none() || self.tsdb.password.is_none() {
            return Err(MigrateError::Config(
                "TSDB_USERNAME and TSDB_PASSWORD are required".to_string(),
            ));
        }

        Ok(())
    }

    pub fn sleep_duration(&self) -> Duration {
        Duration::from_secs_f64(self.sleep_seconds)
    }

    pub fn pause_duration(&self) -> Duration {
        Duration::from_secs_f64(self.pause_seconds)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: false,
            scope: DEFAULT_SCOPE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            sleep_seconds: DEFAULT_SLEEP_SECONDS,
            files_before_pause: DEFAULT_FILES_BEFORE_PAUSE,
            pause_seconds: DEFAULT_PAUSE_SECONDS,
            initial_delay_seconds: DEFAULT_INITIAL_DELAY_SECONDS,
            ingest_retries: DEFAULT_INGEST_RETRIES,
            ingest_backoff_ms: DEFAULT_INGEST_BACKOFF_MS,
            tsdb: TsdbConfig {
                host: DEFAULT_TSDB_HOST.to_string(),
                http_port: DEFAULT_TSDB_HTTP_PORT,
                username: None,
                password: None,
            },
            redis_url: DEFAULT_REDIS_URL.to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_config() -> Config {
        Config {
            enabled: true,
            tsdb: TsdbConfig {
                host: DEFAULT_TSDB_HOST.to_string(),
                http_port: DEFAULT_TSDB_HTTP_PORT,
                username: Some("admin".to_string()),
                password: Some("quest".to_string()),
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_disabled_is_fatal() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(MigrateError::Disabled)));
    }

    #[test]
    fn test_missing_credentials_is_fatal() {
        let mut config = enabled_config();
        config.tsdb.password = None;
        assert!(matches!(config.validate(), Err(MigrateError::Config(_))));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = enabled_config();
        config.batch_size = 0;
        assert!(matches!(config.validate(), Err(MigrateError::Config(_))));
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(enabled_config().validate().is_ok());
    }

    #[test]
    fn test_durations() {
        let config = enabled_config();
        assert_eq!(config.sleep_duration(), Duration::from_millis(500));
        assert_eq!(config.pause_duration(), Duration::from_secs(1));
        assert_eq!(config.initial_delay(), Duration::from_secs(20));
    }
}
