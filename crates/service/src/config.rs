//! Service configuration loaded from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use common::RetryPolicy;
use fulfillment::PipelineConfig;
use ledger::CacheConfig;
use locking::LockConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Some(LogFormat::Text),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL`: PostgreSQL connection string (unset: in-memory stores)
/// - `DATABASE_MAX_CONNECTIONS` (default: `10`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `METRICS_ADDR`: Prometheus listener (default: `0.0.0.0:9000`)
/// - `LOCK_TTL_MS`, `LOCK_ACQUIRE_TIMEOUT_MS`, `LOCK_RETRY_INTERVAL_MS`
/// - `RETRY_MAX_ATTEMPTS`, `RETRY_INITIAL_DELAY_MS`, `RETRY_MAX_DELAY_MS`
/// - `PIPELINE_TIMEOUT_MS`, `CACHE_TTL_MS`
/// - `LOW_STOCK_THRESHOLD`, `LOW_STOCK_INTERVAL_SECS`
/// - `JOB_QUEUE_CAPACITY` (default: `1024`)
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_addr: SocketAddr,
    pub lock: LockConfig,
    pub retry: RetryPolicy,
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
    pub low_stock_threshold: u32,
    pub low_stock_interval: Duration,
    pub job_queue_capacity: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from any key lookup. Unparsable values fall
    /// back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, default: Duration| {
            parsed(key).map(Duration::from_millis).unwrap_or(default)
        };

        Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.database_max_connections),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            metrics_addr: lookup("METRICS_ADDR")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.metrics_addr),
            lock: LockConfig {
                ttl: millis("LOCK_TTL_MS", defaults.lock.ttl),
                acquire_timeout: millis("LOCK_ACQUIRE_TIMEOUT_MS", defaults.lock.acquire_timeout),
                retry_interval: millis("LOCK_RETRY_INTERVAL_MS", defaults.lock.retry_interval),
            },
            retry: RetryPolicy::builder()
                .max_attempts(
                    lookup("RETRY_MAX_ATTEMPTS")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(defaults.retry.max_attempts),
                )
                .initial_delay(millis("RETRY_INITIAL_DELAY_MS", defaults.retry.initial_delay))
                .max_delay(millis("RETRY_MAX_DELAY_MS", defaults.retry.max_delay))
                .build(),
            pipeline: PipelineConfig {
                timeout: millis("PIPELINE_TIMEOUT_MS", defaults.pipeline.timeout),
            },
            cache: CacheConfig {
                ttl: millis("CACHE_TTL_MS", defaults.cache.ttl),
            },
            low_stock_threshold: lookup("LOW_STOCK_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.low_stock_threshold),
            low_stock_interval: parsed("LOW_STOCK_INTERVAL_SECS")
                .map(|secs| Duration::from_secs(secs.max(1)))
                .unwrap_or(defaults.low_stock_interval),
            job_queue_capacity: lookup("JOB_QUEUE_CAPACITY")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.job_queue_capacity),
        }
    }

    pub fn uses_database(&self) -> bool {
        self.database_url.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            lock: LockConfig::default(),
            retry: RetryPolicy::default(),
            pipeline: PipelineConfig::default(),
            cache: CacheConfig::default(),
            low_stock_threshold: 10,
            low_stock_interval: Duration::from_secs(60),
            job_queue_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert!(config.database_url.is_none());
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.metrics_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(config.lock.ttl, Duration::from_millis(5000));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.pipeline.timeout, Duration::from_secs(30));
        assert_eq!(config.cache.ttl, Duration::from_millis(2000));
        assert_eq!(config.low_stock_threshold, 10);
        assert_eq!(config.low_stock_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_empty_environment_matches_defaults() {
        let config = config_from(&[]);
        let defaults = Config::default();
        assert_eq!(config.lock, defaults.lock);
        assert_eq!(config.retry, defaults.retry);
        assert_eq!(config.metrics_addr, defaults.metrics_addr);
        assert!(!config.uses_database());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/inventory"),
            ("DATABASE_MAX_CONNECTIONS", "25"),
            ("LOG_FORMAT", "JSON"),
            ("METRICS_ADDR", "127.0.0.1:9100"),
            ("LOCK_TTL_MS", "9000"),
            ("LOCK_ACQUIRE_TIMEOUT_MS", "100"),
            ("RETRY_MAX_ATTEMPTS", "8"),
            ("RETRY_INITIAL_DELAY_MS", "5"),
            ("PIPELINE_TIMEOUT_MS", "1500"),
            ("CACHE_TTL_MS", "0"),
            ("LOW_STOCK_THRESHOLD", "3"),
            ("LOW_STOCK_INTERVAL_SECS", "15"),
        ]);

        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/inventory")
        );
        assert_eq!(config.database_max_connections, 25);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.metrics_addr.port(), 9100);
        assert_eq!(config.lock.ttl, Duration::from_millis(9000));
        assert_eq!(config.lock.acquire_timeout, Duration::from_millis(100));
        assert_eq!(config.lock.retry_interval, Duration::from_millis(50));
        assert_eq!(config.retry.max_attempts, 8);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(5));
        assert_eq!(config.pipeline.timeout, Duration::from_millis(1500));
        assert_eq!(config.cache.ttl, Duration::ZERO);
        assert_eq!(config.low_stock_threshold, 3);
        assert_eq!(config.low_stock_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            ("DATABASE_URL", "  "),
            ("LOG_FORMAT", "yaml"),
            ("METRICS_ADDR", "not-an-address"),
            ("LOCK_TTL_MS", "-5"),
        ]);
        assert!(config.database_url.is_none());
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.metrics_addr.port(), 9000);
        assert_eq!(config.lock.ttl, Duration::from_millis(5000));
    }

    #[test]
    fn test_zero_low_stock_interval_is_clamped() {
        let config = config_from(&[("LOW_STOCK_INTERVAL_SECS", "0")]);
        assert_eq!(config.low_stock_interval, Duration::from_secs(1));
    }
}
