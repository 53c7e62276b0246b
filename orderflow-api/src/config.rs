//! Service Configuration Module
//!
//! Every section is loaded from environment variables with defaults that
//! match a local development setup. Unparseable values fall back to the
//! default rather than aborting startup.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use orderflow_core::constants::{DEFAULT_CACHE_CAPACITY, DEFAULT_STORE_TIMEOUT_MS};
use orderflow_core::ConfigError;
use orderflow_ingest::{IngestConfig, KafkaConfig};

use crate::db::DbConfig;

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

/// Sizing of the order cache and the deadline shared by every store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of cached orders
    pub capacity: usize,

    /// Deadline for a single store call made on behalf of the cache
    pub store_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
        }
    }
}

impl CacheConfig {
    /// Environment variables:
    /// - `ORDERFLOW_CACHE_CAPACITY` (default: 1000)
    /// - `ORDERFLOW_STORE_TIMEOUT_MS` (default: 2000)
    pub fn from_env() -> Self {
        Self {
            capacity: std::env::var("ORDERFLOW_CACHE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CACHE_CAPACITY),
            store_timeout: Duration::from_millis(
                std::env::var("ORDERFLOW_STORE_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_STORE_TIMEOUT_MS),
            ),
        }
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// HTTP listener and browser-facing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub bind: IpAddr,
    pub port: u16,

    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins.
    pub cors_origins: Vec<String>,

    /// Upper bound on handling one request
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8081,
            cors_origins: Vec::new(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl ApiConfig {
    /// Environment variables:
    /// - `ORDERFLOW_API_BIND` (default: 0.0.0.0)
    /// - `ORDERFLOW_API_PORT` (default: 8081)
    /// - `ORDERFLOW_CORS_ORIGINS`: comma-separated origins (empty = allow all)
    /// - `ORDERFLOW_REQUEST_TIMEOUT_SECS` (default: 15)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_origins = std::env::var("ORDERFLOW_CORS_ORIGINS")
            .ok()
            .map(|s| parse_origins(&s))
            .unwrap_or_default();

        Self {
            bind: std::env::var("ORDERFLOW_API_BIND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.bind),
            port: std::env::var("ORDERFLOW_API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins,
            request_timeout: std::env::var("ORDERFLOW_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// TELEMETRY CONFIGURATION
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,

    /// Lowers the default filter to `debug` when `RUST_LOG` is unset
    pub debug: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            debug: false,
        }
    }
}

impl TelemetryConfig {
    /// Environment variables:
    /// - `ORDERFLOW_LOG_FORMAT`: `json` or `pretty` (default: json)
    /// - `ORDERFLOW_DEBUG`: `true` or `1` enables debug logging
    pub fn from_env() -> Self {
        let log_format = match std::env::var("ORDERFLOW_LOG_FORMAT").ok().as_deref() {
            Some("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        };

        Self {
            log_format,
            debug: std::env::var("ORDERFLOW_DEBUG")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
        }
    }

    /// Filter used when `RUST_LOG` is not set.
    pub fn default_filter(&self) -> &'static str {
        if self.debug {
            "orderflow_api=debug,orderflow_ingest=debug,orderflow_storage=debug,tower_http=debug,info"
        } else {
            "orderflow_api=info,orderflow_ingest=info,orderflow_storage=info,tower_http=info,warn"
        }
    }
}

// ============================================================================
// SERVICE CONFIGURATION
// ============================================================================

/// Everything the binary needs, passed explicitly into each component.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub db: DbConfig,
    pub cache: CacheConfig,
    pub ingest: IngestConfig,
    pub api: ApiConfig,
    pub telemetry: TelemetryConfig,
    pub kafka: KafkaConfig,

    /// JSON-lines file to ingest instead of Kafka; `-` reads stdin
    pub feed_path: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let cache = CacheConfig::from_env();
        let ingest = IngestConfig::from_env().with_store_timeout(cache.store_timeout);

        Self {
            db: DbConfig::from_env(),
            ingest,
            cache,
            api: ApiConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
            kafka: KafkaConfig::from_env(),
            feed_path: std::env::var("ORDERFLOW_FEED_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Reject settings that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero_checks = [
            ("ORDERFLOW_DB_POOL_SIZE", self.db.max_size == 0),
            ("ORDERFLOW_STORE_TIMEOUT_MS", self.cache.store_timeout.is_zero()),
            ("ORDERFLOW_FEED_POLL_TIMEOUT_MS", self.ingest.poll_timeout.is_zero()),
            ("ORDERFLOW_REQUEST_TIMEOUT_SECS", self.api.request_timeout.is_zero()),
        ];
        if let Some((field, _)) = zero_checks.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::InvalidValue {
                field: (*field).to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.db.host.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "ORDERFLOW_DB_HOST".to_string(),
            });
        }

        if self.feed_path.is_none() {
            let kafka_checks = [
                ("ORDERFLOW_KAFKA_BROKERS", self.kafka.brokers.is_empty()),
                ("ORDERFLOW_KAFKA_TOPIC", self.kafka.topic.trim().is_empty()),
                ("ORDERFLOW_KAFKA_GROUP_ID", self.kafka.group_id.trim().is_empty()),
            ];
            if let Some((field, _)) = kafka_checks.iter().find(|(_, missing)| *missing) {
                return Err(ConfigError::MissingRequired {
                    field: (*field).to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cache = CacheConfig::default();
        assert_eq!(cache.capacity, 1000);
        assert_eq!(cache.store_timeout, Duration::from_secs(2));

        let api = ApiConfig::default();
        assert_eq!(api.socket_addr().to_string(), "0.0.0.0:8081");
        assert!(api.cors_origins.is_empty());

        assert_eq!(TelemetryConfig::default().log_format, LogFormat::Json);
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut config = ServiceConfig {
            db: DbConfig::default(),
            cache: CacheConfig::default(),
            ingest: IngestConfig::default(),
            api: ApiConfig::default(),
            telemetry: TelemetryConfig::default(),
            kafka: KafkaConfig::default(),
            feed_path: None,
        };
        assert!(config.validate().is_ok());

        config.cache.store_timeout = Duration::ZERO;
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "ORDERFLOW_STORE_TIMEOUT_MS")
            }
            other => panic!("expected invalid store timeout, got {other:?}"),
        }

        config.cache.store_timeout = Duration::from_secs(1);
        config.db.host = " ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_kafka_settings_required_only_without_file_feed() {
        let mut config = ServiceConfig {
            db: DbConfig::default(),
            cache: CacheConfig::default(),
            ingest: IngestConfig::default(),
            api: ApiConfig::default(),
            telemetry: TelemetryConfig::default(),
            kafka: KafkaConfig::default(),
            feed_path: None,
        };
        config.kafka.topic = String::new();
        match config.validate() {
            Err(ConfigError::MissingRequired { field }) => {
                assert_eq!(field, "ORDERFLOW_KAFKA_TOPIC")
            }
            other => panic!("expected missing topic, got {other:?}"),
        }

        config.feed_path = Some(PathBuf::from("orders.jsonl"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_origins_skips_blanks() {
        assert_eq!(
            parse_origins(" https://a.example , ,https://b.example,"),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert!(parse_origins("").is_empty());
    }

    #[test]
    fn test_debug_filter_is_more_verbose() {
        let quiet = TelemetryConfig::default();
        let verbose = TelemetryConfig {
            debug: true,
            ..TelemetryConfig::default()
        };
        assert!(!quiet.default_filter().contains("debug"));
        assert!(verbose.default_filter().contains("orderflow_ingest=debug"));
    }
}
