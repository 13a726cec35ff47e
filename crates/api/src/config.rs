//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use common::RetryPolicy;
use consumer::ConsumerConfig;
use inventory::ReservationConfig;
use saga::{CoordinatorConfig, SweeperConfig};

/// Process configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON log lines, anything else for text
/// - `DATABASE_URL`: PostgreSQL ledger; the in-memory ledger is used when unset
/// - `RESERVATION_TTL_SECS` (default: `900`)
/// - `SWEEP_INTERVAL_SECS` (default: `60`)
/// - `SWEEP_PAGE_SIZE` (default: `100`)
/// - `CONSUMER_PARTITIONS` (default: `8`)
/// - `MAX_DELIVERY_ATTEMPTS` (default: `5`)
/// - `MAX_REQUEUES` (default: `10`)
/// - `DEDUP_CACHE_CAPACITY` (default: `10000`)
/// - `MARKER_CAPACITY`: orders tracked by the processed-marker store (default: `100000`)
/// - `CAS_MAX_ATTEMPTS` (default: `16`)
/// - `CALL_TIMEOUT_MS` (default: `2000`)
/// - `INFRA_RETRY_ATTEMPTS` (default: `5`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub reservation_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub sweep_page_size: usize,
    pub consumer_partitions: usize,
    pub max_delivery_attempts: u32,
    pub max_requeues: u32,
    pub dedup_cache_capacity: usize,
    pub marker_capacity: usize,
    pub cas_max_attempts: u32,
    pub call_timeout_ms: u64,
    pub infra_retry_attempts: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Values that fail to parse fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(lookup("PORT"), defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            reservation_ttl_secs: parse_or(
                lookup("RESERVATION_TTL_SECS"),
                defaults.reservation_ttl_secs,
            ),
            sweep_interval_secs: parse_or(
                lookup("SWEEP_INTERVAL_SECS"),
                defaults.sweep_interval_secs,
            ),
            sweep_page_size: parse_or(lookup("SWEEP_PAGE_SIZE"), defaults.sweep_page_size),
            consumer_partitions: parse_or(
                lookup("CONSUMER_PARTITIONS"),
                defaults.consumer_partitions,
            ),
            max_delivery_attempts: parse_or(
                lookup("MAX_DELIVERY_ATTEMPTS"),
                defaults.max_delivery_attempts,
            ),
            max_requeues: parse_or(lookup("MAX_REQUEUES"), defaults.max_requeues),
            dedup_cache_capacity: parse_or(
                lookup("DEDUP_CACHE_CAPACITY"),
                defaults.dedup_cache_capacity,
            ),
            marker_capacity: parse_or(lookup("MARKER_CAPACITY"), defaults.marker_capacity),
            cas_max_attempts: parse_or(lookup("CAS_MAX_ATTEMPTS"), defaults.cas_max_attempts),
            call_timeout_ms: parse_or(lookup("CALL_TIMEOUT_MS"), defaults.call_timeout_ms),
            infra_retry_attempts: parse_or(
                lookup("INFRA_RETRY_ATTEMPTS"),
                defaults.infra_retry_attempts,
            ),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reservation(&self) -> ReservationConfig {
        ReservationConfig::new(
            Duration::from_secs(self.reservation_ttl_secs),
            self.cas_max_attempts,
        )
    }

    pub fn consumer(&self) -> ConsumerConfig {
        let defaults = ConsumerConfig::default();
        ConsumerConfig {
            partitions: self.consumer_partitions.max(1),
            retry: RetryPolicy::exponential(
                self.max_delivery_attempts.max(1),
                Duration::from_millis(100),
                Duration::from_secs(5),
            ),
            max_requeues: self.max_requeues,
            dedup_capacity: self.dedup_cache_capacity.max(1),
            ..defaults
        }
    }

    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            retry: RetryPolicy::exponential(
                self.infra_retry_attempts.max(1),
                Duration::from_millis(100),
                Duration::from_secs(5),
            ),
        }
    }

    pub fn sweeper(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            page_size: self.sweep_page_size.max(1),
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            database_url: None,
            reservation_ttl_secs: 900,
            sweep_interval_secs: 60,
            sweep_page_size: 100,
            consumer_partitions: 8,
            max_delivery_attempts: 5,
            max_requeues: 10,
            dedup_cache_capacity: 10_000,
            marker_capacity: 100_000,
            cas_max_attempts: 16,
            call_timeout_ms: 2000,
            infra_retry_attempts: 5,
        }
    }
}
