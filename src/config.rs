// Runtime configuration, read from the environment (and a .env file if present):
// - Database location and connection pool sizing
// - Point-lookup cache settings (size, TTL)
// - Write retry and conflict handling
// - Ingest batching and worker count
// - Cluster maintenance cadence
// - Prometheus exporter address

use dotenv::dotenv;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use crate::ingest::writer::ConflictPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_busy_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_max_capacity: u64,
    pub scan_page_size: u32,
    pub conflict_policy: ConflictPolicy,
    pub write_retry_max_times: usize,
    pub write_retry_min_delay: Duration,
    pub ingest_workers: usize,
    pub ingest_batch_size: usize,
    pub ingest_flush_interval: Duration,
    pub cluster_batch_size: u32,
    pub cluster_interval: Duration,
    /// Prometheus scrape endpoint; metrics are not exported when unset.
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:banking_stage.db".to_string(),
            db_max_connections: 8,
            db_busy_timeout: Duration::from_millis(5_000),
            cache_ttl: Duration::from_secs(5),
            cache_max_capacity: 10_000,
            scan_page_size: 500,
            conflict_policy: ConflictPolicy::Ignore,
            write_retry_max_times: 5,
            write_retry_min_delay: Duration::from_millis(20),
            ingest_workers: num_cpus::get(),
            ingest_batch_size: 256,
            ingest_flush_interval: Duration::from_millis(500),
            cluster_batch_size: 5_000,
            cluster_interval: Duration::from_secs(3_600),
            metrics_addr: None,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();
        let defaults = Self::default();

        let database_url = env::var("DATABASE_URL").unwrap_or(defaults.database_url);
        let conflict_policy = env::var("CONFLICT_POLICY")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(defaults.conflict_policy);

        Self {
            database_url,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", defaults.db_max_connections),
            db_busy_timeout: Duration::from_millis(env_or("DB_BUSY_TIMEOUT_MS", 5_000)),
            cache_ttl: Duration::from_secs(env_or("CACHE_TTL_SECS", 5)),
            cache_max_capacity: env_or("CACHE_MAX_CAPACITY", defaults.cache_max_capacity),
            scan_page_size: env_or("SCAN_PAGE_SIZE", defaults.scan_page_size).max(1),
            conflict_policy,
            write_retry_max_times: env_or("WRITE_RETRY_MAX_TIMES", defaults.write_retry_max_times),
            write_retry_min_delay: Duration::from_millis(env_or("WRITE_RETRY_MIN_DELAY_MS", 20)),
            ingest_workers: env_or("INGEST_WORKERS", defaults.ingest_workers).max(1),
            ingest_batch_size: env_or("INGEST_BATCH_SIZE", defaults.ingest_batch_size).max(1),
            ingest_flush_interval: Duration::from_millis(env_or("INGEST_FLUSH_INTERVAL_MS", 500)),
            cluster_batch_size: env_or("CLUSTER_BATCH_SIZE", defaults.cluster_batch_size).max(1),
            cluster_interval: Duration::from_secs(env_or("CLUSTER_INTERVAL_SECS", 3_600)),
            metrics_addr: env::var("METRICS_ADDR").ok().and_then(|value| value.parse().ok()),
        }
    }

    /// Defaults pointed at a specific database, for tests and tools.
    pub fn with_database_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }
}
