use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

use crate::latency::LatencyModel;
use crate::ranking::OverheadModel;

/// Shortest time a fetched server list is served from memory, in seconds
const MIN_FRESHNESS_SECS: u64 = 60;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Request body size limit in bytes
    /// Env: REQUEST_BODY_LIMIT (default: 4194304 = 4MB, server lists are large)
    pub request_body_limit: usize,

    /// Request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,

    /// Server port
    /// Env: PORT (default: 3000)
    pub port: u16,

    /// Database file path
    /// Env: DATABASE_PATH (default: "comfig.db")
    pub database_path: String,

    /// Bearer token for publishing the server list and schema, and the key for reading download counts
    /// Env: API_TOKEN (optional, without it nothing can be published)
    pub api_token: Option<String>,

    /// Development mode: requests without a client address count as 127.0.0.1
    /// Env: DEV (default: false)
    pub dev_mode: bool,

    /// Edge node assumed when the request doesn't say which one served it
    /// Env: EDGE_NODE (default: "IAD")
    pub default_edge_node: String,

    /// Upper bound on a single backing store read, in milliseconds
    /// Env: STORE_TIMEOUT_MS (default: 5000)
    pub store_timeout: Duration,

    /// Minimum time a fetched server list is served from memory, in seconds
    /// Env: CACHE_MIN_FRESHNESS_SECS (default: 60, values below 60 are raised to 60)
    pub cache_min_freshness: Duration,

    /// Fiber latency bands as "<km>:<km_per_ms>,...,*:<km_per_ms>"
    /// Env: FIBER_BANDS (default: "250:125,1250:72,*:65.5")
    pub fiber_bands: LatencyModel,

    /// Floor for combined last-mile overhead in ms
    /// Env: MIN_OVERHEAD_MS (default: 5)
    pub min_overhead_ms: f64,

    /// Fixed protocol overhead added to every estimate in ms
    /// Env: CONSTANT_OVERHEAD_MS (default: 2)
    pub constant_overhead_ms: f64,

    /// Comma separated origins allowed for cross-site requests
    /// Env: ALLOWED_ORIGINS (default: "http://localhost:4321,https://staging.mastercomfig-site.pages.dev")
    pub allowed_origins: Vec<String>,

    /// Rate limit for the quickplay query endpoint (requests per second)
    /// Env: RATE_LIMIT_QUERY_PER_SEC (default: 20)
    pub rate_limit_query_per_sec: u64,

    /// Burst size for the quickplay query endpoint
    /// Env: RATE_LIMIT_QUERY_BURST (default: 40)
    pub rate_limit_query_burst: u32,

    /// Rate limit for HUD stat endpoints (requests per second)
    /// Env: RATE_LIMIT_STATS_PER_SEC (default: 5)
    pub rate_limit_stats_per_sec: u64,

    /// Burst size for HUD stat endpoints
    /// Env: RATE_LIMIT_STATS_BURST (default: 10)
    pub rate_limit_stats_burst: u32,

    /// Rate limit for publishing endpoints (requests per minute)
    /// Env: RATE_LIMIT_PUBLISH_PER_MIN (default: 30)
    /// Publishers push every few seconds at most
    pub rate_limit_publish_per_min: u64,

    /// Burst size for publishing endpoints
    /// Env: RATE_LIMIT_PUBLISH_BURST (default: 5)
    pub rate_limit_publish_burst: u32,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        let defaults = Self::default();
        Self {
            request_body_limit: env_or_default("REQUEST_BODY_LIMIT", defaults.request_body_limit),
            request_timeout: Duration::from_secs(env_or_default(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            port: env_or_default("PORT", defaults.port),
            database_path: env_or_default_string("DATABASE_PATH", &defaults.database_path),
            api_token: var("API_TOKEN").ok().filter(|token| !token.is_empty()),
            dev_mode: env_or_default("DEV", defaults.dev_mode),
            default_edge_node: env_or_default_string("EDGE_NODE", &defaults.default_edge_node),
            store_timeout: Duration::from_millis(env_or_default(
                "STORE_TIMEOUT_MS",
                defaults.store_timeout.as_millis() as u64,
            )),
            cache_min_freshness: min_freshness(env_or_default(
                "CACHE_MIN_FRESHNESS_SECS",
                defaults.cache_min_freshness.as_secs(),
            )),
            fiber_bands: env_or_default("FIBER_BANDS", defaults.fiber_bands),
            min_overhead_ms: env_or_default("MIN_OVERHEAD_MS", defaults.min_overhead_ms),
            constant_overhead_ms: env_or_default(
                "CONSTANT_OVERHEAD_MS",
                defaults.constant_overhead_ms,
            ),
            allowed_origins: var("ALLOWED_ORIGINS")
                .map(|origins| split_list(&origins))
                .unwrap_or(defaults.allowed_origins),
            rate_limit_query_per_sec: env_or_default(
                "RATE_LIMIT_QUERY_PER_SEC",
                defaults.rate_limit_query_per_sec,
            ),
            rate_limit_query_burst: env_or_default(
                "RATE_LIMIT_QUERY_BURST",
                defaults.rate_limit_query_burst,
            ),
            rate_limit_stats_per_sec: env_or_default(
                "RATE_LIMIT_STATS_PER_SEC",
                defaults.rate_limit_stats_per_sec,
            ),
            rate_limit_stats_burst: env_or_default(
                "RATE_LIMIT_STATS_BURST",
                defaults.rate_limit_stats_burst,
            ),
            rate_limit_publish_per_min: env_or_default(
                "RATE_LIMIT_PUBLISH_PER_MIN",
                defaults.rate_limit_publish_per_min,
            ),
            rate_limit_publish_burst: env_or_default(
                "RATE_LIMIT_PUBLISH_BURST",
                defaults.rate_limit_publish_burst,
            ),
        }
    }

    /// Fixed costs of the ping correction
    pub fn overhead(&self) -> OverheadModel {
        OverheadModel {
            min_overhead_ms: self.min_overhead_ms,
            constant_overhead_ms: self.constant_overhead_ms,
        }
    }
}

impl Default for Config {
    /// Create configuration with all default values
    fn default() -> Self {
        let overhead = OverheadModel::default();
        Self {
            request_body_limit: 4 * 1024 * 1024, // 4 MB
            request_timeout: Duration::from_secs(30),
            port: 3000,
            database_path: "comfig.db".to_string(),
            api_token: None,
            dev_mode: false,
            default_edge_node: "IAD".to_string(),
            store_timeout: Duration::from_millis(5000),
            cache_min_freshness: Duration::from_secs(MIN_FRESHNESS_SECS),
            fiber_bands: LatencyModel::default(),
            min_overhead_ms: overhead.min_overhead_ms,
            constant_overhead_ms: overhead.constant_overhead_ms,
            allowed_origins: vec![
                "http://localhost:4321".to_string(),
                "https://staging.mastercomfig-site.pages.dev".to_string(),
            ],
            rate_limit_query_per_sec: 20,
            rate_limit_query_burst: 40,
            rate_limit_stats_per_sec: 5,
            rate_limit_stats_burst: 10,
            rate_limit_publish_per_min: 30,
            rate_limit_publish_burst: 5,
        }
    }
}

/// Freshness window, never shorter than the minimum clients are promised
fn min_freshness(secs: u64) -> Duration {
    Duration::from_secs(secs.max(MIN_FRESHNESS_SECS))
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
