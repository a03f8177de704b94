use crate::error::{AppError, Result};

pub const SPORTS_API_URL: &str = "https://api.betsapi.com/v1";
pub const CURRENCY_API_URL: &str =
    "https://min-api.cryptocompare.com/data/pricemulti?fsyms=NEO,GAS&tsyms=USD,GAS,AUD";

/// Chain heartbeat poll interval (seconds).
pub const HEARTBEAT_INTERVAL_SECS: u64 = 1;

/// Currency/exchange-rate refresh interval (seconds).
pub const PRICE_FEED_INTERVAL_SECS: u64 = 5;

/// Recompute interval (seconds) — re-synthesizes books from cached aggregates.
pub const RECOMPUTE_INTERVAL_SECS: u64 = 10;

/// Full ingestion interval (seconds) — re-fetches events and odds upstream.
pub const INGEST_INTERVAL_SECS: u64 = 15 * 60;

/// Stagnant heartbeat polls tolerated before the node client is asked to fail over.
pub const NODE_STAGNANT_THRESHOLD: u64 = 60;

/// Leagues fetched concurrently during one ingestion run.
pub const MAX_CONCURRENT_LEAGUES: usize = 8;

/// Events resolved concurrently within one league.
pub const MAX_CONCURRENT_EVENTS: usize = 16;

/// Per-request timeout for upstream calls (seconds).
pub const UPSTREAM_TIMEOUT_SECS: u64 = 10;

/// Matches included in one published snapshot.
pub const MAX_BROADCAST_RESULTS: usize = 25;

/// Matches per sport on the front-page snapshot.
pub const FRONT_PAGE_PER_SPORT: usize = 3;

/// Publish attempts per channel before the cycle is skipped.
pub const PUBLISH_MAX_ATTEMPTS: u32 = 5;

/// Maximum rungs per outcome ladder.
pub const MAX_LADDER_DEPTH: usize = 7;

#[derive(Debug, Clone)]
pub struct Config {
    pub sports_api_url: String,
    pub sports_api_token: String,
    pub redis_url: String,
    /// Chain RPC node URIs, tried in order (NODE_URIS, comma-separated).
    pub node_uris: Vec<String>,
    /// Path to the league whitelist CSV.
    pub whitelist_path: String,
    pub api_port: u16,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let node_uris: Vec<String> = std::env::var("NODE_URIS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if node_uris.is_empty() {
            return Err(AppError::Config(
                "NODE_URIS must list at least one chain node".to_string(),
            ));
        }

        Ok(Self {
            sports_api_url: std::env::var("SPORTS_API_URL")
                .unwrap_or_else(|_| SPORTS_API_URL.to_string()),
            sports_api_token: std::env::var("SPORTS_API_TOKEN")
                .map_err(|_| AppError::Config("SPORTS_API_TOKEN not set".to_string()))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            node_uris,
            whitelist_path: std::env::var("WHITELIST_PATH")
                .unwrap_or_else(|_| "api_whitelist.csv".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}
