use chrono::Duration as ChronoDuration;
use std::env;
use std::time::Duration;

/// Process-wide configuration, following the teacher's
/// `Config::from_env()` shape.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store location; empty string means an in-memory shared store.
    pub cache_path: String,
    /// Staleness threshold for SERVE_CACHED vs FETCH_FRESH.
    pub cache_time: ChronoDuration,
    /// Feeds selected when the caller did not select any.
    pub default_feeds: Vec<String>,
    /// Background sweep period.
    pub refresh_interval: Duration,
    /// Per-feed deadline during the background sweep.
    pub refresh_timeout: Duration,
    /// Timeout for a fresh fetch when a cached copy already exists.
    pub fresh_budget: Duration,
    /// Refresher semaphore size.
    pub max_concurrent_refresh: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let cache_path = env::var("CACHE_PATH").unwrap_or_default();

        let cache_time_minutes = env::var("CACHE_TIME_MINUTES")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<i64>()?;

        let default_feeds = env::var("DEFAULT_FEEDS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        let refresh_interval_secs = env::var("REFRESH_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()?;

        let refresh_timeout_secs = env::var("REFRESH_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u64>()?;

        let fresh_budget_ms = env::var("FRESH_BUDGET_MS")
            .unwrap_or_else(|_| "150".to_string())
            .parse::<u64>()?;

        let max_concurrent_refresh = env::var("MAX_CONCURRENT_REFRESH")
            .unwrap_or_else(|_| "100".to_string())
            .parse::<usize>()?;

        Ok(Config {
            cache_path,
            cache_time: ChronoDuration::minutes(cache_time_minutes),
            default_feeds,
            refresh_interval: Duration::from_secs(refresh_interval_secs),
            refresh_timeout: Duration::from_secs(refresh_timeout_secs),
            fresh_budget: Duration::from_millis(fresh_budget_ms),
            max_concurrent_refresh,
        })
    }

    /// The `sqlx` connection URL for `cache_path`: an empty path means a
    /// shared in-memory database.
    pub fn database_url(&self) -> String {
        if self.cache_path.is_empty() {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}", self.cache_path)
        }
    }
}
