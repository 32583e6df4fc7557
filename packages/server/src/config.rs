use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub cache_url: Option<String>,
    pub port: u16,
    /// Host used when building canonical post URLs, e.g. "x.com".
    pub platform_host: String,
    /// Number of concurrent dispatch loops.
    pub max_concurrent_workers: usize,
    /// Per-worker sliding 15-minute request budget for read traffic.
    pub max_requests_per_worker: i32,
    /// Seconds between read requests used to derive the 24h budget.
    pub request_interval_seconds: i64,
    /// Refuse to boot when no worker accounts are present.
    pub strict_workers: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            cache_url: env::var("CACHE_URL").ok(),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            platform_host: env::var("PLATFORM_HOST").unwrap_or_else(|_| "x.com".to_string()),
            max_concurrent_workers: env::var("MAX_CONCURRENT_WORKERS")
                .unwrap_or_else(|_| "12".to_string())
                .parse()
                .context("MAX_CONCURRENT_WORKERS must be a valid number")?,
            max_requests_per_worker: env::var("MAX_REQUESTS_PER_WORKER")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .context("MAX_REQUESTS_PER_WORKER must be a valid number")?,
            request_interval_seconds: env::var("REQUEST_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("REQUEST_INTERVAL_SECONDS must be a valid number")?,
            strict_workers: env::var("STRICT_WORKERS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }
}
