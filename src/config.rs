// Runtime configuration loaded from the environment.
// Every knob has a logged default except the token list, which is required.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::cache::{BackendKind, CacheMode};
use crate::error::{OctorankError, Result};

pub const GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";
pub const GITHUB_RATE_LIMIT_URL: &str = "https://api.github.com/rate_limit";

#[derive(Debug, Clone)]
pub struct Config {
    /// GitHub tokens, comma-separated in GITHUB_TOKENS.
    pub tokens: Vec<String>,
    pub graphql_url: String,
    pub rate_limit_url: String,
    /// Cities fetched concurrently per batch.
    pub api_concurrency: usize,
    /// Worker slots per priority pool.
    pub pool_size: usize,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Staleness window for cached GitHub page responses.
    pub github_refresh_interval: Duration,
    /// Staleness window for cached ranked result sets.
    pub query_refresh_interval: Duration,
    pub cache_mode: CacheMode,
    pub cache_backend: BackendKind,
    /// Disk cache root; defaults to the platform cache dir.
    pub cache_dir: Option<PathBuf>,
    pub redis_url: String,
    /// When false, requests are never gated on initial cache population.
    pub cache_should_be_ready: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        let tokens: Vec<String> = env::var("GITHUB_TOKENS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        if tokens.is_empty() {
            return Err(OctorankError::MissingTokens);
        }

        Ok(Self {
            tokens,
            graphql_url: string_or("GITHUB_API_URL", GITHUB_GRAPHQL_URL),
            rate_limit_url: string_or("GITHUB_RATE_LIMIT_URL", GITHUB_RATE_LIMIT_URL),
            api_concurrency: parse_or("GITHUB_API_CONCURRENCY", 10),
            pool_size: parse_or("WORKER_POOL_SIZE", 4),
            request_timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", 10)),
            github_refresh_interval: Duration::from_millis(parse_or(
                "GITHUB_CACHE_REFRESH_MS",
                12 * 60 * 60 * 1000,
            )),
            query_refresh_interval: Duration::from_millis(parse_or(
                "QUERY_CACHE_REFRESH_MS",
                60 * 60 * 1000,
            )),
            cache_mode: parse_or("CACHE_MODE", CacheMode::ReadWrite),
            cache_backend: parse_or("CACHE_BACKEND", BackendKind::Disk),
            cache_dir: env::var("CACHE_DIR").ok().map(PathBuf::from),
            redis_url: string_or("REDIS_URL", "redis://127.0.0.1:6379"),
            cache_should_be_ready: parse_or("CACHE_SHOULD_BE_READY", false),
        })
    }
}

fn string_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(e) => {
                warn!("Invalid {key}={raw} ({e}), using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}
