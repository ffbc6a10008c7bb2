// Binary entry point: loads configuration and seed data, wires the token
// pool, cache, and aggregation engine together, then runs warm cycles until
// interrupted.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use octorank::cache::{BackendKind, Cache, DiskBackend, RedisBackend};
use octorank::config::Config;
use octorank::contributors::ContributorAggregator;
use octorank::error::Result;
use octorank::github::{GithubApi, TokenPool};
use octorank::model::{City, Language};
use octorank::service::ContributorService;

/// Contributors computed per language during a warm cycle.
const WARM_RESULT_COUNT: usize = 15;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "octorank=info".into()),
        )
        .init();

    let config = Config::load()?;
    info!(
        "Starting with {} tokens, {} cache backend, {} mode",
        config.tokens.len(),
        config.cache_backend,
        config.cache_mode
    );

    let cache = build_cache(&config).await?;
    let pool = Arc::new(TokenPool::new(&config.tokens, &config.rate_limit_url)?);
    let api = Arc::new(GithubApi::new(
        pool,
        &config.graphql_url,
        config.request_timeout,
    ));
    let aggregator = ContributorAggregator::new(
        api,
        cache,
        config.api_concurrency,
        config.pool_size,
        config.github_refresh_interval,
    );
    let service = ContributorService::new(aggregator, config.query_refresh_interval);

    let cities = load_seed::<City>("CITIES_FILE", "cities.json")?;
    let languages = load_seed::<Language>("LANGUAGES_FILE", "languages.json")?;
    info!("Loaded {} cities, {} languages", cities.len(), languages.len());

    let mut interval = tokio::time::interval(config.query_refresh_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                service.warm(&cities, &languages, WARM_RESULT_COUNT).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}

async fn build_cache(config: &Config) -> Result<Cache> {
    let backend: Arc<dyn octorank::cache::CacheBackend> = match config.cache_backend {
        BackendKind::Disk => Arc::new(DiskBackend::new(config.cache_dir.clone())?),
        BackendKind::Redis => Arc::new(RedisBackend::connect(&config.redis_url).await?),
    };
    Ok(Cache::new(
        backend,
        config.cache_mode,
        config.cache_should_be_ready,
    ))
}

/// Reads a JSON array of seed records from the path in `env_key`, falling
/// back to `default_path` in the working directory.
fn load_seed<T: serde::de::DeserializeOwned>(env_key: &str, default_path: &str) -> Result<Vec<T>> {
    let path = std::env::var(env_key).unwrap_or_else(|_| default_path.to_string());
    if !Path::new(&path).exists() {
        warn!("Seed file {} not found, starting with no entries", path);
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(&path)?;
    serde_json::from_str(&raw).map_err(|e| {
        error!("Failed to parse seed file {}: {}", path, e);
        e.into()
    })
}
