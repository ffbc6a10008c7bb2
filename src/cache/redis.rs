// Shared key-value cache backend on redis.
// Values live under `namespace:key`; the insert timestamp is a side record
// under `namespace:key:ts` because redis has no per-key write time.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::error::Result;

use super::CacheBackend;

const TIMESTAMP_SUFFIX: &str = ":ts";

pub struct RedisBackend {
    manager: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        info!("Connected to redis cache at {}", url);
        Ok(Self { manager })
    }

    fn redis_key(namespace: &str, key: &str) -> String {
        format!("{}:{}", namespace, key)
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn read(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let mut con = self.manager.clone();
        let value: Option<String> = con.get(Self::redis_key(namespace, key)).await?;
        Ok(value)
    }

    async fn write(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let redis_key = Self::redis_key(namespace, key);
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut con = self.manager.clone();
        let _: () = con.set(&redis_key, value).await?;
        let _: () = con
            .set(format!("{redis_key}{TIMESTAMP_SUFFIX}"), now_ms.to_string())
            .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let redis_key = Self::redis_key(namespace, key);
        let mut con = self.manager.clone();
        let _: () = con.del(&redis_key).await?;
        let _: () = con.del(format!("{redis_key}{TIMESTAMP_SUFFIX}")).await?;
        Ok(())
    }

    async fn insert_time_ms(&self, namespace: &str, key: &str) -> Result<Option<u64>> {
        let redis_key = Self::redis_key(namespace, key);
        let mut con = self.manager.clone();
        let raw: Option<String> = con.get(format!("{redis_key}{TIMESTAMP_SUFFIX}")).await?;
        Ok(raw.and_then(|s| s.parse().ok()))
    }
}
