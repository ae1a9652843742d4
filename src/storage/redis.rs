// src/storage/redis.rs

use crate::error::Result;
use crate::storage::ResponseCache;
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Connection as RedisConnection, Pool, Runtime};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info, trace};

const DEFAULT_KEY_PREFIX: &str = "chat_relay:";
const CACHE_NAMESPACE: &str = "cache:";

/// Durable response cache on Redis; expiry is delegated to `SET .. EX`.
pub struct RedisResponseCache {
    pool: Pool,
    key_prefix: String,
}

impl RedisResponseCache {
    pub fn connect(redis_url: &str, key_prefix: Option<&str>) -> Result<Self> {
        let pool = PoolConfig::from_url(redis_url).create_pool(Some(Runtime::Tokio1))?;
        info!("Redis response cache pool created");
        Ok(Self::new(pool, key_prefix))
    }

    pub fn new(pool: Pool, key_prefix: Option<&str>) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.unwrap_or(DEFAULT_KEY_PREFIX).to_string(),
        }
    }

    fn prefix_key(&self, key: &str) -> String {
        format!("{}{CACHE_NAMESPACE}{}", self.key_prefix, key)
    }

    async fn get_connection(&self) -> Result<RedisConnection> {
        self.pool.get().await.map_err(Into::into)
    }
}

#[async_trait]
impl ResponseCache for RedisResponseCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(self.prefix_key(key)).await?;
        trace!(hit = value.is_some(), "RedisResponseCache::get");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let seconds = ttl.as_secs().max(1);
        let _: () = redis::cmd("SET")
            .arg(self.prefix_key(key))
            .arg(value)
            .arg("EX")
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        debug!(ttl_secs = seconds, "Stored response in Redis cache");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let _: () = conn.del(self.prefix_key(key)).await?;
        Ok(())
    }
}
