use crate::domain::{BreachCounterStore, DomainError, DomainResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::time::Duration;
use tracing::{debug, info};

/// Breach counters kept in Redis so every detector replica sees the same counts
#[derive(Clone)]
pub struct RedisBreachCounterStore {
    connection: ConnectionManager,
}

impl RedisBreachCounterStore {
    /// Connect and verify the server answers PING
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("failed to create redis client")?;

        let connection = ConnectionManager::new(client)
            .await
            .context("failed to connect to redis")?;

        let mut test_conn = connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut test_conn)
            .await
            .context("redis connection test failed")?;

        info!(redis_url = %redis_url, "connected to breach counter store");

        Ok(Self { connection })
    }
}

fn unavailable(e: RedisError) -> DomainError {
    DomainError::CounterStoreUnavailable(e.to_string())
}

#[async_trait]
impl BreachCounterStore for RedisBreachCounterStore {
    async fn increment(&self, key: &str, idle_expiry: Duration) -> DomainResult<u64> {
        let mut conn = self.connection.clone();

        // INCR and EXPIRE in one MULTI block so a counter never lives without its expiry
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(idle_expiry.as_secs().max(1))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        debug!(key = %key, count, "incremented breach counter");
        Ok(count)
    }

    async fn reset(&self, key: &str) -> DomainResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)?;

        debug!(key = %key, "reset breach counter");
        Ok(())
    }

    async fn is_processed(&self, marker: &str) -> DomainResult<bool> {
        let mut conn = self.connection.clone();
        let exists: i64 = redis::cmd("EXISTS")
            .arg(marker)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(exists > 0)
    }

    async fn mark_processed(&self, marker: &str, ttl: Duration) -> DomainResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(marker)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
