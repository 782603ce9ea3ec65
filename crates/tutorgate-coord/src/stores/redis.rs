use std::time::Duration;

use async_trait::async_trait;
use redis::{Client, Script};

use crate::config::RedisStoreConfig;
use crate::error::StoreError;
use crate::scripts::{EXTEND_IF_OWNER, RECORD_IN_WINDOW, RELEASE_IF_OWNER, window_expiry_secs};
use crate::traits::CoordinationStore;
use crate::types::WindowEntry;

/// Native Redis connection for deployments that run their own server.
pub struct RedisStore {
    client: Client,
    release: Script,
    extend: Script,
    record: Script,
}

impl RedisStore {
    pub fn new(config: &RedisStoreConfig) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(config.url.as_str())?,
            release: Script::new(RELEASE_IF_OWNER),
            extend: Script::new(EXTEND_IF_OWNER),
            record: Script::new(RECORD_IN_WINDOW),
        })
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl CoordinationStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release_if_owner(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let deleted: i64 = self
            .release
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn extend_if_owner(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let extended: i64 = self
            .extend
            .key(key)
            .arg(token)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(extended > 0)
    }

    async fn record_in_window(
        &self,
        key: &str,
        entry: &WindowEntry,
        window: Duration,
        limit: usize,
    ) -> Result<bool, StoreError> {
        let window_ms = millis(window);
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let recorded: i64 = self
            .record
            .key(key)
            .arg(entry.timestamp_ms)
            .arg(window_ms)
            .arg(limit)
            .arg(&entry.member)
            .arg(window_expiry_secs(window_ms))
            .invoke_async(&mut conn)
            .await?;
        Ok(recorded > 0)
    }
}
