use std::time::Duration;

use tutorgate_core::IdentityKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationConfig {
    pub lock_ttl: Duration,
    pub rate_limit: usize,
    pub rate_window: Duration,
    pub key_prefix: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            rate_limit: 20,
            rate_window: Duration::from_secs(60),
            key_prefix: "ai:".to_string(),
        }
    }
}

impl CoordinationConfig {
    pub fn lock_key(&self, identity: &IdentityKey) -> String {
        format!("{}lock:{identity}", self.key_prefix)
    }

    pub fn rate_key(&self, identity: &IdentityKey) -> String {
        format!("{}rl:{identity}", self.key_prefix)
    }
}

/// Upstash-style REST endpoint accepting command pipelines.
#[derive(Debug, Clone)]
pub struct RestStoreConfig {
    pub url: String,
    pub token: String,
    pub timeout: Duration,
}

impl RestStoreConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(feature = "redis-backend")]
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub enum StoreConfig {
    Rest(RestStoreConfig),
    #[cfg(feature = "redis-backend")]
    Redis(RedisStoreConfig),
}
