use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tutorgate_coord::{CoordinationConfig, RestStoreConfig, StoreConfig, StoreError};
use tutorgate_core::{GuardLimits, RetrievalLimits};
use tutorgate_materials::MaterialStoreError;
use tutorgate_upstream::{OpenAiCompatibleConfig, ProviderError, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}")]
    Invalid {
        key: &'static str,
        expected: &'static str,
    },

    #[error("coordination store: {0}")]
    Store(#[from] StoreError),

    #[error("upstream provider: {0}")]
    Provider(#[from] ProviderError),

    #[error("materials store: {0}")]
    Materials(#[from] MaterialStoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub log_format: LogFormat,
    /// `None` when no upstream api key is configured; every chat request is
    /// then answered with a server error.
    pub upstream: Option<OpenAiCompatibleConfig>,
    /// `None` runs coordination in-process only.
    pub store: Option<StoreConfig>,
    pub coordination: CoordinationConfig,
    pub guard: GuardLimits,
    pub retrieval: RetrievalLimits,
    pub retry: RetryPolicy,
    pub materials_db: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8790),
            log_format: LogFormat::Text,
            upstream: None,
            store: None,
            coordination: CoordinationConfig::default(),
            guard: GuardLimits::default(),
            retrieval: RetrievalLimits::default(),
            retry: RetryPolicy::default(),
            materials_db: None,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let kv: HashMap<String, String> = std::env::vars().collect();
        Self::from_kv(&kv)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_addr = match non_empty(kv, "TUTORGATE_BIND_ADDR") {
            None => defaults.bind_addr,
            Some(v) => v.parse::<SocketAddr>().map_err(|_| ConfigError::Invalid {
                key: "TUTORGATE_BIND_ADDR",
                expected: "a host:port socket address",
            })?,
        };

        let log_format = match non_empty(kv, "TUTORGATE_LOG_FORMAT").map(str::to_ascii_lowercase) {
            None => LogFormat::Text,
            Some(v) if v == "text" => LogFormat::Text,
            Some(v) if v == "json" => LogFormat::Json,
            Some(_) => {
                return Err(ConfigError::Invalid {
                    key: "TUTORGATE_LOG_FORMAT",
                    expected: "text or json",
                })
            }
        };

        let upstream = first_non_empty(kv, &["TUTORGATE_UPSTREAM_API_KEY", "OPENAI_API_KEY"])
            .map(|api_key| -> Result<OpenAiCompatibleConfig, ConfigError> {
                let mut cfg = OpenAiCompatibleConfig::new(api_key);
                if let Some(base_url) = non_empty(kv, "TUTORGATE_UPSTREAM_BASE_URL") {
                    cfg.base_url = base_url.to_string();
                }
                let timeout_ms = parse_u64(kv, "TUTORGATE_UPSTREAM_TIMEOUT_MS", 60_000, 1_000, 600_000)?;
                cfg.timeout = Duration::from_millis(timeout_ms);
                Ok(cfg)
            })
            .transpose()?;

        let store = store_config(kv)?;

        let coordination = CoordinationConfig {
            lock_ttl: Duration::from_secs(parse_u64(kv, "TUTORGATE_LOCK_TTL_SECS", 30, 1, 3_600)?),
            rate_limit: parse_usize(kv, "TUTORGATE_RATE_LIMIT", 20, 1, 10_000)?,
            rate_window: Duration::from_secs(parse_u64(kv, "TUTORGATE_RATE_WINDOW_SECS", 60, 1, 86_400)?),
            key_prefix: non_empty(kv, "TUTORGATE_KEY_PREFIX")
                .map_or(defaults.coordination.key_prefix, ToString::to_string),
        };

        let guard = GuardLimits {
            max_user_message_chars: parse_usize(kv, "TUTORGATE_MAX_USER_MESSAGE_CHARS", 4_000, 1, 1_000_000)?,
            max_top_k: parse_u64(kv, "TUTORGATE_MAX_TOP_K", 8, 1, 100)?,
            max_context_chars: parse_usize(kv, "TUTORGATE_MAX_CONTEXT_CHARS", 20_000, 1, 1_000_000)?,
        };

        let retrieval = RetrievalLimits {
            max_chunks: parse_usize(kv, "TUTORGATE_RETRIEVAL_MAX_CHUNKS", 10, 1, 100)?,
            max_total_chars: parse_usize(kv, "TUTORGATE_RETRIEVAL_MAX_CHARS", 6_500, 1, 1_000_000)?,
            max_chunk_chars: parse_usize(kv, "TUTORGATE_RETRIEVAL_CHUNK_CHARS", 2_000, 1, 100_000)?,
            ..defaults.retrieval
        };

        let retry = RetryPolicy {
            max_attempts: parse_u32(kv, "TUTORGATE_UPSTREAM_MAX_ATTEMPTS", 5, 1, 10)?,
            base_backoff: Duration::from_millis(parse_u64(kv, "TUTORGATE_UPSTREAM_BACKOFF_MS", 250, 0, 60_000)?),
            max_jitter: Duration::from_millis(parse_u64(kv, "TUTORGATE_UPSTREAM_JITTER_MS", 125, 0, 60_000)?),
        };

        let materials_db = non_empty(kv, "TUTORGATE_MATERIALS_DB").map(PathBuf::from);

        Ok(Self {
            bind_addr,
            log_format,
            upstream,
            store,
            coordination,
            guard,
            retrieval,
            retry,
            materials_db,
        })
    }
}

/// A native Redis URL wins over the REST pipeline endpoint. A REST url with no
/// token counts as unconfigured.
fn store_config(kv: &HashMap<String, String>) -> Result<Option<StoreConfig>, ConfigError> {
    if let Some(url) = non_empty(kv, "TUTORGATE_REDIS_URL") {
        #[cfg(feature = "redis-backend")]
        return Ok(Some(StoreConfig::Redis(tutorgate_coord::RedisStoreConfig {
            url: url.to_string(),
        })));
        #[cfg(not(feature = "redis-backend"))]
        {
            let _ = url;
            return Err(ConfigError::Invalid {
                key: "TUTORGATE_REDIS_URL",
                expected: "unset unless built with the redis-backend feature",
            });
        }
    }

    let url = first_non_empty(kv, &["UPSTASH_REDIS_REST_URL", "KV_REST_API_URL"]);
    let token = first_non_empty(kv, &["UPSTASH_REDIS_REST_TOKEN", "KV_REST_API_TOKEN"]);
    Ok(match (url, token) {
        (Some(url), Some(token)) => Some(StoreConfig::Rest(RestStoreConfig::new(url, token))),
        _ => None,
    })
}

fn non_empty<'a>(kv: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    kv.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn first_non_empty<'a>(kv: &'a HashMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| non_empty(kv, key))
}

fn parse_u64(
    kv: &HashMap<String, String>,
    key: &'static str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    match non_empty(kv, key) {
        None => Ok(default),
        Some(v) => v
            .parse::<u64>()
            .map(|n| n.clamp(min, max))
            .map_err(|_| ConfigError::Invalid {
                key,
                expected: "a non-negative integer",
            }),
    }
}

fn parse_usize(
    kv: &HashMap<String, String>,
    key: &'static str,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize, ConfigError> {
    match non_empty(kv, key) {
        None => Ok(default),
        Some(v) => v
            .parse::<usize>()
            .map(|n| n.clamp(min, max))
            .map_err(|_| ConfigError::Invalid {
                key,
                expected: "a non-negative integer",
            }),
    }
}

fn parse_u32(
    kv: &HashMap<String, String>,
    key: &'static str,
    default: u32,
    min: u32,
    max: u32,
) -> Result<u32, ConfigError> {
    match non_empty(kv, key) {
        None => Ok(default),
        Some(v) => v
            .parse::<u32>()
            .map(|n| n.clamp(min, max))
            .map_err(|_| ConfigError::Invalid {
                key,
                expected: "a non-negative integer",
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = GatewayConfig::from_kv(&HashMap::new()).expect("config");
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:8790");
        assert!(cfg.upstream.is_none());
        assert!(cfg.store.is_none());
        assert_eq!(cfg.coordination, CoordinationConfig::default());
        assert_eq!(cfg.guard, GuardLimits::default());
        assert_eq!(cfg.retrieval, RetrievalLimits::default());
        assert_eq!(cfg.retry, RetryPolicy::default());
        assert_eq!(cfg.log_format, LogFormat::Text);
    }

    #[test]
    fn upstream_key_prefers_gateway_specific_variable() {
        let cfg = GatewayConfig::from_kv(&kv(&[
            ("OPENAI_API_KEY", "sk-generic"),
            ("TUTORGATE_UPSTREAM_API_KEY", "sk-gateway"),
            ("TUTORGATE_UPSTREAM_BASE_URL", "http://127.0.0.1:9000"),
        ]))
        .expect("config");
        let upstream = cfg.upstream.expect("upstream");
        assert_eq!(upstream.api_key, "sk-gateway");
        assert_eq!(upstream.base_url, "http://127.0.0.1:9000");
        assert_eq!(upstream.timeout, Duration::from_secs(60));
    }

    #[test]
    fn numeric_values_are_clamped() {
        let cfg = GatewayConfig::from_kv(&kv(&[
            ("TUTORGATE_RATE_LIMIT", "0"),
            ("TUTORGATE_MAX_TOP_K", "500"),
            ("TUTORGATE_UPSTREAM_MAX_ATTEMPTS", "99"),
        ]))
        .expect("config");
        assert_eq!(cfg.coordination.rate_limit, 1);
        assert_eq!(cfg.guard.max_top_k, 100);
        assert_eq!(cfg.retry.max_attempts, 10);
    }

    #[test]
    fn unparseable_values_fail_startup() {
        let err = GatewayConfig::from_kv(&kv(&[("TUTORGATE_RATE_WINDOW_SECS", "a minute")]))
            .expect_err("invalid");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "TUTORGATE_RATE_WINDOW_SECS",
                ..
            }
        ));
        assert!(GatewayConfig::from_kv(&kv(&[("TUTORGATE_LOG_FORMAT", "xml")])).is_err());
        assert!(GatewayConfig::from_kv(&kv(&[("TUTORGATE_BIND_ADDR", "nowhere")])).is_err());
    }

    #[test]
    fn rest_store_needs_url_and_token() {
        let cfg = GatewayConfig::from_kv(&kv(&[("UPSTASH_REDIS_REST_URL", "https://x.upstash.io")]))
            .expect("config");
        assert!(cfg.store.is_none());

        let cfg = GatewayConfig::from_kv(&kv(&[
            ("KV_REST_API_URL", "https://x.upstash.io"),
            ("KV_REST_API_TOKEN", "tok"),
        ]))
        .expect("config");
        assert!(matches!(cfg.store, Some(StoreConfig::Rest(ref c)) if c.token == "tok"));
    }
}
