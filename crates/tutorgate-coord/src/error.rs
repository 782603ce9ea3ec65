use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store returned invalid response: {0}")]
    InvalidResponse(String),

    #[error("store API error: status={status}, body={body}")]
    Api { status: u16, body: String },

    #[error("store command failed: {0}")]
    Command(String),

    #[cfg(feature = "redis-backend")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
