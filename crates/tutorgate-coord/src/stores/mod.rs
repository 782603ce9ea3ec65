pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis;
pub mod rest;

pub use memory::MemoryStore;
#[cfg(feature = "redis-backend")]
pub use self::redis::RedisStore;
pub use rest::RestPipelineStore;
