use std::sync::Arc;

use crate::config::StoreConfig;
use crate::error::StoreError;
#[cfg(feature = "redis-backend")]
use crate::stores::RedisStore;
use crate::stores::RestPipelineStore;
use crate::traits::CoordinationStore;

pub fn build_store(cfg: StoreConfig) -> Result<Arc<dyn CoordinationStore>, StoreError> {
    match cfg {
        StoreConfig::Rest(c) => Ok(Arc::new(RestPipelineStore::new(c)?)),
        #[cfg(feature = "redis-backend")]
        StoreConfig::Redis(c) => Ok(Arc::new(RedisStore::new(&c)?)),
    }
}
