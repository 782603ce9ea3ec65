use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::WindowEntry;

/// Atomic primitives the coordinator needs from a backing store.
///
/// Every method is a single atomic step on the store side; callers never
/// compose them into read-modify-write sequences.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Sets `key` to `token` with expiry `ttl` only when `key` is absent.
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Deletes `key` only while it still holds `token`.
    async fn release_if_owner(&self, key: &str, token: &str) -> Result<bool, StoreError>;

    /// Resets the expiry of `key` to `ttl` only while it still holds `token`.
    async fn extend_if_owner(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Prunes entries at or before `entry.timestamp_ms - window`, then records
    /// `entry` unless `limit` entries remain. Returns whether it was recorded.
    async fn record_in_window(
        &self,
        key: &str,
        entry: &WindowEntry,
        window: Duration,
        limit: usize,
    ) -> Result<bool, StoreError>;
}
