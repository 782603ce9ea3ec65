use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::traits::CoordinationStore;
use crate::types::{WindowEntry, now_ms};

#[derive(Debug, Clone)]
struct LockSlot {
    token: String,
    expires_at_ms: u64,
}

/// In-process coordination state. Exclusion only holds inside this process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    locks: Mutex<HashMap<String, LockSlot>>,
    windows: Mutex<HashMap<String, VecDeque<u64>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window_len(&self, key: &str) -> usize {
        self.windows.lock().get(key).map_or(0, VecDeque::len)
    }

    pub fn tracked_windows(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn holds_lock(&self, key: &str) -> bool {
        let now = now_ms();
        self.locks
            .lock()
            .get(key)
            .is_some_and(|slot| slot.expires_at_ms > now)
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = now_ms();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let mut locks = self.locks.lock();
        locks.retain(|_, slot| slot.expires_at_ms > now);
        if locks.contains_key(key) {
            return Ok(false);
        }
        locks.insert(
            key.to_string(),
            LockSlot {
                token: token.to_string(),
                expires_at_ms: now.saturating_add(ttl_ms),
            },
        );
        Ok(true)
    }

    async fn release_if_owner(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let mut locks = self.locks.lock();
        if locks.get(key).is_some_and(|slot| slot.token == token) {
            locks.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn extend_if_owner(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = now_ms();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let mut locks = self.locks.lock();
        match locks.get_mut(key) {
            Some(slot) if slot.token == token && slot.expires_at_ms > now => {
                slot.expires_at_ms = now.saturating_add(ttl_ms);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_in_window(
        &self,
        key: &str,
        entry: &WindowEntry,
        window: Duration,
        limit: usize,
    ) -> Result<bool, StoreError> {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let cutoff = entry.timestamp_ms.saturating_sub(window_ms);
        let mut windows = self.windows.lock();
        windows.retain(|k, stamps| {
            k == key || stamps.back().is_some_and(|ts| ts.saturating_add(window_ms) > entry.timestamp_ms)
        });
        let stamps = windows.entry(key.to_string()).or_default();
        while stamps.front().is_some_and(|ts| *ts <= cutoff) {
            stamps.pop_front();
        }
        if stamps.len() >= limit {
            return Ok(false);
        }
        stamps.push_back(entry.timestamp_ms);
        Ok(true)
    }
}
