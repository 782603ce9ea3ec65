use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::warn;

use crate::traits::CoordinationStore;

/// Exclusive per-caller lease on the store that granted it.
///
/// `release` consumes the lease. A lease dropped without `release` schedules
/// the release on the current tokio runtime; when there is none the store TTL
/// reclaims the key.
pub struct Lease {
    key: String,
    token: String,
    ttl: Duration,
    store: Arc<dyn CoordinationStore>,
    released: bool,
}

/// Floor for the refresh period of very short leases.
const MIN_REFRESH_EVERY: Duration = Duration::from_millis(5);

impl Lease {
    pub(crate) fn new(
        key: String,
        token: String,
        ttl: Duration,
        store: Arc<dyn CoordinationStore>,
    ) -> Self {
        Self {
            key,
            token,
            ttl,
            store,
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Pushes the expiry a full TTL ahead. Returns whether the key was still
    /// held by this lease.
    pub async fn refresh(&self) -> bool {
        match self.store.extend_if_owner(&self.key, &self.token, self.ttl).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(
                    event = "lock_refresh_lost",
                    backend = self.store.name(),
                    key = %self.key,
                    "request lock expired before the request finished"
                );
                false
            }
            Err(err) => {
                warn!(
                    event = "lock_refresh_error",
                    backend = self.store.name(),
                    key = %self.key,
                    error = %err,
                    "failed to refresh request lock"
                );
                false
            }
        }
    }

    /// Drives `work` to completion while refreshing the lease every third of
    /// its TTL. The lock stays held for as long as `work` runs.
    pub async fn hold_while<F: Future>(&self, work: F) -> F::Output {
        let every = (self.ttl / 3).max(MIN_REFRESH_EVERY);
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(work);
        loop {
            tokio::select! {
                out = &mut work => return out,
                _ = ticker.tick() => {
                    self.refresh().await;
                }
            }
        }
    }

    /// Returns whether the key was still held by this lease.
    pub async fn release(mut self) -> bool {
        self.released = true;
        release_logged(self.store.as_ref(), &self.key, &self.token).await
    }
}

async fn release_logged(store: &dyn CoordinationStore, key: &str, token: &str) -> bool {
    match store.release_if_owner(key, token).await {
        Ok(deleted) => deleted,
        Err(err) => {
            warn!(
                event = "lock_release_error",
                backend = store.name(),
                key,
                error = %err,
                "failed to release request lock; relying on its ttl"
            );
            false
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            release_logged(store.as_ref(), &key, &token).await;
        });
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("backend", &self.store.name())
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}
