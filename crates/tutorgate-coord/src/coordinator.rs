use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;
use tutorgate_core::IdentityKey;
use uuid::Uuid;

use crate::config::CoordinationConfig;
use crate::error::StoreError;
use crate::lease::Lease;
use crate::stores::MemoryStore;
use crate::traits::CoordinationStore;
use crate::types::{CoordinationMode, RateDecision, WindowEntry};

/// Per-caller mutex and sliding-window limiter over a shared store, with a
/// process-local fallback.
///
/// The first shared-store failure switches the coordinator to the local store
/// for the rest of its lifetime. Leases granted earlier keep releasing against
/// the store that granted them.
pub struct Coordinator {
    shared: Option<Arc<dyn CoordinationStore>>,
    local: Arc<MemoryStore>,
    degraded: AtomicBool,
    config: CoordinationConfig,
}

impl Coordinator {
    pub fn new(config: CoordinationConfig, shared: Option<Arc<dyn CoordinationStore>>) -> Self {
        let degraded = shared.is_none();
        if degraded {
            warn!(
                event = "coordination_fallback",
                reason = "shared store not configured",
                "using in-process coordination; limits hold per process only"
            );
        }
        Self {
            shared,
            local: Arc::new(MemoryStore::new()),
            degraded: AtomicBool::new(degraded),
            config,
        }
    }

    pub fn local_only(config: CoordinationConfig) -> Self {
        Self::new(config, None)
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    pub fn mode(&self) -> CoordinationMode {
        if self.degraded.load(Ordering::Acquire) {
            CoordinationMode::Local
        } else {
            CoordinationMode::Shared
        }
    }

    pub fn local_store(&self) -> &MemoryStore {
        &self.local
    }

    fn healthy_shared(&self) -> Option<&Arc<dyn CoordinationStore>> {
        if self.degraded.load(Ordering::Acquire) {
            return None;
        }
        self.shared.as_ref()
    }

    fn fall_back(&self, route: &str, backend: &str, err: &StoreError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(
                event = "coordination_fallback",
                route,
                backend,
                error = %err,
                "shared coordination store failed; using in-process coordination"
            );
        }
    }

    /// Takes the per-caller lock, or `None` while another request holds it.
    pub async fn acquire(&self, route: &str, identity: &IdentityKey) -> Option<Lease> {
        let key = self.config.lock_key(identity);
        let token = Uuid::new_v4().to_string();

        if let Some(shared) = self.healthy_shared() {
            match shared.try_acquire(&key, &token, self.config.lock_ttl).await {
                Ok(true) => {
                    return Some(Lease::new(key, token, self.config.lock_ttl, Arc::clone(shared)));
                }
                Ok(false) => return None,
                Err(err) => self.fall_back(route, shared.name(), &err),
            }
        }

        let local: Arc<dyn CoordinationStore> = self.local.clone();
        match local.try_acquire(&key, &token, self.config.lock_ttl).await {
            Ok(true) => Some(Lease::new(key, token, self.config.lock_ttl, local)),
            _ => None,
        }
    }

    /// Counts this request against the caller's window, recording it only
    /// when admitted.
    pub async fn check_and_record(&self, route: &str, identity: &IdentityKey) -> RateDecision {
        let key = self.config.rate_key(identity);
        let entry = WindowEntry::now();
        let (window, limit) = (self.config.rate_window, self.config.rate_limit);

        if let Some(shared) = self.healthy_shared() {
            match shared.record_in_window(&key, &entry, window, limit).await {
                Ok(recorded) => return decision(recorded),
                Err(err) => self.fall_back(route, shared.name(), &err),
            }
        }

        match self.local.record_in_window(&key, &entry, window, limit).await {
            Ok(recorded) => decision(recorded),
            Err(_) => RateDecision::Limited,
        }
    }
}

const fn decision(recorded: bool) -> RateDecision {
    if recorded {
        RateDecision::Admitted
    } else {
        RateDecision::Limited
    }
}
