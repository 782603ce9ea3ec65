use std::sync::Arc;

use serde_json::Value;
use tutorgate_coord::{Coordinator, Lease};
use tutorgate_core::{GuardLimits, GuardRejection, IdentityKey, PayloadClamps, precheck};

/// Outcome of admission for one request. The holder of an admitted lease owns
/// its release.
#[derive(Debug)]
pub struct GuardDecision {
    pub identity: IdentityKey,
    pub outcome: Result<Lease, GuardRejection>,
    pub clamps: PayloadClamps,
}

impl GuardDecision {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Length and processing checks, then the per-caller lock, then the quota.
/// The first failing step decides; a quota rejection gives the lock back.
pub struct PayloadGuard {
    limits: GuardLimits,
    coordinator: Arc<Coordinator>,
}

impl PayloadGuard {
    pub fn new(limits: GuardLimits, coordinator: Arc<Coordinator>) -> Self {
        Self {
            limits,
            coordinator,
        }
    }

    pub fn limits(&self) -> &GuardLimits {
        &self.limits
    }

    pub async fn evaluate(&self, route: &str, identity: IdentityKey, body: &Value) -> GuardDecision {
        let outcome = self.admit(route, &identity, body).await;
        GuardDecision {
            identity,
            outcome,
            clamps: PayloadClamps::from(&self.limits),
        }
    }

    async fn admit(
        &self,
        route: &str,
        identity: &IdentityKey,
        body: &Value,
    ) -> Result<Lease, GuardRejection> {
        precheck(body, &self.limits)?;

        let lease = self
            .coordinator
            .acquire(route, identity)
            .await
            .ok_or(GuardRejection::RequestInProgress)?;

        if !self
            .coordinator
            .check_and_record(route, identity)
            .await
            .is_admitted()
        {
            lease.release().await;
            return Err(GuardRejection::RateLimited);
        }

        Ok(lease)
    }
}
