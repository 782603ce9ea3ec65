use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;

/// One request recorded in a caller's sliding window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEntry {
    pub timestamp_ms: u64,
    pub member: String,
}

impl WindowEntry {
    /// Entry stamped now, with a `<now>-<8 alphanumerics>` member so two
    /// requests in the same millisecond stay distinct.
    pub fn now() -> Self {
        let timestamp_ms = now_ms();
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        Self {
            timestamp_ms,
            member: format!("{timestamp_ms}-{}", nonce.to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Admitted,
    Limited,
}

impl RateDecision {
    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationMode {
    Shared,
    Local,
}

impl CoordinationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Local => "local",
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
