//! Per-identity update-rate governor.
//!
//! Owned by the hub task and only touched from its serialized command
//! handling, so a check-then-record is atomic without a lock.

use place_core::Identity;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Minimum-interval gate keyed by identity id.
#[derive(Debug)]
pub struct RateGovernor {
    min_interval: Duration,
    last_accepted: HashMap<u64, Instant>,
}

impl RateGovernor {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: HashMap::new(),
        }
    }

    /// Accept and record `now` iff at least `min_interval` has passed since
    /// this identity's last accepted write. Denials leave the record alone.
    pub fn try_acquire(&mut self, identity: &Identity, now: Instant) -> bool {
        match self.last_accepted.get(&identity.id) {
            Some(last) if now.saturating_duration_since(*last) < self.min_interval => false,
            _ => {
                self.last_accepted.insert(identity.id, now);
                true
            }
        }
    }

    /// Forget identities whose next write would pass anyway.
    /// Returns the number of entries removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.last_accepted.len();
        let min = self.min_interval;
        self.last_accepted
            .retain(|_, last| now.saturating_duration_since(*last) < min);
        before - self.last_accepted.len()
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.last_accepted.len()
    }
}
