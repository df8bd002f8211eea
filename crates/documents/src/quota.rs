//! Per-tenant concurrency quota.
//!
//! A counting semaphore whose state is durable. Mutations go through
//! `try_acquire`, `release` and `set_limit` only.

use serde::{Deserialize, Serialize};

/// Limit applied to a tenant that has never been configured.
pub const DEFAULT_QUOTA_LIMIT: u32 = 10;

/// Outcome of an acquire attempt, with the counters after the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AcquireDecision {
    pub granted: bool,
    pub inflight: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    inflight: u32,
    limit: u32,
}

impl Default for QuotaState {
    fn default() -> Self {
        Self::with_limit(DEFAULT_QUOTA_LIMIT)
    }
}

impl QuotaState {
    pub fn with_limit(limit: u32) -> Self {
        Self { inflight: 0, limit }
    }

    /// Rebuild state loaded from storage.
    pub fn restore(inflight: u32, limit: u32) -> Self {
        Self { inflight, limit }
    }

    pub fn inflight(&self) -> u32 {
        self.inflight
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Slots still available. Zero when the limit was lowered below `inflight`.
    pub fn headroom(&self) -> u32 {
        self.limit.saturating_sub(self.inflight)
    }

    /// Whether `additional` jobs fit without exceeding the limit.
    pub fn can_admit(&self, additional: u32) -> bool {
        self.inflight.saturating_add(additional) <= self.limit
    }

    pub fn try_acquire(&mut self) -> AcquireDecision {
        let granted = self.inflight < self.limit;
        if granted {
            self.inflight += 1;
        }
        AcquireDecision {
            granted,
            inflight: self.inflight,
            limit: self.limit,
        }
    }

    /// Return one slot. Saturates at zero so duplicate releases are harmless.
    pub fn release(&mut self) -> u32 {
        self.inflight = self.inflight.saturating_sub(1);
        self.inflight
    }

    /// Change the limit. Lowering it below `inflight` does not revoke slots;
    /// no new slot is granted until `inflight` drops below the new limit.
    pub fn set_limit(&mut self, limit: u32) {
        self.limit = limit;
    }
}
