//! Pool bookkeeping for a single sandbox.

use std::time::Duration;
use tokio::time::Instant;

use crate::sandbox::SandboxRef;

/// Error reports after which a pooled sandbox is no longer handed out.
pub(crate) const MAX_ERRORS: u32 = 3;

/// A sandbox plus the metadata the pool needs to reuse and retire it.
#[derive(Clone)]
pub(crate) struct PooledSandbox {
    pub sandbox: SandboxRef,
    pub created_at: Instant,
    pub last_used_at: Instant,
    /// Checked out to a caller. Only checkout and release flip this.
    pub in_use: bool,
    /// False while the warm-up check is still running.
    pub warmup_complete: bool,
    /// The warm-up check ran and passed.
    pub warmup_verified: bool,
    pub init_time: Duration,
    pub total_uses: u64,
    pub error_count: u32,
}

impl PooledSandbox {
    /// A freshly created sandbox that is about to be warmed.
    pub fn warming(sandbox: SandboxRef, created_at: Instant) -> Self {
        Self {
            sandbox,
            created_at,
            last_used_at: created_at,
            in_use: false,
            warmup_complete: false,
            warmup_verified: false,
            init_time: Duration::ZERO,
            total_uses: 0,
            error_count: 0,
        }
    }

    /// A sandbox created on demand and handed straight to a caller.
    pub fn checked_out(sandbox: SandboxRef, created_at: Instant, init_time: Duration) -> Self {
        Self {
            in_use: true,
            warmup_complete: true,
            init_time,
            total_uses: 1,
            ..Self::warming(sandbox, created_at)
        }
    }

    pub fn id(&self) -> &str {
        self.sandbox.id()
    }

    /// Young enough, recently used enough, and not failing.
    pub fn is_valid(&self, now: Instant, max_age: Duration) -> bool {
        let age = now.saturating_duration_since(self.created_at);
        let idle = now.saturating_duration_since(self.last_used_at);
        age < max_age && idle < max_age && self.error_count < MAX_ERRORS
    }

    /// Counts toward the pool's idle capacity.
    pub fn is_available(&self, now: Instant, max_age: Duration) -> bool {
        !self.in_use && self.is_valid(now, max_age)
    }

    /// Can be checked out right now.
    pub fn is_ready(&self, now: Instant, max_age: Duration) -> bool {
        self.warmup_complete && self.is_available(now, max_age)
    }

    pub fn checkout(&mut self, now: Instant) {
        self.in_use = true;
        self.last_used_at = now;
        self.total_uses += 1;
    }

    /// Returns false if the sandbox was not checked out.
    pub fn release(&mut self, now: Instant) -> bool {
        if !self.in_use {
            return false;
        }
        self.in_use = false;
        self.last_used_at = now;
        true
    }
}
