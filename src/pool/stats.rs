//! Request counters and the derived per-template snapshot.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use super::entry::PooledSandbox;

/// Raw counters for one template. Only ever incremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// `get_sandbox` calls.
    pub requests: u64,
    /// Calls served from a warm sandbox.
    pub hits: u64,
    /// Calls that failed to create a sandbox.
    pub errors: u64,
}

impl PoolStats {
    /// Fraction of requests served warm.
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.requests)
    }

    /// Fraction of requests that failed.
    pub fn error_rate(&self) -> f64 {
        ratio(self.errors, self.requests)
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Point-in-time view of one template's pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateStats {
    /// `get_sandbox` calls.
    pub requests: u64,
    /// Calls served from a warm sandbox.
    pub hits: u64,
    /// Calls that failed to create a sandbox.
    pub errors: u64,
    /// `hits / requests`.
    pub hit_rate: f64,
    /// `errors / requests`.
    pub error_rate: f64,
    /// Tracked sandboxes, including checked-out and stale ones.
    pub total: usize,
    /// Idle and valid.
    pub available: usize,
    /// Checked out.
    pub in_use: usize,
    /// Still running the warm-up check.
    pub warming: usize,
    /// Passed their warm-up check.
    pub verified: usize,
    /// Checkouts served by the sandboxes currently tracked.
    pub checkouts: u64,
    /// Configured idle capacity.
    pub target_size: usize,
    /// Mean creation plus warm-up time.
    pub avg_init_ms: u64,
}

impl TemplateStats {
    pub(crate) fn collect(
        counters: PoolStats,
        entries: &[PooledSandbox],
        target_size: usize,
        now: Instant,
        max_age: Duration,
    ) -> Self {
        let init_times: Vec<Duration> = entries
            .iter()
            .filter(|e| e.warmup_complete)
            .map(|e| e.init_time)
            .collect();
        let avg_init_ms = if init_times.is_empty() {
            0
        } else {
            let total: Duration = init_times.iter().sum();
            u64::try_from(total.as_millis() / init_times.len() as u128).unwrap_or(u64::MAX)
        };

        Self {
            requests: counters.requests,
            hits: counters.hits,
            errors: counters.errors,
            hit_rate: counters.hit_rate(),
            error_rate: counters.error_rate(),
            total: entries.len(),
            available: entries
                .iter()
                .filter(|e| e.is_available(now, max_age))
                .count(),
            in_use: entries.iter().filter(|e| e.in_use).count(),
            warming: entries.iter().filter(|e| !e.warmup_complete).count(),
            verified: entries.iter().filter(|e| e.warmup_verified).count(),
            checkouts: entries.iter().map(|e| e.total_uses).sum(),
            target_size,
            avg_init_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::mock::MockSandbox;

    #[test]
    fn test_rates_without_requests() {
        let stats = PoolStats::default();
        assert!(stats.hit_rate().abs() < f64::EPSILON);
        assert!(stats.error_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_rates() {
        let stats = PoolStats {
            requests: 8,
            hits: 6,
            errors: 1,
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert!((stats.error_rate() - 0.125).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_snapshot() {
        let now = Instant::now();
        let max_age = Duration::from_secs(600);

        let (_, a) = MockSandbox::shared("a");
        let (_, b) = MockSandbox::shared("b");
        let (_, c) = MockSandbox::shared("c");

        let mut ready = PooledSandbox::warming(a, now);
        ready.warmup_complete = true;
        ready.warmup_verified = true;
        ready.init_time = Duration::from_millis(300);
        let busy = PooledSandbox::checked_out(b, now, Duration::from_millis(500));
        let warming = PooledSandbox::warming(c, now);

        let counters = PoolStats {
            requests: 4,
            hits: 3,
            errors: 0,
        };
        let stats = TemplateStats::collect(counters, &[ready, busy, warming], 3, now, max_age);

        assert_eq!(stats.total, 3);
        assert_eq!(stats.available, 2);
        assert_eq!(stats.in_use, 1);
        assert_eq!(stats.warming, 1);
        assert_eq!(stats.verified, 1);
        assert_eq!(stats.checkouts, 1);
        assert_eq!(stats.target_size, 3);
        assert_eq!(stats.avg_init_ms, 400);
        assert!((stats.hit_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_serializes_as_json_object() {
        let stats = TemplateStats {
            requests: 1,
            hits: 1,
            errors: 0,
            hit_rate: 1.0,
            error_rate: 0.0,
            total: 3,
            available: 2,
            in_use: 1,
            warming: 0,
            verified: 2,
            checkouts: 5,
            target_size: 3,
            avg_init_ms: 1200,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["available"], 2);
        assert_eq!(json["avg_init_ms"], 1200);
    }
}
