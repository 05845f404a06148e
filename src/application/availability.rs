//! Consecutive-failure tracking behind each adapter's `is_available` predicate.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, warn};

const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Marks a dependency unavailable after `failure_threshold` consecutive failures.
///
/// An unavailable dependency becomes worth probing again once `retry_after`
/// has elapsed since the last failure; the next success restores it.
#[derive(Debug)]
pub struct AvailabilityTracker {
    name: &'static str,
    healthy: AtomicBool,
    failures: AtomicU32,
    last_failure_ms: AtomicU64,
    epoch: Instant,
    failure_threshold: u32,
    retry_after: Duration,
}

impl AvailabilityTracker {
    pub fn new(name: &'static str) -> Self {
        Self::with_policy(name, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RETRY_AFTER)
    }

    pub fn with_policy(name: &'static str, failure_threshold: u32, retry_after: Duration) -> Self {
        Self {
            name,
            healthy: AtomicBool::new(true),
            failures: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            failure_threshold: failure_threshold.max(1),
            retry_after,
        }
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        if !self.healthy.swap(true, Ordering::AcqRel) {
            info!(dependency = self.name, "dependency recovered");
        }
    }

    pub fn record_failure(&self) {
        self.last_failure_ms.store(self.elapsed_ms(), Ordering::Release);
        let failures = self.failures.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if failures >= self.failure_threshold && self.healthy.swap(false, Ordering::AcqRel) {
            warn!(
                dependency = self.name,
                failures,
                retry_after_ms = self.retry_after.as_millis() as u64,
                "dependency marked unavailable; degrading"
            );
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Healthy, or unhealthy long enough that one more attempt is allowed.
    pub fn is_available(&self) -> bool {
        if self.is_healthy() {
            return true;
        }
        let since_failure = self
            .elapsed_ms()
            .saturating_sub(self.last_failure_ms.load(Ordering::Acquire));
        u128::from(since_failure) >= self.retry_after.as_millis()
    }

    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
