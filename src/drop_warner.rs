//! Rate-limited warnings for dropped payloads.
//!
//! Queues that evict work should say so without flooding the log. A
//! [`DropWarner`] counts drops and lets at most one warning through per
//! interval, carrying the number of drops accumulated since the previous
//! emission.

use std::{
    sync::Arc,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// Source of time, swappable in tests.
pub(crate) trait Clock: Send + Sync {
    /// Milliseconds elapsed since an arbitrary fixed origin.
    fn now_millis(&self) -> u64;
}

struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// How often a warner lets a warning through by default.
pub(crate) const DEFAULT_WARN_INTERVAL: Duration = Duration::from_secs(5);

// Sentinel for "no warning emitted yet"; the first drop always warns.
const NEVER: u64 = u64::MAX;

pub(crate) struct DropWarner {
    last_warn: AtomicU64,
    dropped: AtomicU64,
    interval_ms: u64,
    clock: Arc<dyn Clock>,
}

impl DropWarner {
    pub(crate) fn new(interval: Duration) -> Self {
        Self::with_clock(interval, Arc::new(MonotonicClock::default()))
    }

    pub(crate) fn with_clock(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            last_warn: AtomicU64::new(NEVER),
            dropped: AtomicU64::new(0),
            interval_ms: interval.as_millis() as u64,
            clock,
        }
    }

    /// Count one drop. If the interval since the previous warning has
    /// elapsed, `warn` is invoked with the total drops accumulated since
    /// then; otherwise the count keeps accumulating.
    pub(crate) fn note_drop(&self, mut warn: impl FnMut(u64)) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now_millis();
        let previous = self.last_warn.load(Ordering::Relaxed);
        if previous != NEVER && now.saturating_sub(previous) < self.interval_ms {
            return;
        }
        let count = self.dropped.swap(0, Ordering::Relaxed);
        if count > 0 {
            self.last_warn.store(now, Ordering::Relaxed);
            warn(count);
        }
    }
}

impl Default for DropWarner {
    fn default() -> Self {
        Self::new(DEFAULT_WARN_INTERVAL)
    }
}
