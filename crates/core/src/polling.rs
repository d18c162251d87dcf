//! Worker polling defaults and idle detection.

use std::time::Duration;

/// Consecutive empty polls before a stop-when-idle worker exits.
pub const DEFAULT_IDLE_POLLS: u32 = 3;

/// Delay between empty polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after a transient storage conflict before claiming again.
pub const DEFAULT_CONFLICT_BACKOFF: Duration = Duration::from_millis(100);

/// Tasks claimed per call. Small batches keep competing jobs interleaved.
pub const DEFAULT_BATCH_SIZE: i64 = 1;

/// Age after which a `processing` task with no live executor is reclaimed.
pub const DEFAULT_REAPER_THRESHOLD: Duration = Duration::from_secs(300);

/// How often the reaper looks for abandoned claims.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(30);

/// Counts consecutive empty polls.
///
/// A `threshold` of `None` never reports idle (service mode).
#[derive(Debug, Clone)]
pub struct IdleTracker {
    threshold: Option<u32>,
    consecutive_empty: u32,
}

impl IdleTracker {
    pub fn new(threshold: Option<u32>) -> Self {
        Self {
            threshold,
            consecutive_empty: 0,
        }
    }

    /// Record the outcome of one poll. Returns `true` once the idle
    /// threshold has been reached.
    pub fn record(&mut self, claimed: usize) -> bool {
        if claimed > 0 {
            self.consecutive_empty = 0;
            return false;
        }
        self.consecutive_empty += 1;
        self.threshold
            .is_some_and(|limit| self.consecutive_empty >= limit.max(1))
    }

    pub fn consecutive_empty(&self) -> u32 {
        self.consecutive_empty
    }
}
