use std::time::Duration;

use tokio::time::Instant;

/// Monotonic time source for token refill accounting
///
/// Backed by the tokio clock so paused-time tests drive refills
/// deterministically.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimeSource {
    /// Epoch for relative time measurements
    epoch: Instant,
}

impl TimeSource {
    /// Create a new time source with current time as epoch
    #[inline(always)]
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    /// Get current time in nanoseconds since epoch
    #[inline(always)]
    pub fn now_nanos(&self) -> u64 {
        duration_to_nanos(self.epoch.elapsed())
    }
}

impl Default for TimeSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert duration to nanoseconds, saturating at `u64::MAX`
#[inline(always)]
pub(crate) fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
