use std::time::Duration;

use tokio::time::Instant;

/// Returns how long to wait before admitting the next chunk.
///
/// `max(0, bytes / target_rate - active_elapsed)`, or zero when the rate is
/// unlimited (`target_rate <= 0`). This limits the average rate over the
/// window, not the rate of any single chunk.
pub fn throttle_delay(target_rate: i64, bytes: u64, active_elapsed: Duration) -> Duration {
    if target_rate <= 0 {
        return Duration::ZERO;
    }
    let expected = Duration::from_secs_f64(bytes as f64 / target_rate as f64);
    expected.saturating_sub(active_elapsed)
}

/// Rate-limiting window of one transfer.
///
/// The window restarts whenever the transfer (re)enters InProgress, so time
/// spent paused never turns into a burst allowance and a rate supplied on
/// resume applies from that moment on.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    started: Instant,
    base_bytes: u64,
}

impl RateWindow {
    /// Opens a window at `now` with `bytes` already transferred.
    pub fn new(bytes: u64) -> Self {
        Self {
            started: Instant::now(),
            base_bytes: bytes,
        }
    }

    pub fn reset(&mut self, bytes: u64) {
        *self = Self::new(bytes);
    }

    /// Delay owed at `target_rate` with `bytes` transferred in total.
    pub fn delay(&self, target_rate: i64, bytes: u64) -> Duration {
        let in_window = bytes.saturating_sub(self.base_bytes);
        throttle_delay(target_rate, in_window, self.started.elapsed())
    }
}
