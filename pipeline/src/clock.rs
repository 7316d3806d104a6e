use std::time::Duration;

use screen_recap_common::config::CaptureConfig;
use tracing::debug;

/// Adaptive inter-capture delay.
///
/// Changing scenes pull the delay down toward `min_delay_ms` so activity is
/// sampled densely; static scenes push it up toward `max_delay_ms` so a quiet
/// screen costs little. One step per evaluated frame, always clamped to the
/// configured bounds. The session re-reads the delay after every evaluation,
/// so an adjustment takes effect on the next capture, never the current one.
pub struct AdaptiveClock {
    delay_ms: u64,
    initial_ms: u64,
    min_ms: u64,
    max_ms: u64,
    step_ms: u64,
}

impl AdaptiveClock {
    pub fn new(config: &CaptureConfig) -> Self {
        let initial_ms = config
            .initial_delay_ms
            .max(config.min_delay_ms)
            .min(config.max_delay_ms);
        Self {
            delay_ms: initial_ms,
            initial_ms,
            min_ms: config.min_delay_ms,
            max_ms: config.max_delay_ms,
            step_ms: config.delay_step_ms,
        }
    }

    /// Current delay between captures.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Adjust the delay after a frame was evaluated: one step down if the
    /// frame differed from the previous kept one, one step up if not.
    /// Returns the new delay.
    pub fn on_frame_evaluated(&mut self, was_different: bool) -> Duration {
        let previous_ms = self.delay_ms;
        self.delay_ms = if was_different {
            self.delay_ms.saturating_sub(self.step_ms).max(self.min_ms)
        } else {
            self.delay_ms.saturating_add(self.step_ms).min(self.max_ms)
        };
        debug!(
            was_different,
            previous_ms,
            delay_ms = self.delay_ms,
            "capture delay adjusted"
        );
        self.delay()
    }

    /// Restore the initial delay for a fresh session.
    pub fn reset(&mut self) {
        self.delay_ms = self.initial_ms;
    }
}
