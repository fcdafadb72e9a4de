//! Per-frame step budgeting: warmup burst plus slow-frame back-off.

use std::time::Duration;

use tracing::info;

use crate::settings::{AdaptiveSettings, DlaSettings};

/// Timing information the host passes into each frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTiming {
    /// Wall time of the previous frame in milliseconds, when known.
    pub last_frame_ms: Option<f32>,
}

impl FrameTiming {
    #[must_use]
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            last_frame_ms: Some(duration.as_secs_f32() * 1000.0),
        }
    }

    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            last_frame_ms: None,
        }
    }
}

/// Decides how many simulation steps each frame runs.
#[derive(Debug, Clone)]
pub struct StepBudget {
    base: u32,
    warmup_remaining: u32,
    warmup_multiplier: u32,
    adaptive: AdaptiveSettings,
}

impl StepBudget {
    #[must_use]
    pub fn new(base: u32, dla: &DlaSettings) -> Self {
        Self {
            base: base.max(1),
            warmup_remaining: dla.warmup_frames,
            warmup_multiplier: dla.warmup_multiplier.max(1),
            adaptive: dla.adaptive,
        }
    }

    #[must_use]
    pub const fn warmup_remaining(&self) -> u32 {
        self.warmup_remaining
    }

    /// Steps for the upcoming frame. Consumes one warmup frame if any remain.
    ///
    /// A slow previous frame scales the count by the slowdown factor, but never
    /// below `min_steps` and never above the count it started from.
    pub fn next_frame(&mut self, timing: FrameTiming) -> u32 {
        let mut steps = self.base;
        if self.warmup_remaining > 0 {
            steps = steps.saturating_mul(self.warmup_multiplier);
            self.warmup_remaining -= 1;
            if self.warmup_remaining == 0 {
                info!(base = self.base, "DLA warmup complete");
            }
        }
        if self.adaptive.enabled
            && timing
                .last_frame_ms
                .is_some_and(|ms| ms > self.adaptive.target_frame_ms)
        {
            let floor = self.adaptive.min_steps.min(steps);
            let reduced = (steps as f32 * self.adaptive.slowdown_factor).floor() as u32;
            steps = reduced.max(floor);
        }
        steps.max(1)
    }
}
