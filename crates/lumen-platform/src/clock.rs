// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

pub const FPS_WINDOW: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FpsSample {
    pub fps: f64,
    pub frame_ms: f64,
}

impl FpsSample {
    pub fn title(&self, base: &str) -> String {
        format!("{base}: {:.1} ({:.3} ms)", self.fps, self.frame_ms)
    }
}

/// Per-frame delta plus a frame rate averaged over windows of at least
/// `FPS_WINDOW`.
#[derive(Debug)]
pub struct FrameClock {
    last: Instant,
    window_start: Instant,
    frames: u32,
}

impl FrameClock {
    pub fn new(now: Instant) -> Self {
        FrameClock {
            last: now,
            window_start: now,
            frames: 0,
        }
    }

    /// Milliseconds since the previous tick, and a fresh sample whenever a
    /// window closes.
    pub fn tick(&mut self, now: Instant) -> (f64, Option<FpsSample>) {
        let delta_ms = now.saturating_duration_since(self.last).as_secs_f64() * 1000.0;
        self.last = now;
        self.frames += 1;

        let window = now.saturating_duration_since(self.window_start);
        if window < FPS_WINDOW {
            return (delta_ms, None);
        }
        let secs = window.as_secs_f64();
        let sample = FpsSample {
            fps: f64::from(self.frames) / secs,
            frame_ms: secs * 1000.0 / f64::from(self.frames),
        };
        self.window_start = now;
        self.frames = 0;
        (delta_ms, Some(sample))
    }
}
