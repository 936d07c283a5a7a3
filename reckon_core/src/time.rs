//! Frame timing injected by the host.
//!
//! The host owns the loop; every tick entry point in this subsystem receives
//! a [`FrameClock`] by value and only ever reads it. There is no ambient time
//! resource.

/// Timing information for the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClock {
    /// Scaled simulation step for this frame, in seconds.
    pub delta: f32,
    /// Unscaled wall-clock step for this frame, in seconds.
    pub real_delta: f32,
    /// Number of ticks remaining until the next authoritative sample is
    /// expected. `0` means a sample is due on this very tick.
    pub frames_until_sync: i32,
}

impl FrameClock {
    pub fn new(delta: f32, real_delta: f32, frames_until_sync: i32) -> Self {
        Self {
            delta,
            real_delta,
            frames_until_sync,
        }
    }

    /// A clock with identical scaled/unscaled steps, for hosts that do not
    /// scale time.
    pub fn from_delta(delta: f32, frames_until_sync: i32) -> Self {
        Self::new(delta, delta, frames_until_sync)
    }

    /// True while extrapolation is allowed: the next authoritative sample is
    /// still at least one tick away.
    pub fn extrapolating(&self) -> bool {
        self.frames_until_sync > 0
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self {
            delta: 1.0 / 60.0,
            real_delta: 1.0 / 60.0,
            frames_until_sync: 0,
        }
    }
}
