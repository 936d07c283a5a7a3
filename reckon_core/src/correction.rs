//! Correction blending: instead of snapping to a newly received authoritative
//! value, the offset between the old predicted value and the new value is
//! stored and additively decayed over time, so the rendered state slides onto
//! the authoritative one.
//!
//! Both the client-side linear predictor and the server transform authority
//! use the same math: the displacement is captured once, a weight starts at
//! `1 - delta / duration` and decays linearly to zero, and every tick the
//! weighted displacement is added on top of the predicted/extrapolated value.

use bevy_math::{Quat, Vec3};
use tracing::trace;

/// Corrections smaller than this (squared magnitude) are dropped outright:
/// blending them would be invisible.
pub const CORRECTION_EPSILON_SQ: f32 = 1e-3;

/// A decaying positional offset.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PositionCorrection {
    offset: Vec3,
    weight: f32,
}

impl PositionCorrection {
    /// Start blending out `offset` over `duration` seconds. Returns `false`
    /// (and stores nothing) when the offset is below the blending epsilon.
    pub fn begin(&mut self, offset: Vec3, frame_delta: f32, duration: f32) -> bool {
        if offset.length_squared() < CORRECTION_EPSILON_SQ || duration <= 0.0 {
            self.clear();
            return false;
        }
        self.offset = offset;
        self.weight = (1.0 - frame_delta / duration).clamp(0.0, 1.0);
        trace!(?offset, weight = self.weight, "begin position correction");
        true
    }

    /// Store `offset` at full weight, for rate-based consumers that decay
    /// with [`PositionCorrection::decay_at_rate`]. Same epsilon skip as
    /// [`PositionCorrection::begin`].
    pub fn set(&mut self, offset: Vec3) -> bool {
        if offset.length_squared() < CORRECTION_EPSILON_SQ {
            self.clear();
            return false;
        }
        self.offset = offset;
        self.weight = 1.0;
        true
    }

    /// The displacement to add onto the rendered value this tick.
    pub fn current(&self) -> Vec3 {
        self.offset * self.weight
    }

    /// Linearly decay the weight; the correction is finished once the weight
    /// reaches zero.
    pub fn decay(&mut self, frame_delta: f32, duration: f32) {
        if !self.is_active() {
            return;
        }
        if duration <= 0.0 {
            self.clear();
            return;
        }
        self.weight = (self.weight - frame_delta / duration).max(0.0);
        if self.weight == 0.0 {
            self.clear();
        }
    }

    /// Alternative decay used by rate-based consumers: shrink the remaining
    /// displacement by `rate` units per second instead of tracking a weight.
    pub fn decay_at_rate(&mut self, frame_delta: f32, rate: f32) {
        if !self.is_active() {
            return;
        }
        if rate <= 0.0 {
            self.clear();
            return;
        }
        let remaining = self.current();
        let length = remaining.length();
        let step = rate * frame_delta;
        if length <= step {
            self.clear();
        } else {
            self.offset = remaining * ((length - step) / length);
            self.weight = 1.0;
        }
    }

    pub fn is_active(&self) -> bool {
        self.weight > 0.0
    }

    pub fn clear(&mut self) {
        self.offset = Vec3::ZERO;
        self.weight = 0.0;
    }
}

/// A decaying rotational offset, stored as the delta quaternion between the
/// old predicted orientation and the newly received one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationCorrection {
    offset: Quat,
    weight: f32,
}

impl Default for RotationCorrection {
    fn default() -> Self {
        Self {
            offset: Quat::IDENTITY,
            weight: 0.0,
        }
    }
}

impl RotationCorrection {
    /// Start blending out the angular displacement `offset`. Returns `false`
    /// when the displacement angle is below the blending epsilon.
    pub fn begin(&mut self, offset: Quat, frame_delta: f32, duration: f32) -> bool {
        let angle = offset_angle(offset);
        if angle * angle < CORRECTION_EPSILON_SQ || duration <= 0.0 {
            self.clear();
            return false;
        }
        // keep the shortest arc so the blend never goes the long way around
        self.offset = if offset.w < 0.0 { -offset } else { offset };
        self.weight = (1.0 - frame_delta / duration).clamp(0.0, 1.0);
        trace!(angle, weight = self.weight, "begin rotation correction");
        true
    }

    /// Store an angular offset at full weight, for rate-based consumers that
    /// decay with [`RotationCorrection::decay_at_rate`].
    pub fn set(&mut self, offset: Quat) -> bool {
        let angle = offset_angle(offset);
        if angle * angle < CORRECTION_EPSILON_SQ {
            self.clear();
            return false;
        }
        self.offset = if offset.w < 0.0 { -offset } else { offset };
        self.weight = 1.0;
        true
    }

    /// The rotation to pre-multiply onto the rendered orientation this tick.
    pub fn current(&self) -> Quat {
        if !self.is_active() {
            return Quat::IDENTITY;
        }
        Quat::IDENTITY.slerp(self.offset, self.weight)
    }

    pub fn decay(&mut self, frame_delta: f32, duration: f32) {
        if !self.is_active() {
            return;
        }
        if duration <= 0.0 {
            self.clear();
            return;
        }
        self.weight = (self.weight - frame_delta / duration).max(0.0);
        if self.weight == 0.0 {
            self.clear();
        }
    }

    /// Rate-based decay: rotate the remaining offset toward identity by
    /// `rate` radians per second.
    pub fn decay_at_rate(&mut self, frame_delta: f32, rate: f32) {
        if !self.is_active() {
            return;
        }
        if rate <= 0.0 {
            self.clear();
            return;
        }
        let remaining = self.current();
        let angle = offset_angle(remaining);
        let step = rate * frame_delta;
        if angle <= step {
            self.clear();
        } else {
            self.offset = Quat::IDENTITY.slerp(remaining, (angle - step) / angle);
            self.weight = 1.0;
        }
    }

    pub fn is_active(&self) -> bool {
        self.weight > 0.0
    }

    pub fn clear(&mut self) {
        self.offset = Quat::IDENTITY;
        self.weight = 0.0;
    }
}

/// Absolute rotation angle of a delta quaternion, in radians, on the shortest
/// arc.
pub fn offset_angle(offset: Quat) -> f32 {
    let w = offset.w.abs().clamp(-1.0, 1.0);
    2.0 * w.acos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_log::test;

    #[test]
    fn position_correction_decays_fully_over_duration() {
        let mut correction = PositionCorrection::default();
        let delta = 0.01;
        let duration = 0.2;
        assert!(correction.begin(Vec3::new(1.0, 0.0, 0.0), delta, duration));

        let mut elapsed = delta;
        while elapsed < duration {
            correction.decay(delta, duration);
            elapsed += delta;
        }
        // at t = duration the remaining blended correction must be gone
        assert!(correction.current().length() <= 1e-3);
        assert!(!correction.is_active());
    }

    #[test]
    fn tiny_corrections_are_skipped() {
        let mut correction = PositionCorrection::default();
        assert!(!correction.begin(Vec3::splat(1e-3), 0.01, 0.2));
        assert!(!correction.is_active());

        let mut rotation = RotationCorrection::default();
        assert!(!rotation.begin(Quat::from_rotation_y(1e-2), 0.01, 0.2));
    }

    #[test]
    fn rotation_correction_blends_toward_identity() {
        let mut correction = RotationCorrection::default();
        let offset = Quat::from_rotation_y(0.5);
        assert!(correction.begin(offset, 0.0, 1.0));
        let full = offset_angle(correction.current());
        correction.decay(0.5, 1.0);
        let half = offset_angle(correction.current());
        assert!(half < full);
        correction.decay(0.5, 1.0);
        assert_relative_eq!(offset_angle(correction.current()), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn rate_decay_consumes_fixed_distance_per_second() {
        let mut correction = PositionCorrection::default();
        assert!(correction.begin(Vec3::new(2.0, 0.0, 0.0), 0.0, 1.0));
        correction.decay_at_rate(0.5, 2.0); // 1 unit consumed
        assert_relative_eq!(correction.current().x, 1.0, epsilon = 1e-5);
        correction.decay_at_rate(1.0, 2.0); // overshoots, clears
        assert!(!correction.is_active());
    }
}
