//! The unit being synchronized: position, rotation, scale, with per-field
//! dirty tracking.

use bevy_math::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Bitmask describing which transform fields an update touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransformChannels(pub u8);

impl TransformChannels {
    pub const NONE: Self = Self(0);
    pub const POSITION: Self = Self(1 << 0);
    pub const ROTATION: Self = Self(1 << 1);
    pub const SCALE: Self = Self(1 << 2);
    pub const ALL: Self = Self(0b111);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for TransformChannels {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Plain transform data for a networked entity.
///
/// Invariants, restored by [`TransformState::sanitize`] on every ingest path:
/// the rotation is a unit quaternion, scale components are non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformState {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for TransformState {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl TransformState {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        let mut state = Self {
            position,
            rotation,
            scale,
        };
        state.sanitize();
        state
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    /// Restore the field invariants: normalized rotation, non-negative scale.
    ///
    /// A zero-length quaternion (a possible result of decoding garbage)
    /// normalizes to identity rather than NaN.
    pub fn sanitize(&mut self) {
        self.rotation = if self.rotation.length_squared() > f32::EPSILON {
            self.rotation.normalize()
        } else {
            Quat::IDENTITY
        };
        self.scale = self.scale.max(Vec3::ZERO);
    }

    /// Copy the fields selected by `channels` from `other`, returning the
    /// channels that actually changed.
    pub fn apply(&mut self, other: &TransformState, channels: TransformChannels) -> TransformChannels {
        let mut changed = TransformChannels::NONE;
        if channels.contains(TransformChannels::POSITION) && self.position != other.position {
            self.position = other.position;
            changed.insert(TransformChannels::POSITION);
        }
        if channels.contains(TransformChannels::ROTATION) && self.rotation != other.rotation {
            self.rotation = other.rotation;
            changed.insert(TransformChannels::ROTATION);
        }
        if channels.contains(TransformChannels::SCALE) && self.scale != other.scale {
            self.scale = other.scale;
            changed.insert(TransformChannels::SCALE);
        }
        if !changed.is_empty() {
            self.sanitize();
        }
        changed
    }

    /// Linear interpolation between two states (nlerp on the rotation).
    pub fn lerp(&self, other: &TransformState, t: f32) -> TransformState {
        TransformState::new(
            self.position.lerp(other.position, t),
            self.rotation.lerp(other.rotation, t),
            self.scale.lerp(other.scale, t),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_log::test;

    #[test]
    fn sanitize_restores_invariants() {
        let mut state = TransformState {
            position: Vec3::ONE,
            rotation: Quat::from_xyzw(0.0, 2.0, 0.0, 0.0),
            scale: Vec3::new(1.0, -3.0, 0.5),
        };
        state.sanitize();
        assert_relative_eq!(state.rotation.length(), 1.0, epsilon = 1e-6);
        assert_eq!(state.scale, Vec3::new(1.0, 0.0, 0.5));

        let mut degenerate = TransformState {
            rotation: Quat::from_xyzw(0.0, 0.0, 0.0, 0.0),
            ..TransformState::IDENTITY
        };
        degenerate.sanitize();
        assert_eq!(degenerate.rotation, Quat::IDENTITY);
    }

    #[test]
    fn apply_reports_dirty_channels() {
        let mut state = TransformState::IDENTITY;
        let incoming = TransformState::new(
            Vec3::new(1.0, 0.0, 0.0),
            Quat::from_rotation_y(0.5),
            Vec3::ONE,
        );
        let changed = state.apply(&incoming, TransformChannels::POSITION | TransformChannels::SCALE);
        // scale is identical, so only position is dirty
        assert_eq!(changed, TransformChannels::POSITION);
        assert_eq!(state.position, incoming.position);
        assert_eq!(state.rotation, Quat::IDENTITY);
    }
}
