//! The narrow physics interface the converging predictor consults, and the
//! sweep-and-slide resolver built on top of it.
//!
//! Physics internals (broadphase, rigid bodies) live in the host; this
//! subsystem only ever asks "sweeping this shape along this vector, what do I
//! hit first?".

use bevy_math::Vec3;
use tracing::trace;

/// First contact returned by a sweep query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepHit {
    /// Travel distance along the sweep direction at which contact occurs.
    pub distance: f32,
    /// Contact point in world space.
    pub point: Vec3,
    /// Contact surface normal, unit length, pointing away from the obstacle.
    pub normal: Vec3,
}

/// Collider silhouette used for sweeps and for deriving reconciliation
/// defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColliderShape {
    Box { half_extents: Vec3 },
    Capsule { radius: f32, half_height: f32 },
}

impl ColliderShape {
    /// Full width of the collider on its widest horizontal axis. Drives the
    /// default velocity tolerance and tunnel distance.
    pub fn largest_horizontal_extent(&self) -> f32 {
        match self {
            ColliderShape::Box { half_extents } => 2.0 * half_extents.x.max(half_extents.z),
            ColliderShape::Capsule { radius, .. } => 2.0 * radius,
        }
    }
}

impl Default for ColliderShape {
    fn default() -> Self {
        ColliderShape::Capsule {
            radius: 0.5,
            half_height: 1.0,
        }
    }
}

/// Sweep query surface provided by the host's physics engine.
pub trait PhysicsQuery {
    /// Sweep `shape` from `origin` along the unit vector `direction` for up
    /// to `distance`, returning the first contact if any.
    fn sweep(
        &self,
        shape: &ColliderShape,
        origin: Vec3,
        direction: Vec3,
        distance: f32,
    ) -> Option<SweepHit>;
}

/// Iteration and angle limits for [`sweep_and_slide`], borrowed from the
/// converging predictor's config.
#[derive(Debug, Clone, Copy)]
pub struct SlideLimits {
    pub iterations: u32,
    /// Max deviation between the pre-contact direction and the slide
    /// direction for a single iteration, radians.
    pub max_slide_angle: f32,
    /// Max deviation between the original movement direction and any slide
    /// direction, radians.
    pub max_total_slide_angle: f32,
    /// Clearance kept from every contact to avoid numerical
    /// interpenetration.
    pub separation_offset: f32,
}

/// Resolve `movement` from `start` against the physics surface: sweep, and on
/// contact project the leftover motion onto the contact plane, up to the
/// configured iteration count. Returns the final position.
pub fn sweep_and_slide(
    physics: &dyn PhysicsQuery,
    shape: &ColliderShape,
    start: Vec3,
    movement: Vec3,
    limits: &SlideLimits,
) -> Vec3 {
    let mut position = start;
    let mut remaining = movement;
    let original_length = movement.length();
    if original_length <= f32::EPSILON {
        return start;
    }
    let original_direction = movement / original_length;

    for iteration in 0..limits.iterations {
        let distance = remaining.length();
        if distance <= f32::EPSILON {
            break;
        }
        let direction = remaining / distance;

        let Some(hit) = physics.sweep(
            shape,
            position,
            direction,
            distance + limits.separation_offset,
        ) else {
            position += remaining;
            break;
        };

        // stop short of the contact by the separation offset
        let allowed = (hit.distance - limits.separation_offset).max(0.0).min(distance);
        position += direction * allowed;

        let leftover = direction * (distance - allowed);
        let slide = leftover.reject_from_normalized(hit.normal);
        if slide.length_squared() <= f32::EPSILON {
            break;
        }
        let slide_direction = slide / slide.length();
        let step_angle = slide_direction.angle_between(direction);
        let total_angle = slide_direction.angle_between(original_direction);
        if step_angle > limits.max_slide_angle || total_angle > limits.max_total_slide_angle {
            trace!(
                iteration,
                step_angle,
                total_angle,
                "slide rejected, deviates too far from input direction"
            );
            break;
        }
        remaining = slide;
    }
    position
}
